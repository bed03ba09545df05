// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Protocol layer for decoded receiver messages.
//!
//! Binary UBX framing and field decoding are handled upstream by an external
//! decoder. This layer only turns the decoder's line-oriented output into
//! typed messages. The [`Protocol`] trait keeps room for other decoder
//! output formats.

mod json;

pub use json::JsonLinesParser;

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during message parsing.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid message format: {0}")]
    InvalidFormat(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("block {block} has {freqs} bin frequencies but {powers} power values")]
    MismatchedBlock {
        block: usize,
        freqs: usize,
        powers: usize,
    },
}

/// One RF block of a MON-SPAN snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanBlock {
    /// Bin center frequencies in Hz, ascending.
    pub bin_center_freqs: Vec<f64>,
    /// Power per bin in dB (unreferenced), parallel to `bin_center_freqs`.
    pub spectrum: Vec<f64>,
    /// Programmable gain amplifier setting in dB.
    pub pga: i32,
}

impl SpanBlock {
    /// Number of bins reported for this block.
    #[must_use]
    pub fn bin_count(&self) -> usize {
        self.spectrum.len()
    }
}

/// A decoded spectrum analyzer message covering every RF block at one instant.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SpanSnapshot {
    pub blocks: Vec<SpanBlock>,
}

impl SpanSnapshot {
    /// Check that each block's frequency and power sequences line up.
    pub fn validate(&self) -> Result<(), ParseError> {
        for (block, data) in self.blocks.iter().enumerate() {
            if data.bin_center_freqs.len() != data.spectrum.len() {
                return Err(ParseError::MismatchedBlock {
                    block,
                    freqs: data.bin_center_freqs.len(),
                    powers: data.spectrum.len(),
                });
            }
        }
        Ok(())
    }
}

/// Navigation position/velocity/time solution.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionFix {
    /// GPS time of week of the navigation epoch in milliseconds.
    pub itow: u32,
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub min: u8,
    pub sec: u8,
    /// 0 = no fix, 1 = dead reckoning, 2 = 2D, 3 = 3D, 4 = GNSS + DR, 5 = time only.
    pub fix_type: u8,
    /// Satellites used in the solution.
    pub num_sv: u8,
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lon: f64,
    /// Height above ellipsoid in meters.
    pub height: f64,
}

impl PositionFix {
    /// Whether the receiver reports a usable position.
    #[must_use]
    pub fn has_position(&self) -> bool {
        matches!(self.fix_type, 2..=4)
    }

    /// UTC time of the solution, if the date fields form a valid instant.
    #[must_use]
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        NaiveDate::from_ymd_opt(
            i32::from(self.year),
            u32::from(self.month),
            u32::from(self.day),
        )?
        .and_hms_opt(u32::from(self.hour), u32::from(self.min), u32::from(self.sec))
        .map(|naive| naive.and_utc())
    }
}

/// Unified message type produced by protocol parsers.
#[derive(Debug, Clone, PartialEq)]
pub enum UbxMessage {
    /// MON-SPAN spectrum snapshot.
    Spectrum(SpanSnapshot),

    /// NAV-PVT position/time fix.
    Fix(PositionFix),

    /// The upstream decoder failed on a frame (bad checksum, truncated payload).
    DecodeError {
        class: Option<u8>,
        id: Option<u8>,
        message: String,
    },

    /// A message kind this crate does not act on.
    Unrecognized(String),
}

/// Coarse message classification, used for routing and statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Spectrum,
    Fix,
    DecodeError,
    Unrecognized,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Spectrum => "MON-SPAN",
            Self::Fix => "NAV-PVT",
            Self::DecodeError => "decode error",
            Self::Unrecognized => "unrecognized",
        };
        f.write_str(name)
    }
}

impl UbxMessage {
    /// Classify this message.
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Spectrum(_) => MessageKind::Spectrum,
            Self::Fix(_) => MessageKind::Fix,
            Self::DecodeError { .. } => MessageKind::DecodeError,
            Self::Unrecognized(_) => MessageKind::Unrecognized,
        }
    }
}

/// Trait for protocol parsers.
///
/// Implement this trait to accept another decoder output format.
pub trait Protocol {
    /// The message type produced by this parser.
    type Message;
    /// The error type for parsing failures.
    type Error;

    /// Parse one line of input into a message.
    ///
    /// Returns `Ok(Some(message))` if parsing succeeded,
    /// `Ok(None)` if the input is valid but doesn't produce a message,
    /// or `Err(error)` if parsing failed.
    fn parse(&mut self, input: &[u8]) -> Result<Option<Self::Message>, Self::Error>;
}
