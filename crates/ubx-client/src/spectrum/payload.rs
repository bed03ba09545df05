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

//! Render-ready view of the aggregate state.

use std::collections::BTreeMap;

use serde::Serialize;

use super::BlockTraces;
use crate::signals::{markers_within, SignalMarker};

/// The four per-block series handed to a render sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeriesKind {
    BinCenterFreqs,
    Spectrum,
    Maxima,
    Cma,
}

impl SeriesKind {
    pub const ALL: [Self; 4] = [Self::BinCenterFreqs, Self::Spectrum, Self::Maxima, Self::Cma];

    /// Series name prefix used by dashboards.
    #[must_use]
    pub fn prefix(self) -> &'static str {
        match self {
            Self::BinCenterFreqs => "spectrumBinCenterFreqs",
            Self::Spectrum => "spectrum",
            Self::Maxima => "spectrumMaxima",
            Self::Cma => "spectrumCMA",
        }
    }

    /// Block-qualified series name, e.g. `spectrumCMA_1`.
    #[must_use]
    pub fn key(self, block: usize) -> String {
        format!("{}_{block}", self.prefix())
    }
}

/// Per-block scalars shown next to the plot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockMetadata {
    pub block: usize,
    /// PGA gain in dB, `None` until the first snapshot.
    pub pga: Option<i32>,
    /// GNSS signals whose center frequency lies inside the block's band.
    pub markers: Vec<SignalMarker>,
}

impl BlockMetadata {
    fn from_traces(block: usize, traces: &BlockTraces) -> Self {
        let markers = match (traces.bin_center_freqs.first(), traces.bin_center_freqs.last()) {
            (Some(&low), Some(&high)) if low < high => markers_within(low, high),
            _ => Vec::new(),
        };

        Self {
            block,
            pga: traces.pga,
            markers,
        }
    }

    /// Plot title, one-based like the receiver documentation.
    #[must_use]
    pub fn title(&self) -> String {
        format!("UBX SPAN Block {}", self.block + 1)
    }

    /// Gain label text.
    #[must_use]
    pub fn label(&self) -> String {
        match self.pga {
            Some(pga) => format!("PGA Gain: {pga} dB"),
            None => "NO_DATA".to_string(),
        }
    }
}

/// Series map plus block metadata, published as one unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderPayload {
    pub series: BTreeMap<String, Vec<f64>>,
    pub metadata: Vec<BlockMetadata>,
}

impl RenderPayload {
    pub(super) fn from_blocks(blocks: &[BlockTraces]) -> Self {
        let mut series = BTreeMap::new();
        let mut metadata = Vec::with_capacity(blocks.len());

        for (block, traces) in blocks.iter().enumerate() {
            series.insert(
                SeriesKind::BinCenterFreqs.key(block),
                traces.bin_center_freqs.clone(),
            );
            series.insert(SeriesKind::Spectrum.key(block), traces.current.clone());
            series.insert(SeriesKind::Maxima.key(block), traces.maxima.clone());
            series.insert(SeriesKind::Cma.key(block), traces.cma.clone());
            metadata.push(BlockMetadata::from_traces(block, traces));
        }

        Self { series, metadata }
    }

    /// Look up one series.
    #[must_use]
    pub fn series(&self, kind: SeriesKind, block: usize) -> Option<&[f64]> {
        self.series.get(&kind.key(block)).map(Vec::as_slice)
    }
}
