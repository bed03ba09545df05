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

//! GNSS signal center frequencies used to annotate spectrum plots.
//!
//! Signals sharing a carrier within one system are listed once. GLONASS FDMA
//! bands are expanded into one marker per frequency channel.

use std::ops::RangeInclusive;

use serde::Serialize;

// Common band centers (Hz)
const L1_E1_HZ: f64 = 1_575_420_000.0;
const L2_HZ: f64 = 1_227_600_000.0;
const L5_E5A_HZ: f64 = 1_176_450_000.0;
const E5B_HZ: f64 = 1_207_140_000.0;
const E6_HZ: f64 = 1_278_750_000.0;

const GLONASS_L1_FDMA_HZ: f64 = 1_602_000_000.0;
const GLONASS_L1_FDMA_SPACING_HZ: f64 = 562_500.0;
const GLONASS_L2_FDMA_HZ: f64 = 1_246_000_000.0;
const GLONASS_L2_FDMA_SPACING_HZ: f64 = 437_500.0;

/// GLONASS FDMA frequency channel numbers in use.
pub const GLONASS_FDMA_CHANNELS: RangeInclusive<i32> = -7..=6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Constellation {
    Gps,
    Glonass,
    Galileo,
    Beidou,
    Qzss,
}

/// A named signal at a fixed center frequency.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GnssSignal {
    pub constellation: Constellation,
    pub label: &'static str,
    pub center_hz: f64,
}

const fn signal(constellation: Constellation, label: &'static str, center_hz: f64) -> GnssSignal {
    GnssSignal {
        constellation,
        label,
        center_hz,
    }
}

/// Fixed-carrier signals, grouped by system.
pub const SIGNALS: &[GnssSignal] = &[
    signal(Constellation::Gps, "GPS L1", L1_E1_HZ),
    signal(Constellation::Gps, "GPS L2", L2_HZ),
    signal(Constellation::Gps, "GPS L5", L5_E5A_HZ),
    signal(Constellation::Galileo, "GAL E1", L1_E1_HZ),
    signal(Constellation::Galileo, "GAL E5a", L5_E5A_HZ),
    signal(Constellation::Galileo, "GAL E5b", E5B_HZ),
    signal(Constellation::Galileo, "GAL E5 ALTBOC", 1_191_795_000.0),
    signal(Constellation::Galileo, "GAL E6", E6_HZ),
    signal(Constellation::Beidou, "BDS B1 I/Q", 1_561_098_000.0),
    signal(Constellation::Beidou, "BDS B1 C/a", L1_E1_HZ),
    signal(Constellation::Beidou, "BDS B2 a", L5_E5A_HZ),
    signal(Constellation::Beidou, "BDS B2 I/Q/b", E5B_HZ),
    signal(Constellation::Beidou, "BDS B3 I/Q/A", 1_268_520_000.0),
    signal(Constellation::Qzss, "QZSS L1", L1_E1_HZ),
    signal(Constellation::Qzss, "QZSS L2", L2_HZ),
    signal(Constellation::Qzss, "QZSS L5", L5_E5A_HZ),
    signal(Constellation::Qzss, "QZSS E6 LEX", E6_HZ),
    signal(Constellation::Glonass, "GLO L1 CDMA", 1_600_995_000.0),
    signal(Constellation::Glonass, "GLO L2 CDMA", 1_248_060_000.0),
    signal(Constellation::Glonass, "GLO L3 CDMA", 1_202_025_000.0),
];

/// A signal marker placed on a plot's frequency axis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalMarker {
    pub constellation: Constellation,
    pub label: String,
    pub frequency_hz: f64,
}

impl From<&GnssSignal> for SignalMarker {
    fn from(signal: &GnssSignal) -> Self {
        Self {
            constellation: signal.constellation,
            label: signal.label.to_string(),
            frequency_hz: signal.center_hz,
        }
    }
}

/// One marker per GLONASS FDMA channel on L1 and L2.
pub fn glonass_fdma_carriers() -> impl Iterator<Item = SignalMarker> {
    let bands = [
        ("L1", GLONASS_L1_FDMA_HZ, GLONASS_L1_FDMA_SPACING_HZ),
        ("L2", GLONASS_L2_FDMA_HZ, GLONASS_L2_FDMA_SPACING_HZ),
    ];

    bands.into_iter().flat_map(|(band, center, spacing)| {
        GLONASS_FDMA_CHANNELS.map(move |k| SignalMarker {
            constellation: Constellation::Glonass,
            label: format!("GLO {band} FDMA {k:+}"),
            frequency_hz: center + f64::from(k) * spacing,
        })
    })
}

/// All markers with a frequency in `low..=high` Hz, sorted by frequency.
#[must_use]
pub fn markers_within(low: f64, high: f64) -> Vec<SignalMarker> {
    let band = low..=high;
    let mut markers: Vec<SignalMarker> = SIGNALS
        .iter()
        .filter(|s| band.contains(&s.center_hz))
        .map(SignalMarker::from)
        .chain(glonass_fdma_carriers().filter(|m| band.contains(&m.frequency_hz)))
        .collect();

    markers.sort_by(|a, b| a.frequency_hz.total_cmp(&b.frequency_hz));
    markers
}
