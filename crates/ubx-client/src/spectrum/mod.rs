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

//! Spectrum aggregation and trace state management.
//!
//! This module folds successive MON-SPAN snapshots into per-block traces:
//! the instantaneous spectrum, a running maximum, and a two-term running
//! average ("CMA"). The average follows `cma' = (current + cma) / 2` on every
//! snapshot, which weights recent snapshots far more than a true cumulative
//! mean would. Keep that recurrence; downstream plots depend on it.

mod payload;

pub use payload::{BlockMetadata, RenderPayload, SeriesKind};

use log::debug;

use crate::protocol::{SpanBlock, SpanSnapshot};

/// Number of RF blocks reported by current u-blox F9 receivers.
pub const DEFAULT_RF_BLOCKS: usize = 2;
/// MON-SPAN reports 256 bins per block.
pub const DEFAULT_BIN_COUNT: usize = 256;

/// Per-block trace state.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockTraces {
    /// Bin center frequencies from the latest snapshot (Hz).
    pub bin_center_freqs: Vec<f64>,
    /// Latest power values (dB).
    pub current: Vec<f64>,
    /// Running maximum since the last reset.
    pub maxima: Vec<f64>,
    /// Two-term running average since the last reset.
    pub cma: Vec<f64>,
    /// PGA gain from the latest snapshot, `None` until one arrives.
    pub pga: Option<i32>,
}

impl BlockTraces {
    fn zeroed(bins: usize) -> Self {
        Self {
            bin_center_freqs: vec![0.0; bins],
            current: vec![0.0; bins],
            maxima: vec![0.0; bins],
            cma: vec![0.0; bins],
            pga: None,
        }
    }

    /// Number of bins the statistics are currently sized for.
    #[must_use]
    pub fn bin_count(&self) -> usize {
        self.maxima.len()
    }

    fn clear_statistics(&mut self) {
        self.maxima.fill(0.0);
        self.cma.fill(0.0);
    }

    fn apply(&mut self, index: usize, block: &SpanBlock) {
        assert_eq!(
            block.bin_center_freqs.len(),
            block.spectrum.len(),
            "block {index}: {} bin frequencies but {} power values",
            block.bin_center_freqs.len(),
            block.spectrum.len(),
        );

        let bins = block.bin_count();
        if bins != self.bin_count() {
            debug!(
                "Block {index} bin count changed from {} to {bins}, re-baselining statistics",
                self.bin_count()
            );
            self.maxima = vec![0.0; bins];
            self.cma = vec![0.0; bins];
        }

        for ((max, cma), &power) in self
            .maxima
            .iter_mut()
            .zip(self.cma.iter_mut())
            .zip(&block.spectrum)
        {
            *max = power.max(*max);
            *cma = (power + *cma) / 2.0;
        }

        self.bin_center_freqs.clone_from(&block.bin_center_freqs);
        self.current.clone_from(&block.spectrum);
        self.pga = Some(block.pga);
    }
}

/// Aggregate trace state for every tracked RF block.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AggregateState {
    blocks: Vec<BlockTraces>,
}

impl AggregateState {
    /// Zeroed state for `num_blocks` blocks of `bin_count` bins each.
    #[must_use]
    pub fn new(num_blocks: usize, bin_count: usize) -> Self {
        Self {
            blocks: (0..num_blocks).map(|_| BlockTraces::zeroed(bin_count)).collect(),
        }
    }

    /// Number of tracked RF blocks.
    #[must_use]
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    #[must_use]
    pub fn blocks(&self) -> &[BlockTraces] {
        &self.blocks
    }

    #[must_use]
    pub fn block(&self, index: usize) -> Option<&BlockTraces> {
        self.blocks.get(index)
    }

    /// Fold a snapshot into the state, returning the new state and its render payload.
    ///
    /// # Panics
    ///
    /// Panics if the snapshot lacks a tracked block, or if any tracked block's
    /// frequency and power sequences differ in length. Both are caller bugs;
    /// patching the data up would corrupt the running statistics.
    #[must_use]
    pub fn advance(mut self, snapshot: &SpanSnapshot) -> (Self, RenderPayload) {
        assert!(
            snapshot.blocks.len() >= self.blocks.len(),
            "snapshot carries {} RF blocks but {} are tracked",
            snapshot.blocks.len(),
            self.blocks.len(),
        );
        if snapshot.blocks.len() > self.blocks.len() {
            debug!(
                "Ignoring {} untracked RF blocks",
                snapshot.blocks.len() - self.blocks.len()
            );
        }

        for (index, (traces, block)) in self.blocks.iter_mut().zip(&snapshot.blocks).enumerate() {
            traces.apply(index, block);
        }

        let payload = self.payload();
        (self, payload)
    }

    /// Zero the running maximum and average of every block.
    ///
    /// Bin counts and the instantaneous spectrum are kept.
    #[must_use]
    pub fn reset(mut self) -> Self {
        for traces in &mut self.blocks {
            traces.clear_statistics();
        }
        self
    }

    /// Render payload for the current state.
    #[must_use]
    pub fn payload(&self) -> RenderPayload {
        RenderPayload::from_blocks(&self.blocks)
    }
}

/// Configuration for the spectrum aggregator.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Number of RF blocks to track.
    pub num_blocks: usize,
    /// Bin count the traces are sized to before the first snapshot.
    pub initial_bin_count: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            num_blocks: DEFAULT_RF_BLOCKS,
            initial_bin_count: DEFAULT_BIN_COUNT,
        }
    }
}

/// Owns the aggregate state and applies snapshots to it.
///
/// Not synchronized: drive it from a single consumer.
#[derive(Debug)]
pub struct SpectrumAggregator {
    state: AggregateState,
    updates: u64,
}

impl SpectrumAggregator {
    #[must_use]
    pub fn new(config: &AggregatorConfig) -> Self {
        Self {
            state: AggregateState::new(config.num_blocks, config.initial_bin_count),
            updates: 0,
        }
    }

    /// Apply a snapshot. See [`AggregateState::advance`] for the panics.
    pub fn update(&mut self, snapshot: &SpanSnapshot) -> RenderPayload {
        let (state, payload) = std::mem::take(&mut self.state).advance(snapshot);
        self.state = state;
        self.updates += 1;
        payload
    }

    /// Zero the running statistics of every block.
    pub fn reset(&mut self) -> &AggregateState {
        self.state = std::mem::take(&mut self.state).reset();
        &self.state
    }

    #[must_use]
    pub fn state(&self) -> &AggregateState {
        &self.state
    }

    /// Render payload for the current state without applying a snapshot.
    #[must_use]
    pub fn payload(&self) -> RenderPayload {
        self.state.payload()
    }

    /// Number of snapshots applied so far.
    #[must_use]
    pub fn update_count(&self) -> u64 {
        self.updates
    }
}

/// Detects a hidden-to-visible transition of the averaged traces.
///
/// Showing the averages again starts them over, so the consumer resets the
/// aggregator whenever [`observe`](Self::observe) returns `true`.
#[derive(Debug, Clone, Copy)]
pub struct VisibilityEdge {
    visible: bool,
}

impl Default for VisibilityEdge {
    fn default() -> Self {
        Self::new(true)
    }
}

impl VisibilityEdge {
    #[must_use]
    pub fn new(visible: bool) -> Self {
        Self { visible }
    }

    /// Record the new visibility and report a rising edge.
    pub fn observe(&mut self, visible: bool) -> bool {
        let rising = visible && !self.visible;
        self.visible = visible;
        rising
    }

    /// Flip visibility, reporting a rising edge like [`observe`](Self::observe).
    pub fn toggle(&mut self) -> bool {
        self.observe(!self.visible)
    }

    #[must_use]
    pub fn is_visible(&self) -> bool {
        self.visible
    }
}
