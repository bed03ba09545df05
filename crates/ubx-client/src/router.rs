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

//! Routes source events to the aggregator and the publish queue.
//!
//! Only spectrum snapshots and position fixes are acted on. Decoder errors,
//! unparseable lines and unknown message kinds are counted and dropped. Every
//! call returns after an aggregation step and a queue push; rendering happens
//! elsewhere.

use log::{debug, info, trace, warn};
use tokio::sync::watch;

use crate::protocol::{PositionFix, SpanSnapshot, UbxMessage};
use crate::publish::{PublishQueue, PublishReason};
use crate::source::{SourceEvent, SourceState};
use crate::spectrum::{SpectrumAggregator, VisibilityEdge};

/// Per-kind message counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    pub spectra: u64,
    pub fixes: u64,
    pub decode_errors: u64,
    pub unrecognized: u64,
    pub parse_failures: u64,
    /// Spectrum snapshots missing one of the tracked RF blocks.
    pub malformed: u64,
    pub resets: u64,
}

impl RouterStats {
    /// Messages that were dropped without reaching the aggregator.
    #[must_use]
    pub fn discarded(&self) -> u64 {
        self.decode_errors + self.unrecognized + self.parse_failures + self.malformed
    }
}

/// Consumer-side message router. Owns the aggregator.
#[derive(Debug)]
pub struct MessageRouter {
    aggregator: SpectrumAggregator,
    queue: PublishQueue,
    fix_tx: watch::Sender<Option<PositionFix>>,
    averages: VisibilityEdge,
    source_state: Option<SourceState>,
    stats: RouterStats,
}

impl MessageRouter {
    #[must_use]
    pub fn new(aggregator: SpectrumAggregator, queue: PublishQueue) -> Self {
        let (fix_tx, _) = watch::channel(None);
        Self {
            aggregator,
            queue,
            fix_tx,
            averages: VisibilityEdge::default(),
            source_state: None,
            stats: RouterStats::default(),
        }
    }

    /// Handle one event from the message source.
    pub fn handle(&mut self, event: SourceEvent) {
        match event {
            SourceEvent::Message(msg) => self.handle_message(msg),
            SourceEvent::ParseFailed(e) => {
                self.stats.parse_failures += 1;
                trace!("Dropping unparseable line: {}", e);
            }
            SourceEvent::StateChanged(state) => {
                debug!("Source state: {:?}", state);
                self.source_state = Some(state);
            }
        }
    }

    /// Handle one decoded message.
    pub fn handle_message(&mut self, msg: UbxMessage) {
        let kind = msg.kind();
        match msg {
            UbxMessage::Spectrum(snapshot) => self.on_spectrum(&snapshot),
            UbxMessage::Fix(fix) => self.on_fix(fix),
            UbxMessage::DecodeError { class, id, message } => {
                self.stats.decode_errors += 1;
                trace!("Dropping {kind} (class {class:?}, id {id:?}): {message}");
            }
            UbxMessage::Unrecognized(name) => {
                self.stats.unrecognized += 1;
                trace!("Dropping {kind} message {name}");
            }
        }
    }

    fn on_spectrum(&mut self, snapshot: &SpanSnapshot) {
        let tracked = self.aggregator.state().num_blocks();
        if snapshot.blocks.len() < tracked {
            self.stats.malformed += 1;
            if self.stats.malformed == 1 || self.stats.malformed % 100 == 0 {
                warn!(
                    "Dropping MON-SPAN with {} RF blocks, {} are tracked ({} dropped so far)",
                    snapshot.blocks.len(),
                    tracked,
                    self.stats.malformed
                );
            }
            return;
        }

        if self.stats.spectra == 0 {
            info!(
                "First MON-SPAN snapshot: {} RF blocks, {} bins in block 0",
                snapshot.blocks.len(),
                snapshot.blocks.first().map_or(0, |b| b.bin_count())
            );
        }
        self.stats.spectra += 1;

        let payload = self.aggregator.update(snapshot);
        self.queue.schedule(PublishReason::Snapshot, payload);
    }

    fn on_fix(&mut self, fix: PositionFix) {
        self.stats.fixes += 1;

        let had_position = self
            .fix_tx
            .borrow()
            .as_ref()
            .is_some_and(PositionFix::has_position);
        if fix.has_position() != had_position {
            info!(
                "Position fix {} (type {}, {} SVs)",
                if fix.has_position() { "acquired" } else { "lost" },
                fix.fix_type,
                fix.num_sv
            );
        }

        self.fix_tx.send_replace(Some(fix));
    }

    /// Update the averaged-trace visibility. Becoming visible resets the
    /// running statistics and schedules a publish of the zeroed traces.
    ///
    /// Returns `true` if a reset happened.
    pub fn set_averages_visible(&mut self, visible: bool) -> bool {
        if self.averages.observe(visible) {
            self.reset();
            true
        } else {
            false
        }
    }

    /// Flip averaged-trace visibility. See [`set_averages_visible`](Self::set_averages_visible).
    pub fn toggle_averages(&mut self) -> bool {
        let visible = !self.averages.is_visible();
        self.set_averages_visible(visible)
    }

    /// Reset running statistics and schedule a publish of the zeroed traces.
    pub fn reset(&mut self) {
        self.stats.resets += 1;
        let payload = self.aggregator.reset().payload();
        self.queue.schedule(PublishReason::Reset, payload);
        info!("Running maximum and average traces reset");
    }

    /// Subscribe to the latest position fix.
    #[must_use]
    pub fn fixes(&self) -> watch::Receiver<Option<PositionFix>> {
        self.fix_tx.subscribe()
    }

    #[must_use]
    pub fn aggregator(&self) -> &SpectrumAggregator {
        &self.aggregator
    }

    /// Last state reported by the source.
    #[must_use]
    pub fn source_state(&self) -> Option<&SourceState> {
        self.source_state.as_ref()
    }

    #[must_use]
    pub fn stats(&self) -> RouterStats {
        self.stats
    }
}
