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

//! Live spectrum plumbing for u-blox receivers.
//!
//! This library turns a decoded u-blox message feed into render-ready spectrum
//! traces. Binary UBX decoding stays with an external decoder; this crate
//! takes its line-oriented output. The crate is split into layers that can
//! be used independently or composed together:
//!
//! - **Protocol layer**: decoder output parsing (JSON lines)
//! - **Source layer**: background reader over stdin or a file, with EOF timeout
//! - **Spectrum layer**: running maximum and two-term average per RF block
//! - **Router**: filters messages and schedules publishes
//! - **Publish layer**: drop-oldest queue and frame-ticked render loop
//!
//! # Quick Start
//!
//! Use the [`Scope`] type for full-stack operation:
//!
//! ```no_run
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use ubx_client::publish::{run_render_loop, PublishRequest, RenderSink, SinkError};
//! use ubx_client::{Scope, ScopeConfig};
//!
//! struct PrintSink;
//!
//! impl RenderSink for PrintSink {
//!     fn publish(&mut self, request: &PublishRequest) -> Result<(), SinkError> {
//!         for block in &request.payload.metadata {
//!             println!("{}: {}", block.title(), block.label());
//!         }
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let cancel = CancellationToken::new();
//!     let scope = Scope::spawn(ScopeConfig::default(), cancel.clone());
//!
//!     let mut sink = PrintSink;
//!     let render = run_render_loop(
//!         scope.publish_queue(),
//!         &mut sink,
//!         Duration::from_millis(50),
//!         cancel,
//!     );
//!     let (stats, _) = tokio::join!(scope.finished(), render);
//!     println!("{} spectra", stats.spectra);
//! }
//! ```
//!
//! # Using Individual Layers
//!
//! ## Spectrum Layer Only
//!
//! ```
//! use ubx_client::protocol::{SpanBlock, SpanSnapshot};
//! use ubx_client::spectrum::{AggregatorConfig, SeriesKind, SpectrumAggregator};
//!
//! let mut aggregator = SpectrumAggregator::new(&AggregatorConfig {
//!     num_blocks: 1,
//!     initial_bin_count: 4,
//! });
//!
//! let payload = aggregator.update(&SpanSnapshot {
//!     blocks: vec![SpanBlock {
//!         bin_center_freqs: vec![1.0, 2.0, 3.0, 4.0],
//!         spectrum: vec![10.0, 20.0, 30.0, 40.0],
//!         pga: 54,
//!     }],
//! });
//!
//! assert_eq!(payload.series(SeriesKind::Cma, 0), Some(&[5.0, 10.0, 15.0, 20.0][..]));
//! ```

pub mod protocol;
pub mod publish;
pub mod router;
pub mod signals;
pub mod source;
pub mod spectrum;

use std::panic;

use log::debug;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use protocol::{
    JsonLinesParser, MessageKind, ParseError, PositionFix, Protocol, SpanBlock, SpanSnapshot,
    UbxMessage,
};
pub use publish::{PublishQueue, PublishReason, PublishRequest, RenderSink, RenderStats, SinkError};
pub use router::{MessageRouter, RouterStats};
pub use source::{InputSource, Source, SourceConfig, SourceEvent, SourceState};
pub use spectrum::{
    AggregateState, AggregatorConfig, BlockMetadata, RenderPayload, SeriesKind,
    SpectrumAggregator, VisibilityEdge,
};

/// Default number of pending publishes kept before the oldest is dropped.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Configuration for the full-stack scope.
#[derive(Debug, Clone)]
pub struct ScopeConfig {
    /// Message source configuration.
    pub source: SourceConfig,
    /// Aggregator configuration.
    pub aggregator: AggregatorConfig,
    /// Publish queue capacity.
    pub queue_capacity: usize,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            aggregator: AggregatorConfig::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Commands delivered to the consumer task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeCommand {
    /// Show or hide the averaged traces; showing them resets the statistics.
    SetAveragesVisible(bool),
    /// Flip averaged-trace visibility.
    ToggleAverages,
    /// Reset the running statistics unconditionally.
    Reset,
}

/// Cloneable handle for steering a running [`Scope`] from other tasks.
#[derive(Debug, Clone)]
pub struct ScopeControls {
    commands: mpsc::UnboundedSender<ScopeCommand>,
}

impl ScopeControls {
    /// Show or hide the averaged traces.
    pub fn set_averages_visible(&self, visible: bool) {
        self.send(ScopeCommand::SetAveragesVisible(visible));
    }

    /// Flip averaged-trace visibility.
    pub fn toggle_averages(&self) {
        self.send(ScopeCommand::ToggleAverages);
    }

    /// Reset the running maximum and average traces.
    pub fn reset(&self) {
        self.send(ScopeCommand::Reset);
    }

    fn send(&self, command: ScopeCommand) {
        // The consumer is gone once the input is exhausted
        if self.commands.send(command).is_err() {
            debug!("Dropping {command:?}, consumer has finished");
        }
    }
}

/// Full-stack scope that wires the source, router and publish queue together.
///
/// The source reads on one task and the router consumes on another. Drive a
/// render loop over [`publish_queue`](Self::publish_queue) to display the
/// traces.
pub struct Scope {
    controls: ScopeControls,
    queue: PublishQueue,
    fixes: watch::Receiver<Option<PositionFix>>,
    cancel_token: CancellationToken,
    consumer: JoinHandle<RouterStats>,
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("queue", &self.queue)
            .field("cancel_token", &self.cancel_token)
            .finish_non_exhaustive()
    }
}

impl Scope {
    /// Spawn the source and consumer tasks. Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(config: ScopeConfig, cancel_token: CancellationToken) -> Self {
        let queue = PublishQueue::new(config.queue_capacity);
        let aggregator = SpectrumAggregator::new(&config.aggregator);
        let router = MessageRouter::new(aggregator, queue.clone());
        let fixes = router.fixes();
        let source = Source::spawn(config.source, cancel_token.child_token());

        let (commands, command_rx) = mpsc::unbounded_channel();
        let consumer = tokio::spawn(consume(
            source,
            router,
            command_rx,
            queue.clone(),
            cancel_token.clone(),
        ));

        Self {
            controls: ScopeControls { commands },
            queue,
            fixes,
            cancel_token,
            consumer,
        }
    }

    /// Handle to the publish queue for a render loop.
    #[must_use]
    pub fn publish_queue(&self) -> PublishQueue {
        self.queue.clone()
    }

    /// Handle for sending visibility and reset commands.
    #[must_use]
    pub fn controls(&self) -> ScopeControls {
        self.controls.clone()
    }

    /// Show or hide the averaged traces.
    pub fn set_averages_visible(&self, visible: bool) {
        self.controls.set_averages_visible(visible);
    }

    /// Flip averaged-trace visibility.
    pub fn toggle_averages(&self) {
        self.controls.toggle_averages();
    }

    /// Reset the running maximum and average traces.
    pub fn reset(&self) {
        self.controls.reset();
    }

    /// Latest position fix, if any has arrived.
    #[must_use]
    pub fn latest_fix(&self) -> Option<PositionFix> {
        self.fixes.borrow().clone()
    }

    /// Stop reading and consuming.
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }

    /// Wait for the consumer to finish and return its counters.
    ///
    /// A panic in the consumer (a malformed snapshot reaching the aggregator)
    /// is resumed here.
    pub async fn finished(self) -> RouterStats {
        match self.consumer.await {
            Ok(stats) => stats,
            Err(e) if e.is_panic() => panic::resume_unwind(e.into_panic()),
            Err(_) => RouterStats::default(),
        }
    }
}

/// Closes the publish queue when the consumer exits, including by panic.
struct CloseOnDrop(PublishQueue);

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        self.0.close();
    }
}

async fn consume(
    mut source: Source,
    mut router: MessageRouter,
    mut commands: mpsc::UnboundedReceiver<ScopeCommand>,
    queue: PublishQueue,
    cancel_token: CancellationToken,
) -> RouterStats {
    let _close = CloseOnDrop(queue);

    loop {
        tokio::select! {
            event = source.recv() => match event {
                Some(event) => router.handle(event),
                None => {
                    debug!("Message source finished");
                    break;
                }
            },
            Some(command) = commands.recv() => match command {
                ScopeCommand::SetAveragesVisible(visible) => {
                    router.set_averages_visible(visible);
                }
                ScopeCommand::ToggleAverages => {
                    router.toggle_averages();
                }
                ScopeCommand::Reset => router.reset(),
            },
            () = cancel_token.cancelled() => {
                debug!("Consumer cancelled");
                break;
            }
        }
    }

    router.stats()
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;
    use std::path::PathBuf;
    use std::time::Duration;

    use super::*;
    use crate::publish::run_render_loop;

    #[derive(Debug, Default)]
    struct CollectingSink(Vec<PublishRequest>);

    impl RenderSink for CollectingSink {
        fn publish(&mut self, request: &PublishRequest) -> Result<(), SinkError> {
            self.0.push(request.clone());
            Ok(())
        }
    }

    fn write_input(name: &str, lines: &[&str]) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "ubx-client-{}-{name}.jsonl",
            std::process::id()
        ));
        let mut file = std::fs::File::create(&path).unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        path
    }

    #[tokio::test]
    async fn test_scope_end_to_end() {
        let path = write_input(
            "e2e",
            &[
                r#"{"type":"MON-SPAN","blocks":[{"bin_center_freqs":[1.0,2.0],"spectrum":[10.0,20.0],"pga":50},{"bin_center_freqs":[3.0,4.0],"spectrum":[1.0,2.0],"pga":51}]}"#,
                r#"{"type":"NAV-PVT","fix_type":3,"num_sv":9}"#,
                r#"{"type":"ERROR","message":"bad checksum"}"#,
                r#"{"type":"MON-SPAN","blocks":[{"bin_center_freqs":[1.0,2.0],"spectrum":[30.0,10.0],"pga":50},{"bin_center_freqs":[3.0,4.0],"spectrum":[1.0,2.0],"pga":51}]}"#,
            ],
        );

        let cancel = CancellationToken::new();
        let scope = Scope::spawn(
            ScopeConfig {
                source: SourceConfig {
                    input: InputSource::File(path.clone()),
                    ..Default::default()
                },
                ..Default::default()
            },
            cancel.clone(),
        );
        let queue = scope.publish_queue();

        let mut sink = CollectingSink::default();
        let render = run_render_loop(queue, &mut sink, Duration::from_millis(5), cancel);
        let (stats, render_stats) = tokio::join!(scope.finished(), render);
        let _ = std::fs::remove_file(path);

        assert_eq!(stats.spectra, 2);
        assert_eq!(stats.fixes, 1);
        assert_eq!(stats.decode_errors, 1);
        assert_eq!(render_stats.unwrap().published, 2);

        let last = &sink.0.last().unwrap().payload;
        assert_eq!(last.series.len(), 8);
        assert_eq!(last.series(SeriesKind::Maxima, 0), Some(&[30.0, 20.0][..]));
        assert_eq!(last.series(SeriesKind::Cma, 0), Some(&[17.5, 10.0][..]));
    }

    #[tokio::test]
    async fn test_scope_survives_short_snapshot() {
        let path = write_input(
            "short",
            &[r#"{"type":"MON-SPAN","blocks":[{"bin_center_freqs":[1.0,2.0],"spectrum":[10.0,20.0],"pga":50}]}"#],
        );

        let scope = Scope::spawn(
            ScopeConfig {
                source: SourceConfig {
                    input: InputSource::File(path.clone()),
                    ..Default::default()
                },
                ..Default::default()
            },
            CancellationToken::new(),
        );
        let stats = scope.finished().await;
        let _ = std::fs::remove_file(path);

        assert_eq!(stats.spectra, 0);
        assert_eq!(stats.malformed, 1);
    }

    #[tokio::test]
    async fn test_scope_latest_fix_and_shutdown() {
        let path = write_input("fix", &[r#"{"type":"NAV-PVT","fix_type":3,"num_sv":7}"#]);

        let cancel = CancellationToken::new();
        let scope = Scope::spawn(
            ScopeConfig {
                source: SourceConfig {
                    input: InputSource::File(path.clone()),
                    eof_timeout: Duration::from_secs(60),
                    ..Default::default()
                },
                ..Default::default()
            },
            cancel,
        );

        let mut fixes = scope.fixes.clone();
        fixes.wait_for(Option::is_some).await.unwrap();
        assert_eq!(scope.latest_fix().map(|f| f.num_sv), Some(7));

        let queue = scope.publish_queue();
        scope.shutdown();
        let stats = scope.finished().await;
        let _ = std::fs::remove_file(path);

        assert_eq!(stats.fixes, 1);
        assert!(queue.is_closed());
    }
}
