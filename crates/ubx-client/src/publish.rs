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

//! Scheduled publishing of render payloads.
//!
//! The consumer never renders. It schedules a publish request on a bounded
//! [`PublishQueue`], and a render loop drains the queue once per frame tick
//! and hands each request to a [`RenderSink`]. When the renderer falls
//! behind, the oldest pending requests are dropped.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, warn};
use serde::Serialize;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::spectrum::RenderPayload;

/// Errors raised by render sinks.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Why a publish was scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishReason {
    /// A new snapshot was aggregated.
    Snapshot,
    /// The running statistics were reset.
    Reset,
}

/// One scheduled update for the render sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishRequest {
    /// Monotonic sequence number; gaps mean requests were dropped.
    pub sequence: u64,
    pub reason: PublishReason,
    pub payload: RenderPayload,
}

/// Receives payloads on the render context.
pub trait RenderSink {
    /// Replace the displayed data with this request's payload.
    fn publish(&mut self, request: &PublishRequest) -> Result<(), SinkError>;

    /// Called after each frame that published at least one request.
    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct QueueInner {
    pending: VecDeque<PublishRequest>,
    next_sequence: u64,
    dropped: u64,
    closed: bool,
}

/// Bounded publish queue with a drop-oldest policy.
///
/// Cloning yields another handle to the same queue.
#[derive(Debug, Clone)]
pub struct PublishQueue {
    inner: Arc<Mutex<QueueInner>>,
    capacity: usize,
}

impl PublishQueue {
    /// Create a queue holding at most `capacity` pending requests (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(QueueInner::default())),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Schedule a publish. Returns its sequence number, or `None` once closed.
    pub fn schedule(&self, reason: PublishReason, payload: RenderPayload) -> Option<u64> {
        let mut inner = self.lock();
        if inner.closed {
            return None;
        }

        if inner.pending.len() >= self.capacity {
            inner.pending.pop_front();
            inner.dropped += 1;
            if inner.dropped == 1 || inner.dropped % 100 == 0 {
                warn!(
                    "Renderer falling behind, {} publish requests dropped so far",
                    inner.dropped
                );
            }
        }

        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        inner.pending.push_back(PublishRequest {
            sequence,
            reason,
            payload,
        });
        Some(sequence)
    }

    /// Take every pending request, oldest first, plus whether the queue is closed.
    pub fn drain(&self) -> (Vec<PublishRequest>, bool) {
        let mut inner = self.lock();
        let batch = inner.pending.drain(..).collect();
        (batch, inner.closed)
    }

    /// Stop accepting requests. Pending ones are still drained.
    pub fn close(&self) {
        self.lock().closed = true;
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().pending.is_empty()
    }

    /// Total number of requests dropped because the queue was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Counters reported when the render loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub frames: u64,
    pub published: u64,
    pub dropped: u64,
}

/// Drain `queue` into `sink` once per `frame_interval` until the queue is
/// closed and empty, or `cancel_token` fires.
pub async fn run_render_loop<S: RenderSink>(
    queue: PublishQueue,
    sink: &mut S,
    frame_interval: Duration,
    cancel_token: CancellationToken,
) -> Result<RenderStats, SinkError> {
    let mut interval = tokio::time::interval(frame_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut stats = RenderStats::default();

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            () = cancel_token.cancelled() => {
                debug!("Render loop cancelled");
                break;
            }
        }

        let (batch, closed) = queue.drain();
        for request in &batch {
            sink.publish(request)?;
            stats.published += 1;
        }
        if !batch.is_empty() {
            sink.flush()?;
        }
        stats.frames += 1;

        if closed {
            debug!("Publish queue closed, render loop finished");
            break;
        }
    }

    stats.dropped = queue.dropped();
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spectrum::AggregateState;

    fn payload() -> RenderPayload {
        AggregateState::new(1, 2).payload()
    }

    #[derive(Debug, Default)]
    struct RecordingSink {
        sequences: Vec<u64>,
        flushes: usize,
    }

    impl RenderSink for RecordingSink {
        fn publish(&mut self, request: &PublishRequest) -> Result<(), SinkError> {
            self.sequences.push(request.sequence);
            Ok(())
        }

        fn flush(&mut self) -> Result<(), SinkError> {
            self.flushes += 1;
            Ok(())
        }
    }

    struct FailingSink;

    impl RenderSink for FailingSink {
        fn publish(&mut self, _request: &PublishRequest) -> Result<(), SinkError> {
            Err(SinkError::Io(std::io::Error::from(std::io::ErrorKind::BrokenPipe)))
        }
    }

    #[test]
    fn test_drop_oldest_when_full() {
        let queue = PublishQueue::new(3);
        for _ in 0..5 {
            queue.schedule(PublishReason::Snapshot, payload());
        }

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.dropped(), 2);

        let (batch, closed) = queue.drain();
        let sequences: Vec<u64> = batch.iter().map(|r| r.sequence).collect();
        assert_eq!(sequences, vec![2, 3, 4]);
        assert!(!closed);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_closed_queue_rejects_requests() {
        let queue = PublishQueue::new(2);
        assert_eq!(queue.schedule(PublishReason::Snapshot, payload()), Some(0));
        queue.close();
        assert_eq!(queue.schedule(PublishReason::Reset, payload()), None);

        let (batch, closed) = queue.drain();
        assert_eq!(batch.len(), 1);
        assert!(closed);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let queue = PublishQueue::new(0);
        assert_eq!(queue.capacity(), 1);
        queue.schedule(PublishReason::Snapshot, payload());
        queue.schedule(PublishReason::Snapshot, payload());
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_render_loop_drains_in_order_then_exits() {
        let queue = PublishQueue::new(8);
        for _ in 0..4 {
            queue.schedule(PublishReason::Snapshot, payload());
        }
        queue.close();

        let mut sink = RecordingSink::default();
        let stats = run_render_loop(
            queue,
            &mut sink,
            Duration::from_millis(20),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(sink.sequences, vec![0, 1, 2, 3]);
        assert_eq!(sink.flushes, 1);
        assert_eq!(stats.published, 4);
        assert_eq!(stats.dropped, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_render_loop_stops_on_cancel() {
        let queue = PublishQueue::new(8);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut sink = RecordingSink::default();
        let stats = run_render_loop(queue, &mut sink, Duration::from_millis(20), cancel)
            .await
            .unwrap();
        assert_eq!(stats.published, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_render_loop_propagates_sink_error() {
        let queue = PublishQueue::new(8);
        queue.schedule(PublishReason::Snapshot, payload());

        let result = run_render_loop(
            queue,
            &mut FailingSink,
            Duration::from_millis(20),
            CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(SinkError::Io(_))));
    }
}
