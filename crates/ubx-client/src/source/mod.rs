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

//! Background message source.
//!
//! Reads decoder output from stdin or a file on a background task, parses
//! each line, and delivers the results over a bounded channel. The source owns
//! the end-of-file policy: with a zero timeout the stream ends at the first
//! EOF, otherwise the input is polled until it stays idle for the timeout.

use std::path::PathBuf;
use std::time::Duration;

use log::{debug, error, info};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use crate::protocol::{JsonLinesParser, ParseError, Protocol, UbxMessage};

/// Longest pause between polls while waiting out the EOF timeout.
const EOF_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Where decoder output is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    Stdin,
    File(PathBuf),
}

impl std::fmt::Display for InputSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdin => f.write_str("<stdin>"),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Configuration for the message source.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Input to read.
    pub input: InputSource,
    /// How long to wait for more data after EOF. Zero ends the stream immediately.
    pub eof_timeout: Duration,
    /// Channel buffer size for parsed events.
    pub buffer_size: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            input: InputSource::Stdin,
            eof_timeout: Duration::ZERO,
            buffer_size: 256,
        }
    }
}

/// Source state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceState {
    /// Opening the input.
    Opening,
    /// Reading messages.
    Reading,
    /// Input ended and the EOF timeout expired.
    Exhausted,
    /// Reading failed.
    Error(String),
}

/// Events emitted by the source.
#[derive(Debug)]
pub enum SourceEvent {
    /// Source state changed.
    StateChanged(SourceState),
    /// A line parsed into a message.
    Message(UbxMessage),
    /// A line could not be parsed.
    ParseFailed(ParseError),
}

/// Handle to a running message source.
///
/// The reader runs on a background task. Use `recv()` to receive events; the
/// channel closes once the input is exhausted or the source is shut down.
pub struct Source {
    event_rx: mpsc::Receiver<SourceEvent>,
    cancel_token: CancellationToken,
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Source")
            .field("cancel_token", &self.cancel_token)
            .finish_non_exhaustive()
    }
}

impl Source {
    /// Spawn the reader task. Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(config: SourceConfig, cancel_token: CancellationToken) -> Self {
        let (event_tx, event_rx) = mpsc::channel(config.buffer_size);
        let task_cancel = cancel_token.clone();

        tokio::spawn(async move {
            source_task(config, event_tx, task_cancel).await;
        });

        Self {
            event_rx,
            cancel_token,
        }
    }

    /// Receive the next event.
    ///
    /// Returns `None` once the source has finished.
    pub async fn recv(&mut self) -> Option<SourceEvent> {
        self.event_rx.recv().await
    }

    /// Stop reading.
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}

impl Drop for Source {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

async fn source_task(
    config: SourceConfig,
    event_tx: mpsc::Sender<SourceEvent>,
    cancel_token: CancellationToken,
) {
    if event_tx
        .send(SourceEvent::StateChanged(SourceState::Opening))
        .await
        .is_err()
    {
        debug!("Consumer gone before {} was opened", config.input);
        return;
    }

    info!("Reading from {}", config.input);

    let reader: Box<dyn AsyncRead + Unpin + Send> = match &config.input {
        InputSource::Stdin => Box::new(tokio::io::stdin()),
        InputSource::File(path) => match tokio::fs::File::open(path).await {
            Ok(file) => Box::new(file),
            Err(e) => {
                error!("Failed to open {}: {}", path.display(), e);
                if event_tx
                    .send(SourceEvent::StateChanged(SourceState::Error(e.to_string())))
                    .await
                    .is_err()
                {
                    debug!("Consumer gone, open error not delivered");
                }
                return;
            }
        },
    };

    let final_state = read_lines(
        reader,
        JsonLinesParser::new(),
        &event_tx,
        &cancel_token,
        config.eof_timeout,
    )
    .await;

    match &final_state {
        Some(SourceState::Error(e)) => error!("Read error on {}: {}", config.input, e),
        Some(_) => info!("Input {} exhausted", config.input),
        None => debug!("Source for {} stopped", config.input),
    }

    if let Some(state) = final_state {
        if event_tx.send(SourceEvent::StateChanged(state)).await.is_err() {
            debug!("Consumer gone, final source state not delivered");
        }
    }
}

/// Read newline-delimited input, parse it and forward events.
///
/// Returns the terminal state, or `None` if cancelled or the receiver went away.
async fn read_lines<R, P>(
    reader: R,
    mut parser: P,
    event_tx: &mpsc::Sender<SourceEvent>,
    cancel_token: &CancellationToken,
    eof_timeout: Duration,
) -> Option<SourceState>
where
    R: AsyncRead + Unpin,
    P: Protocol<Message = UbxMessage, Error = ParseError>,
{
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    let mut idle_since: Option<Instant> = None;

    if event_tx
        .send(SourceEvent::StateChanged(SourceState::Reading))
        .await
        .is_err()
    {
        return None;
    }

    loop {
        let read = tokio::select! {
            result = reader.read_until(b'\n', &mut line) => result,
            () = cancel_token.cancelled() => return None,
        };

        let n = match read {
            Ok(n) => n,
            Err(e) => return Some(SourceState::Error(e.to_string())),
        };

        if n == 0 {
            // EOF: wait for more data if the policy allows it
            let since = *idle_since.get_or_insert_with(Instant::now);
            let waited = since.elapsed();
            if waited >= eof_timeout {
                if !line.is_empty() {
                    let pending = std::mem::take(&mut line);
                    if !dispatch(&mut parser, &pending, event_tx).await {
                        return None;
                    }
                }
                return Some(SourceState::Exhausted);
            }

            tokio::select! {
                () = sleep(EOF_POLL_INTERVAL.min(eof_timeout - waited)) => continue,
                () = cancel_token.cancelled() => return None,
            }
        }

        idle_since = None;

        // Keep partial lines buffered until the writer finishes them
        if line.last() != Some(&b'\n') {
            continue;
        }

        let complete = std::mem::take(&mut line);
        if !dispatch(&mut parser, &complete, event_tx).await {
            return None;
        }
    }
}

/// Parse one line and forward the result. Returns `false` if the receiver is gone.
async fn dispatch<P>(parser: &mut P, line: &[u8], event_tx: &mpsc::Sender<SourceEvent>) -> bool
where
    P: Protocol<Message = UbxMessage, Error = ParseError>,
{
    let event = match parser.parse(line) {
        Ok(Some(msg)) => SourceEvent::Message(msg),
        Ok(None) => return true,
        Err(e) => SourceEvent::ParseFailed(e),
    };

    event_tx.send(event).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageKind;
    use tokio::io::AsyncWriteExt;

    const SPAN_LINE: &str = r#"{"type":"MON-SPAN","blocks":[{"bin_center_freqs":[1.0,2.0],"spectrum":[3.0,4.0],"pga":40}]}"#;
    const PVT_LINE: &str = r#"{"type":"NAV-PVT","fix_type":3}"#;

    async fn collect(input: &[u8], eof_timeout: Duration) -> (Vec<SourceEvent>, Option<SourceState>) {
        let (tx, mut rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let state = read_lines(input, JsonLinesParser::new(), &tx, &cancel, eof_timeout).await;
        drop(tx);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (events, state)
    }

    fn message_kinds(events: &[SourceEvent]) -> Vec<MessageKind> {
        events
            .iter()
            .filter_map(|e| match e {
                SourceEvent::Message(msg) => Some(msg.kind()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_reads_messages_until_eof() {
        let input = format!("{SPAN_LINE}\n\n{PVT_LINE}\nnot json\n");
        let (events, state) = collect(input.as_bytes(), Duration::ZERO).await;

        assert_eq!(state, Some(SourceState::Exhausted));
        assert!(matches!(
            events[0],
            SourceEvent::StateChanged(SourceState::Reading)
        ));
        assert_eq!(
            message_kinds(&events),
            vec![MessageKind::Spectrum, MessageKind::Fix]
        );
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, SourceEvent::ParseFailed(_)))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_unterminated_last_line_is_parsed_at_close() {
        let input = format!("{SPAN_LINE}\n{PVT_LINE}");
        let (events, _) = collect(input.as_bytes(), Duration::ZERO).await;
        assert_eq!(
            message_kinds(&events),
            vec![MessageKind::Spectrum, MessageKind::Fix]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_line_joined_across_writes() {
        let (client, mut server) = tokio::io::duplex(4096);
        let (tx, mut rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();

        let reader = tokio::spawn(async move {
            read_lines(client, JsonLinesParser::new(), &tx, &cancel, Duration::from_secs(2)).await
        });

        // Split a line across two writes with a pause in between
        server.write_all(&SPAN_LINE.as_bytes()[..20]).await.unwrap();
        sleep(Duration::from_millis(500)).await;
        server.write_all(&SPAN_LINE.as_bytes()[20..]).await.unwrap();
        server.write_all(b"\n").await.unwrap();
        drop(server);

        let state = reader.await.unwrap();
        assert_eq!(state, Some(SourceState::Exhausted));

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert_eq!(message_kinds(&events), vec![MessageKind::Spectrum]);
    }

    #[tokio::test]
    async fn test_eof_timeout_picks_up_appended_lines() {
        use std::io::Write as _;

        let path = std::env::temp_dir().join(format!(
            "ubx-client-{}-eof-timeout.jsonl",
            std::process::id()
        ));
        std::fs::write(&path, format!("{SPAN_LINE}\n")).unwrap();

        let file = tokio::fs::File::open(&path).await.unwrap();
        let (tx, mut rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let started = Instant::now();
        let reader = tokio::spawn(async move {
            read_lines(file, JsonLinesParser::new(), &tx, &cancel, Duration::from_millis(800)).await
        });

        // The reader has hit EOF by now and is polling
        sleep(Duration::from_millis(300)).await;
        let mut appender = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(appender, "{PVT_LINE}").unwrap();
        drop(appender);

        let state = reader.await.unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(state, Some(SourceState::Exhausted));
        // Idle period restarts after the appended line
        assert!(started.elapsed() >= Duration::from_millis(1100));

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert_eq!(
            message_kinds(&events),
            vec![MessageKind::Spectrum, MessageKind::Fix]
        );
    }

    #[tokio::test]
    async fn test_cancel_stops_reader() {
        let (client, _server) = tokio::io::duplex(64);
        let (tx, _rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let state = read_lines(client, JsonLinesParser::new(), &tx, &cancel, Duration::ZERO).await;
        assert_eq!(state, None);
    }

    #[tokio::test]
    async fn test_missing_file_reports_error() {
        let mut source = Source::spawn(
            SourceConfig {
                input: InputSource::File(PathBuf::from("/nonexistent/ubx-scope/input.jsonl")),
                ..Default::default()
            },
            CancellationToken::new(),
        );

        let mut states = Vec::new();
        while let Some(event) = source.recv().await {
            if let SourceEvent::StateChanged(state) = event {
                states.push(state);
            }
        }
        assert_eq!(states[0], SourceState::Opening);
        assert!(matches!(states.last(), Some(SourceState::Error(_))));
    }
}
