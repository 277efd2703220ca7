//! Line-oriented log streaming between executors and callers
//!
//! A streaming command delivers zero or more [`LogEvent::Line`] events followed
//! by exactly one [`LogEvent::Finished`]. The sink is moved into the call and
//! every clone of it is dropped before the call returns, so the receiver sees
//! the channel close right after `Finished` and nothing ever follows it.
//!
//! Lines that contain an interactive confirmation prompt are withheld from the
//! sink; the executor answers them on the process's stdin instead. To do so
//! stdin stays open for the whole run, so a command that reads stdin until
//! EOF (`cat`, `tee`) never finishes under the default responder. Use
//! [`PromptResponder::none`] for such commands: stdin is then closed right
//! after any elevation secret, as in buffered execution.

use std::collections::VecDeque;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::ExecError;
use crate::result::CommandResult;

/// Default capacity of channels created by [`log_channel`]
pub const DEFAULT_LOG_CAPACITY: usize = 256;

/// Number of trailing stderr lines kept for error reporting
const STDERR_TAIL_LINES: usize = 20;

const READ_BUFFER_SIZE: usize = 8192;

/// One line of command output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Line content without the trailing newline
    pub message: String,
    /// Whether the line came from stderr
    pub is_error: bool,
}

impl LogEntry {
    /// stdout line
    pub fn stdout(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            is_error: false,
        }
    }

    /// stderr line
    pub fn stderr(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            is_error: true,
        }
    }
}

/// Terminal event of a stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSummary {
    /// Whether the command exited zero
    pub success: bool,
    /// Exit status, if the command ran far enough to report one
    pub exit_status: Option<i32>,
    /// Human readable completion message
    pub message: String,
}

impl StreamSummary {
    /// Summarize the outcome of a streaming command
    pub fn from_outcome(outcome: &Result<CommandResult, ExecError>) -> Self {
        match outcome {
            Ok(result) if result.success() => Self {
                success: true,
                exit_status: Some(result.status),
                message: "command succeeded".to_string(),
            },
            Ok(result) => Self {
                success: false,
                exit_status: Some(result.status),
                message: format!("command failed with exit status {}", result.status),
            },
            Err(e) => Self {
                success: false,
                exit_status: None,
                message: format!("command failed: {e}"),
            },
        }
    }
}

/// Event delivered to a log sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogEvent {
    /// A line of output
    Line(LogEntry),
    /// The command finished; always the last event
    Finished(StreamSummary),
}

/// Sending half of a log stream
pub type LogSink = mpsc::Sender<LogEvent>;

/// Receiving half of a log stream
pub type LogStream = mpsc::Receiver<LogEvent>;

/// Create a bounded log channel
pub fn log_channel(capacity: usize) -> (LogSink, LogStream) {
    mpsc::channel(capacity.max(1))
}

/// Detects interactive confirmation prompts and supplies the reply
#[derive(Debug, Clone)]
pub struct PromptResponder {
    markers: Vec<String>,
    reply: Vec<u8>,
}

impl PromptResponder {
    /// Responder with custom markers and reply bytes
    pub fn new(markers: Vec<String>, reply: impl Into<Vec<u8>>) -> Self {
        Self {
            markers,
            reply: reply.into(),
        }
    }

    /// Responder that never answers; streaming closes stdin up front
    pub fn none() -> Self {
        Self::new(Vec::new(), Vec::new())
    }

    /// Whether any prompt can be answered, i.e. stdin must stay open
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !self.markers.is_empty()
    }

    /// Whether `text` contains a prompt marker
    #[must_use]
    pub fn is_prompt(&self, text: &str) -> bool {
        self.markers.iter().any(|m| text.contains(m.as_str()))
    }

    /// Bytes written to stdin when a prompt is seen
    pub fn reply(&self) -> &[u8] {
        &self.reply
    }
}

impl Default for PromptResponder {
    fn default() -> Self {
        Self::new(
            ["[yes/no]", "(yes/no)", "[y/N]", "[Y/n]"]
                .iter()
                .map(ToString::to_string)
                .collect(),
            b"yes\n".to_vec(),
        )
    }
}

/// Reassembles arbitrary byte chunks into lines
#[derive(Debug, Default)]
pub(crate) struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    /// Feed a chunk, returning every line it completes
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\n' {
                lines.push(decode_line(&self.pending));
                self.pending.clear();
            } else {
                self.pending.push(byte);
            }
        }
        lines
    }

    /// Bytes received after the last newline
    pub(crate) fn pending(&self) -> &[u8] {
        &self.pending
    }

    pub(crate) fn clear_pending(&mut self) {
        self.pending.clear();
    }

    /// Flush an unterminated final line
    pub(crate) fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            let line = decode_line(&self.pending);
            self.pending.clear();
            Some(line)
        }
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// One output reader: splits a byte stream into lines and delivers them
pub(crate) struct LineForwarder {
    splitter: LineSplitter,
    is_error: bool,
    sink: LogSink,
    sink_open: bool,
    responder: Arc<PromptResponder>,
    prompts: mpsc::UnboundedSender<()>,
    tail: VecDeque<String>,
}

impl LineForwarder {
    /// Forwarder for one output stream
    ///
    /// Every detected prompt produces one `()` on `prompts`; the owner of the
    /// process's stdin answers it.
    pub(crate) fn new(
        is_error: bool,
        sink: LogSink,
        responder: Arc<PromptResponder>,
        prompts: mpsc::UnboundedSender<()>,
    ) -> Self {
        Self {
            splitter: LineSplitter::default(),
            is_error,
            sink,
            sink_open: true,
            responder,
            prompts,
            tail: VecDeque::new(),
        }
    }

    pub(crate) async fn push(&mut self, chunk: &[u8]) {
        for line in self.splitter.push(chunk) {
            self.deliver(line).await;
        }

        // prompts usually wait for input without a trailing newline
        if !self.splitter.pending().is_empty() {
            let partial = String::from_utf8_lossy(self.splitter.pending());
            if self.responder.is_prompt(&partial) {
                self.splitter.clear_pending();
                self.request_reply();
            }
        }
    }

    /// Flush the final line and return the retained stderr tail
    pub(crate) async fn finish(mut self) -> String {
        if let Some(line) = self.splitter.finish() {
            self.deliver(line).await;
        }
        Vec::from(self.tail).join("\n")
    }

    async fn deliver(&mut self, line: String) {
        if self.responder.is_prompt(&line) {
            self.request_reply();
            return;
        }

        if self.is_error {
            if self.tail.len() == STDERR_TAIL_LINES {
                self.tail.pop_front();
            }
            self.tail.push_back(line.clone());
        }

        if self.sink_open {
            let entry = LogEntry {
                message: line,
                is_error: self.is_error,
            };
            if self.sink.send(LogEvent::Line(entry)).await.is_err() {
                // keep draining so the process is never blocked on a full pipe
                debug!("log receiver dropped, discarding further output");
                self.sink_open = false;
            }
        }
    }

    fn request_reply(&self) {
        let _ = self.prompts.send(());
    }
}

/// Drain an `AsyncRead` through a forwarder until EOF
pub(crate) async fn drain_reader<R>(mut reader: R, mut forwarder: LineForwarder) -> String
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => forwarder.push(&buf[..n]).await,
            Err(e) => {
                debug!(error = %e, "output read failed");
                break;
            }
        }
    }
    forwarder.finish().await
}

/// Drain chunks handed over by a channel pump until the pump drops its sender
pub(crate) async fn drain_chunks(
    mut chunks: mpsc::UnboundedReceiver<Vec<u8>>,
    mut forwarder: LineForwarder,
) -> String {
    while let Some(chunk) = chunks.recv().await {
        forwarder.push(&chunk).await;
    }
    forwarder.finish().await
}

/// Deliver the terminal event for a stream
pub(crate) async fn send_summary(sink: &LogSink, outcome: &Result<CommandResult, ExecError>) {
    let summary = StreamSummary::from_outcome(outcome);
    let _ = sink.send(LogEvent::Finished(summary)).await;
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use proptest::prelude::*;

    use super::*;

    fn forwarder(is_error: bool) -> (LineForwarder, LogStream, mpsc::UnboundedReceiver<()>) {
        let (sink, stream) = log_channel(64);
        let (prompt_tx, prompt_rx) = mpsc::unbounded_channel();
        let fwd = LineForwarder::new(
            is_error,
            sink,
            Arc::new(PromptResponder::default()),
            prompt_tx,
        );
        (fwd, stream, prompt_rx)
    }

    fn lines(stream: &mut LogStream) -> Vec<LogEntry> {
        let mut out = Vec::new();
        while let Ok(event) = stream.try_recv() {
            if let LogEvent::Line(entry) = event {
                out.push(entry);
            }
        }
        out
    }

    #[test]
    fn test_splitter_handles_partial_chunks() {
        let mut splitter = LineSplitter::default();
        assert!(splitter.push(b"hel").is_empty());
        assert_eq!(splitter.push(b"lo\nwor"), vec!["hello"]);
        assert_eq!(splitter.push(b"ld\r\n\n"), vec!["world", ""]);
        assert_eq!(splitter.finish(), None);
    }

    #[test]
    fn test_splitter_flushes_unterminated_line() {
        let mut splitter = LineSplitter::default();
        assert!(splitter.push(b"no newline").is_empty());
        assert_eq!(splitter.finish(), Some("no newline".to_string()));
    }

    #[test]
    fn test_splitter_lossy_utf8() {
        let mut splitter = LineSplitter::default();
        let out = splitter.push(b"ok \xff\n");
        assert_eq!(out, vec!["ok \u{fffd}"]);
    }

    #[tokio::test]
    async fn test_forwarder_tags_stderr() {
        let (mut fwd, mut stream, _prompts) = forwarder(true);
        fwd.push(b"c\n").await;
        let tail = fwd.finish().await;

        assert_eq!(lines(&mut stream), vec![LogEntry::stderr("c")]);
        assert_eq!(tail, "c");
    }

    #[tokio::test]
    async fn test_forwarder_suppresses_prompt_lines() {
        let (mut fwd, mut stream, mut prompts) = forwarder(false);
        fwd.push(b"installing\nProceed? [yes/no]\ndone\n").await;
        fwd.finish().await;

        assert_eq!(
            lines(&mut stream),
            vec![LogEntry::stdout("installing"), LogEntry::stdout("done")]
        );
        assert!(prompts.try_recv().is_ok());
        assert!(prompts.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_forwarder_answers_unterminated_prompt() {
        let (mut fwd, mut stream, mut prompts) = forwarder(false);
        fwd.push(b"Continue (yes/no)? ").await;

        assert!(prompts.try_recv().is_ok());
        fwd.push(b"ok\n").await;
        fwd.finish().await;

        assert_eq!(lines(&mut stream), vec![LogEntry::stdout("ok")]);
    }

    #[tokio::test]
    async fn test_forwarder_keeps_draining_after_receiver_drop() {
        let (mut fwd, stream, _prompts) = forwarder(false);
        drop(stream);

        let result = tokio::time::timeout(Duration::from_secs(1), async {
            for _ in 0..1000 {
                fwd.push(b"line\n").await;
            }
            fwd.finish().await
        })
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_drain_reader_until_eof() {
        let (fwd, mut stream, _prompts) = forwarder(false);
        let data: &[u8] = b"a\nb\nc";
        drain_reader(data, fwd).await;

        let got: Vec<String> = lines(&mut stream).into_iter().map(|e| e.message).collect();
        assert_eq!(got, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_summary_messages() {
        let ok = CommandResult {
            status: 0,
            stdout: String::new(),
            stderr: String::new(),
            duration: Duration::ZERO,
        };
        let failed = CommandResult { status: 3, ..ok.clone() };

        assert!(StreamSummary::from_outcome(&Ok(ok)).success);

        let summary = StreamSummary::from_outcome(&Ok(failed));
        assert!(!summary.success);
        assert_eq!(summary.exit_status, Some(3));

        let summary = StreamSummary::from_outcome(&Err(ExecError::ChannelFailed("x".into())));
        assert!(!summary.success);
        assert_eq!(summary.exit_status, None);
    }

    #[test]
    fn test_event_wire_format() {
        let line = serde_json::to_value(LogEvent::Line(LogEntry::stderr("oops"))).unwrap();
        assert_eq!(
            line,
            serde_json::json!({"type": "line", "message": "oops", "is_error": true})
        );

        let done = serde_json::to_value(LogEvent::Finished(StreamSummary {
            success: true,
            exit_status: Some(0),
            message: "command succeeded".into(),
        }))
        .unwrap();
        assert_eq!(done["type"], "finished");
        assert_eq!(done["exit_status"], 0);
    }

    proptest! {
        #[test]
        fn prop_lines_independent_of_chunking(
            lines in proptest::collection::vec("[a-z0-9 ]{0,12}", 0..8),
            cuts in proptest::collection::vec(0usize..64, 0..6),
        ) {
            let text: String = lines.iter().map(|l| format!("{l}\n")).collect();
            let bytes = text.as_bytes();

            let mut points: Vec<usize> = cuts.into_iter().map(|c| c % (bytes.len() + 1)).collect();
            points.push(0);
            points.push(bytes.len());
            points.sort_unstable();

            let mut splitter = LineSplitter::default();
            let mut got = Vec::new();
            for pair in points.windows(2) {
                got.extend(splitter.push(&bytes[pair[0]..pair[1]]));
            }
            prop_assert_eq!(splitter.finish(), None);
            prop_assert_eq!(got, lines);
        }
    }
}
