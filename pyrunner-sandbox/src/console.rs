//! Append-only console buffer rendered verbatim by the UI

use crate::types::RunResult;
use serde::{Deserialize, Serialize};

/// Which stream a console chunk came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleStream {
    Stdout,
    Stderr,
    /// Final expression value of a run
    Value,
    /// Script fault message
    Error,
    /// Advisory hint attached to a script fault
    Hint,
    /// Package loading progress
    Status,
    /// Messages from the sandbox itself (startup, faults)
    System,
    /// Watchdog diagnostics
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleChunk {
    pub stream: ConsoleStream,
    pub text: String,
}

impl ConsoleChunk {
    pub fn new(stream: ConsoleStream, text: impl Into<String>) -> Self {
        Self {
            stream,
            text: text.into(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(ConsoleStream::System, text)
    }

    /// Chunks for one run result. Empty values produce nothing.
    pub fn from_result(result: &RunResult) -> Vec<ConsoleChunk> {
        match result {
            RunResult::Stdout { text } => vec![Self::new(ConsoleStream::Stdout, text.as_str())],
            RunResult::Stderr { text } => vec![Self::new(ConsoleStream::Stderr, text.as_str())],
            RunResult::Value { text } if text.is_empty() => Vec::new(),
            RunResult::Value { text } => vec![Self::new(ConsoleStream::Value, text.as_str())],
            RunResult::Error { message, hint } => {
                let mut chunks = vec![Self::new(ConsoleStream::Error, message.as_str())];
                if let Some(hint) = hint {
                    chunks.push(Self::new(ConsoleStream::Hint, hint.as_str()));
                }
                chunks
            }
        }
    }

    /// Text as it appears in the console. Stream output is verbatim; everything
    /// else is a marked line of its own.
    pub fn render(&self) -> String {
        match self.stream {
            ConsoleStream::Stdout | ConsoleStream::Stderr => self.text.clone(),
            ConsoleStream::Value => line(&self.text),
            ConsoleStream::Error => line(&format!("[error] {}", self.text.trim_end())),
            ConsoleStream::Hint => line(&format!("[hint] {}", self.text)),
            ConsoleStream::Status => line(&format!("[status] {}", self.text)),
            ConsoleStream::System => line(&format!("[sandbox] {}", self.text)),
            ConsoleStream::Timeout => line(&format!("[timeout] {}", self.text)),
        }
    }
}

fn line(text: &str) -> String {
    if text.ends_with('\n') {
        text.to_string()
    } else {
        format!("{}\n", text)
    }
}

/// Ordered output of the current run plus sandbox messages
///
/// Every pushed chunk gets a sequence number that keeps counting across
/// clears, so readers can resume with [`ConsoleBuffer::since`].
#[derive(Debug, Clone, Default)]
pub struct ConsoleBuffer {
    chunks: Vec<ConsoleChunk>,
    first_seq: u64,
}

impl ConsoleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: ConsoleChunk) {
        self.chunks.push(chunk);
    }

    pub fn clear(&mut self) {
        self.first_seq = self.next_seq();
        self.chunks.clear();
    }

    /// Sequence number the next pushed chunk will get
    pub fn next_seq(&self) -> u64 {
        self.first_seq + self.chunks.len() as u64
    }

    /// Chunks numbered `seq` and later that are still buffered
    pub fn since(&self, seq: u64) -> &[ConsoleChunk] {
        let skip = seq.saturating_sub(self.first_seq);
        let start = usize::try_from(skip).map_or(self.chunks.len(), |n| n.min(self.chunks.len()));
        &self.chunks[start..]
    }

    pub fn chunks(&self) -> &[ConsoleChunk] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// The whole buffer as preformatted text, in arrival order
    pub fn render(&self) -> String {
        self.chunks.iter().map(ConsoleChunk::render).collect()
    }
}
