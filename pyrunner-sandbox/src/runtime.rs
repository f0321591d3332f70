//! Runtime trait and implementations

mod bootstrap;
mod process;

use crate::imports::Package;
use crate::types::{HostEvent, RunResult};
use crate::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

pub use process::PythonProcessRuntime;

/// Outcome of executing source on a loaded interpreter.
///
/// Script faults are expected outcomes and come back as `Error`; an `Err` from
/// [`Interpreter::run`] means the interpreter itself is gone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Text of the final expression value (empty if none)
    Value(String),
    /// Raw fault message from the interpreter
    Error(String),
}

/// Where an interpreter's stdout/stderr go as they are produced
#[derive(Debug, Clone)]
pub struct OutputSink {
    tx: mpsc::UnboundedSender<HostEvent>,
}

impl OutputSink {
    pub fn new(tx: mpsc::UnboundedSender<HostEvent>) -> Self {
        Self { tx }
    }

    /// A sink plus the receiving end, mostly useful in tests
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<HostEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn stdout(&self, text: impl Into<String>) {
        self.emit(HostEvent::Output(RunResult::stdout(text)));
    }

    pub fn stderr(&self, text: impl Into<String>) {
        self.emit(HostEvent::Output(RunResult::stderr(text)));
    }

    pub(crate) fn emit(&self, event: HostEvent) {
        // The receiver only disappears when the host is torn down
        let _ = self.tx.send(event);
    }
}

/// Runtime abstraction: materializes an interpreter instance
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Load a fresh interpreter whose output streams are wired to `sink`
    async fn load(&self, sink: OutputSink) -> Result<Box<dyn Interpreter>>;

    /// Get runtime name
    fn name(&self) -> &str;
}

/// A loaded interpreter owned by exactly one execution host
#[async_trait]
pub trait Interpreter: Send {
    /// Make `package` importable. Errors are package faults, not host faults.
    async fn load_package(&mut self, package: &Package) -> Result<()>;

    /// Execute `source`, streaming output through the sink given at load time
    async fn run(&mut self, source: &str) -> Result<RunOutcome>;
}
