//! Core types exchanged between the session controller and the execution host

use crate::imports::{Package, PackageCatalog};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Unique run identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub uuid::Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One execution attempt
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub id: RunId,

    /// The source to execute
    pub source: String,

    /// Packages referenced by `source`, derived by import scanning
    pub requested_packages: Vec<Package>,

    pub started_at: Instant,
}

impl RunRequest {
    /// Create a run request, scanning `source` against `catalog`
    pub fn new(source: impl Into<String>, catalog: &PackageCatalog) -> Self {
        let source = source.into();
        let requested_packages = catalog.scan(&source);
        Self {
            id: RunId::new(),
            source,
            requested_packages,
            started_at: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// One streamed outcome unit of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RunResult {
    Stdout {
        text: String,
    },
    Stderr {
        text: String,
    },
    /// Textual representation of the final expression value (empty if none)
    Value {
        text: String,
    },
    /// Interpreter-level fault raised by the submitted script
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hint: Option<String>,
    },
}

impl RunResult {
    pub fn stdout(text: impl Into<String>) -> Self {
        RunResult::Stdout { text: text.into() }
    }

    pub fn stderr(text: impl Into<String>) -> Self {
        RunResult::Stderr { text: text.into() }
    }

    pub fn value(text: impl Into<String>) -> Self {
        RunResult::Value { text: text.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        RunResult::Error {
            message: message.into(),
            hint: None,
        }
    }

    /// Value and error results end a run; stream chunks do not
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunResult::Value { .. } | RunResult::Error { .. })
    }
}

/// Failures of the sandbox itself, as opposed to faults in the user's script
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaultKind {
    /// The interpreter could not be materialized; nothing can proceed
    Startup,
    /// A requested package failed to load; the run continues
    Package,
    /// The worker died or broke protocol mid-run
    Worker,
}

/// Everything the execution host posts back, in emission order
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    Ready,
    Status {
        message: String,
    },
    /// Streamed stdout/stderr chunk
    Output(RunResult),
    /// Terminal value or script error for a run
    Finished {
        run_id: RunId,
        result: RunResult,
        elapsed: Duration,
    },
    Fault {
        kind: FaultKind,
        message: String,
    },
}
