use crate::session::SessionState;
use thiserror::Error;

/// Errors raised by the sandbox itself.
///
/// Faults in the submitted script are not errors at this level; they travel as
/// [`crate::RunResult::Error`] values.
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Python interpreter not found: {0}")]
    InterpreterNotFound(String),

    #[error("Failed to spawn worker: {0}")]
    Spawn(std::io::Error),

    #[error("Worker protocol error: {0}")]
    Protocol(String),

    #[error("Worker exited: {0}")]
    WorkerExited(String),

    #[error("Package {name} failed to load: {reason}")]
    PackageLoad { name: String, reason: String },

    #[error("Runtime has not been loaded")]
    NotLoaded,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Session controller has shut down")]
    ControllerClosed,

    #[error("Timed out waiting for session state {0:?}")]
    WaitTimeout(SessionState),
}

