//! Python sandbox - isolated code execution for interactive lessons
//!
//! A [`SessionController`] owns one [`ExecutionHost`] at a time. The host lazily
//! materializes an interpreter through the [`RuntimeLoader`], loads extra packages
//! detected in submitted source, and streams output back in order. A [`Watchdog`]
//! bounds initialization and every run, tearing the host down on violation.

mod config;
mod console;
mod error;
pub mod hints;
mod host;
pub mod imports;
mod limits;
mod loader;
mod runtime;
mod session;
mod types;
mod watchdog;

pub use config::{parse_duration, SandboxConfig, ENV_INIT_TIMEOUT, ENV_INTERPRETER, ENV_RUN_TIMEOUT};
pub use console::{ConsoleBuffer, ConsoleChunk, ConsoleStream};
pub use error::SandboxError;
pub use host::{ExecutionHost, HostHandle, HostRequest};
pub use imports::{Package, PackageCatalog};
pub use limits::{Timeouts, MAX_BUDGET};
pub use loader::{PackageLoad, RuntimeLoader};
pub use runtime::{Interpreter, OutputSink, PythonProcessRuntime, RunOutcome, Runtime};
pub use session::{SessionController, SessionEvent, SessionState, SourceSlot};
pub use types::{FaultKind, HostEvent, RunId, RunRequest, RunResult};
pub use watchdog::{WatchPhase, Watchdog, WatchdogStats};

/// Result alias used across the sandbox
pub type Result<T> = std::result::Result<T, SandboxError>;
