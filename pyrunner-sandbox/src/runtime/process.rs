//! Process-based runtime - a Python interpreter in a child process

use super::bootstrap::{INSTALL_MISSING_ENV, WORKER_SOURCE};
use super::{Interpreter, OutputSink, RunOutcome, Runtime};
use crate::config::SandboxConfig;
use crate::error::SandboxError;
use crate::imports::Package;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Requests written to the worker's stdin
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WorkerRequest<'a> {
    LoadPackage { name: &'a str, module: &'a str },
    Run { id: u64, source: &'a str },
}

/// Events read from the worker's protocol stream
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WorkerMessage {
    Ready { version: String },
    Stdout { text: String },
    Stderr { text: String },
    PackageLoaded { name: String },
    PackageFailed { name: String, message: String },
    Result { id: u64, text: String },
    Error { id: u64, message: String },
}

/// Process-based runtime - launches the bootstrap worker under a local Python
pub struct PythonProcessRuntime {
    interpreter: Option<PathBuf>,
    install_missing: bool,
}

impl PythonProcessRuntime {
    /// Discover `python3` (or `python`) on PATH at load time
    pub fn new() -> Self {
        Self {
            interpreter: None,
            install_missing: false,
        }
    }

    pub fn with_interpreter(path: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: Some(path.into()),
            install_missing: false,
        }
    }

    pub fn from_config(config: &SandboxConfig) -> Self {
        Self {
            interpreter: config.interpreter.clone(),
            install_missing: config.install_missing,
        }
    }

    /// Fall back to `pip install` when a requested package cannot be imported
    pub fn install_missing(mut self, enabled: bool) -> Self {
        self.install_missing = enabled;
        self
    }

    /// Resolve the interpreter executable
    pub fn resolve_interpreter(&self) -> Result<PathBuf> {
        match &self.interpreter {
            Some(path) => which::which(path).map_err(|e| {
                SandboxError::InterpreterNotFound(format!("{}: {}", path.display(), e))
            }),
            None => ["python3", "python"]
                .iter()
                .find_map(|name| which::which(name).ok())
                .ok_or_else(|| {
                    SandboxError::InterpreterNotFound(
                        "neither python3 nor python is on PATH".to_string(),
                    )
                }),
        }
    }
}

impl Default for PythonProcessRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Runtime for PythonProcessRuntime {
    async fn load(&self, sink: OutputSink) -> Result<Box<dyn Interpreter>> {
        let program = self.resolve_interpreter()?;
        info!(interpreter = %program.display(), "Starting Python worker");

        let mut child = Command::new(&program)
            .arg("-u")
            .arg("-c")
            .arg(WORKER_SOURCE)
            .env("PYTHONIOENCODING", "utf-8")
            .env(INSTALL_MISSING_ENV, if self.install_missing { "1" } else { "0" })
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(SandboxError::Spawn)?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SandboxError::Protocol("worker stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SandboxError::Protocol("worker stdout unavailable".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SandboxError::Protocol("worker stderr unavailable".to_string()))?;

        let (reply_tx, mut replies) = mpsc::unbounded_channel();
        let tasks = vec![
            tokio::spawn(read_protocol(stdout, sink, reply_tx)),
            tokio::spawn(drain_diagnostics(stderr)),
        ];

        let version = match replies.recv().await {
            Some(WorkerMessage::Ready { version }) => version,
            Some(other) => {
                return Err(SandboxError::Protocol(format!(
                    "expected ready, got {:?}",
                    other
                )))
            }
            None => return Err(SandboxError::WorkerExited(exit_description(&mut child).await)),
        };

        info!(pid = ?child.id(), version = %version, "Python worker ready");

        Ok(Box::new(PythonProcess {
            child,
            stdin,
            replies,
            tasks,
            next_id: 0,
        }))
    }

    fn name(&self) -> &str {
        "python-process"
    }
}

/// Forward stream output to the sink; everything else is a reply
async fn read_protocol(
    stdout: ChildStdout,
    sink: OutputSink,
    replies: mpsc::UnboundedSender<WorkerMessage>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Failed to read worker protocol stream");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<WorkerMessage>(&line) {
            Ok(WorkerMessage::Stdout { text }) => sink.stdout(text),
            Ok(WorkerMessage::Stderr { text }) => sink.stderr(text),
            Ok(message) => {
                if replies.send(message).is_err() {
                    break;
                }
            }
            Err(e) => warn!(error = %e, line = %line, "Discarding malformed worker message"),
        }
    }
    debug!("Worker protocol stream closed");
}

/// The worker's real stderr only carries interpreter diagnostics
async fn drain_diagnostics(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "pyrunner::worker", "{}", line);
    }
}

async fn exit_description(child: &mut Child) -> String {
    match tokio::time::timeout(Duration::from_millis(500), child.wait()).await {
        Ok(Ok(status)) => format!("worker exited with {}", status),
        Ok(Err(e)) => format!("failed to wait for worker: {}", e),
        Err(_) => "worker closed its protocol stream".to_string(),
    }
}

/// A running worker process
struct PythonProcess {
    child: Child,
    stdin: ChildStdin,
    replies: mpsc::UnboundedReceiver<WorkerMessage>,
    tasks: Vec<JoinHandle<()>>,
    next_id: u64,
}

impl PythonProcess {
    async fn send(&mut self, request: &WorkerRequest<'_>) -> Result<()> {
        let mut line = serde_json::to_string(request)?;
        line.push('\n');
        debug!(bytes = line.len(), "Sending worker request");

        let broken = |e: std::io::Error| {
            SandboxError::WorkerExited(format!("failed to write request: {}", e))
        };
        self.stdin.write_all(line.as_bytes()).await.map_err(broken)?;
        self.stdin.flush().await.map_err(broken)
    }

    async fn closed(&mut self) -> SandboxError {
        SandboxError::WorkerExited(exit_description(&mut self.child).await)
    }
}

#[async_trait]
impl Interpreter for PythonProcess {
    async fn load_package(&mut self, package: &Package) -> Result<()> {
        self.send(&WorkerRequest::LoadPackage {
            name: &package.name,
            module: &package.module,
        })
        .await?;

        loop {
            match self.replies.recv().await {
                Some(WorkerMessage::PackageLoaded { name }) if name == package.name => {
                    return Ok(())
                }
                Some(WorkerMessage::PackageFailed { name, message }) if name == package.name => {
                    return Err(SandboxError::PackageLoad {
                        name,
                        reason: message,
                    })
                }
                Some(other) => debug!(?other, "Ignoring unexpected worker message"),
                None => return Err(self.closed().await),
            }
        }
    }

    async fn run(&mut self, source: &str) -> Result<RunOutcome> {
        self.next_id += 1;
        let id = self.next_id;
        self.send(&WorkerRequest::Run { id, source }).await?;

        loop {
            match self.replies.recv().await {
                Some(WorkerMessage::Result { id: got, text }) if got == id => {
                    return Ok(RunOutcome::Value(text))
                }
                Some(WorkerMessage::Error { id: got, message }) if got == id => {
                    return Ok(RunOutcome::Error(message))
                }
                Some(other) => debug!(?other, "Ignoring stale worker message"),
                None => return Err(self.closed().await),
            }
        }
    }
}

impl Drop for PythonProcess {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
        let _ = self.child.start_kill();
    }
}
