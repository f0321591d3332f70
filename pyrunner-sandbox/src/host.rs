//! Execution host - the isolated worker that owns the loaded runtime
//!
//! The host runs as its own task and is driven purely by messages: requests in,
//! [`HostEvent`]s out, both in order. Nothing outside the task touches the
//! interpreter. Termination aborts the task, which drops the interpreter and
//! kills the worker process with it.

use crate::config::SandboxConfig;
use crate::imports::Package;
use crate::loader::RuntimeLoader;
use crate::runtime::{OutputSink, RunOutcome, Runtime};
use crate::types::{FaultKind, HostEvent, RunRequest, RunResult};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

/// Messages accepted by a running host
#[derive(Debug)]
pub enum HostRequest {
    Initialize,
    Run(RunRequest),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HostPhase {
    Fresh,
    Ready,
    Failed,
}

/// Task-side state of a host
pub struct ExecutionHost {
    loader: RuntimeLoader,
    sink: OutputSink,
    preload: Vec<Package>,
    phase: HostPhase,
}

impl ExecutionHost {
    /// Start a host task. Configured preload packages are loaded during initialization.
    pub fn spawn(runtime: Arc<dyn Runtime>, config: &SandboxConfig) -> HostHandle {
        Self::spawn_with_preload(runtime, config.preload_packages())
    }

    pub fn spawn_with_preload(runtime: Arc<dyn Runtime>, preload: Vec<Package>) -> HostHandle {
        let id = Uuid::new_v4();
        let (event_tx, events) = mpsc::unbounded_channel();
        let (requests, request_rx) = mpsc::unbounded_channel();
        let sink = OutputSink::new(event_tx);

        let host = ExecutionHost {
            loader: RuntimeLoader::new(runtime, sink.clone()),
            sink,
            preload,
            phase: HostPhase::Fresh,
        };
        let task = tokio::spawn(
            host.serve(request_rx)
                .instrument(info_span!("host", id = %id)),
        );
        debug!(host = %id, "Execution host spawned");

        HostHandle {
            id,
            requests,
            events,
            task: Some(task),
        }
    }

    async fn serve(mut self, mut requests: mpsc::UnboundedReceiver<HostRequest>) {
        while let Some(request) = requests.recv().await {
            match request {
                HostRequest::Initialize => self.initialize().await,
                HostRequest::Run(run) => self.run(run).await,
            }
        }
        debug!("Host request channel closed");
    }

    async fn initialize(&mut self) {
        if self.phase != HostPhase::Fresh {
            debug!(phase = ?self.phase, "Ignoring repeated initialize");
            return;
        }

        match self.loader.load_core().await {
            Ok(_) => {
                for package in std::mem::take(&mut self.preload) {
                    self.ensure_package(&package).await;
                }
                self.phase = HostPhase::Ready;
                info!("Execution host ready");
                self.sink.emit(HostEvent::Ready);
            }
            Err(e) => {
                self.phase = HostPhase::Failed;
                error!(error = %e, "Runtime failed to start");
                self.sink.emit(HostEvent::Fault {
                    kind: FaultKind::Startup,
                    message: e.to_string(),
                });
            }
        }
    }

    /// Load a package once, reporting progress. Failure is not fatal.
    async fn ensure_package(&self, package: &Package) {
        if self.loader.is_loaded(package).await {
            return;
        }

        self.status(format!("loading {}…", package.name));
        match self.loader.load_package(package).await {
            Ok(_) => self.status(format!("{} ready", package.name)),
            Err(e) => {
                self.status(format!("{} failed to load", package.name));
                self.sink.emit(HostEvent::Fault {
                    kind: FaultKind::Package,
                    message: e.to_string(),
                });
            }
        }
    }

    async fn run(&mut self, request: RunRequest) {
        if self.phase != HostPhase::Ready {
            debug!(run_id = %request.id, phase = ?self.phase, "Run rejected");
            self.sink.emit(HostEvent::Finished {
                run_id: request.id,
                result: RunResult::error("sandbox is not ready"),
                elapsed: request.elapsed(),
            });
            return;
        }

        info!(
            run_id = %request.id,
            code_len = request.source.len(),
            packages = request.requested_packages.len(),
            "Running source"
        );

        for package in &request.requested_packages {
            self.ensure_package(package).await;
        }

        let result = match self.loader.run(&request.source).await {
            Ok(RunOutcome::Value(text)) => RunResult::Value { text },
            Ok(RunOutcome::Error(message)) => RunResult::Error {
                message,
                hint: None,
            },
            Err(e) => {
                self.phase = HostPhase::Failed;
                error!(run_id = %request.id, error = %e, "Worker failed during run");
                self.sink.emit(HostEvent::Finished {
                    run_id: request.id,
                    result: RunResult::error(format!("the sandbox worker stopped: {}", e)),
                    elapsed: request.elapsed(),
                });
                self.sink.emit(HostEvent::Fault {
                    kind: FaultKind::Worker,
                    message: e.to_string(),
                });
                return;
            }
        };

        debug!(run_id = %request.id, elapsed = ?request.elapsed(), "Run finished");
        self.sink.emit(HostEvent::Finished {
            run_id: request.id,
            result,
            elapsed: request.elapsed(),
        });
    }

    fn status(&self, message: String) {
        self.sink.emit(HostEvent::Status { message });
    }
}

/// Controller-side handle to a host task
pub struct HostHandle {
    id: Uuid,
    requests: mpsc::UnboundedSender<HostRequest>,
    events: mpsc::UnboundedReceiver<HostEvent>,
    task: Option<JoinHandle<()>>,
}

impl HostHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Ask the host to materialize its runtime. Idempotent on the host side.
    pub fn initialize(&self) -> bool {
        self.send(HostRequest::Initialize)
    }

    /// Submit a run. The host answers with exactly one `Finished` or a worker fault.
    pub fn run(&self, request: RunRequest) -> bool {
        self.send(HostRequest::Run(request))
    }

    fn send(&self, request: HostRequest) -> bool {
        if self.task.is_none() {
            return false;
        }
        self.requests.send(request).is_ok()
    }

    /// Next event in emission order; `None` once the host is gone
    pub async fn next_event(&mut self) -> Option<HostEvent> {
        self.events.recv().await
    }

    /// Stop the worker unconditionally. Safe to call repeatedly.
    pub fn terminate(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            self.events.close();
            info!(host = %self.id, "Execution host terminated");
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.task.is_none()
    }
}

impl Drop for HostHandle {
    fn drop(&mut self) {
        self.terminate();
    }
}
