//! Session controller - the lifecycle state machine for one editor
//!
//! `Idle -> Initializing -> Ready -> Running -> Ready`, with `Initializing ->
//! Failed` and `Running -> Failed` on sandbox faults, and `any -> Idle` on a
//! watchdog timeout or an explicit restart.
//!
//! The controller is an actor. A driver task owns the host, the watchdog and
//! the console buffer; [`SessionController`] handles only send commands and
//! observe. Commands are handled one at a time, in order.

use crate::config::SandboxConfig;
use crate::console::{ConsoleBuffer, ConsoleChunk, ConsoleStream};
use crate::error::SandboxError;
use crate::hints;
use crate::host::{ExecutionHost, HostHandle};
use crate::imports::PackageCatalog;
use crate::limits::Timeouts;
use crate::runtime::{PythonProcessRuntime, Runtime};
use crate::types::{FaultKind, HostEvent, RunId, RunRequest, RunResult};
use crate::watchdog::{WatchPhase, Watchdog, WatchdogStats};
use crate::Result;
use humantime_serde::re::humantime::format_duration;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch, RwLock};
use tracing::{debug, info, info_span, warn, Instrument};

const EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Initializing,
    Ready,
    Running,
    Failed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Initializing => "initializing",
            SessionState::Ready => "ready",
            SessionState::Running => "running",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Broadcast to subscribers as the driver makes progress
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(SessionState),
    /// A chunk appended to the console buffer
    Output(ConsoleChunk),
    /// The console buffer was cleared
    Cleared,
    RunStarted {
        run_id: RunId,
    },
    RunFinished {
        run_id: RunId,
        result: RunResult,
        elapsed: Duration,
    },
    TimedOut {
        phase: WatchPhase,
        budget: Duration,
    },
}

enum Command {
    Init,
    Run(String),
    RunPending,
    Reset,
    Restart,
    Dispose(oneshot::Sender<()>),
}

/// Writes the pending source. Handed to controls that load example snippets.
#[derive(Clone)]
pub struct SourceSlot {
    source: Arc<watch::Sender<String>>,
}

impl SourceSlot {
    pub fn set(&self, text: impl Into<String>) {
        self.source.send_replace(text.into());
    }

    pub fn get(&self) -> String {
        self.source.borrow().clone()
    }
}

/// Cloneable handle to a session driver
#[derive(Clone)]
pub struct SessionController {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SessionState>,
    stats: watch::Receiver<WatchdogStats>,
    source: Arc<watch::Sender<String>>,
    output: Arc<RwLock<ConsoleBuffer>>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionController {
    /// Start a session driver for `runtime`. Must be called inside a tokio runtime.
    pub fn new(runtime: Arc<dyn Runtime>, config: SandboxConfig) -> Result<Self> {
        config.validate()?;

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(SessionState::Idle);
        let (stats_tx, stats) = watch::channel(WatchdogStats::default());
        let source = Arc::new(watch::Sender::new(config.default_source.clone()));
        let output = Arc::new(RwLock::new(ConsoleBuffer::new()));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let session = ExecutionSession {
            runtime,
            catalog: config.catalog(),
            timeouts: config.timeouts,
            config,
            state: state_tx,
            stats: stats_tx,
            source: source.clone(),
            output: output.clone(),
            events: events.clone(),
            watchdog: Watchdog::new(),
            host: None,
            current_run: None,
        };
        tokio::spawn(session.drive(command_rx).instrument(info_span!("session")));

        Ok(Self {
            commands,
            state,
            stats,
            source,
            output,
            events,
        })
    }

    /// Session backed by a local Python process
    pub fn with_python(config: SandboxConfig) -> Result<Self> {
        let runtime = PythonProcessRuntime::from_config(&config);
        Self::new(Arc::new(runtime), config)
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| SandboxError::ControllerClosed)
    }

    /// Start the runtime. Ignored unless the session is idle.
    pub fn request_init(&self) -> Result<()> {
        self.send(Command::Init)
    }

    /// Run `source`. Ignored unless the session is ready.
    pub fn request_run(&self, source: impl Into<String>) -> Result<()> {
        self.send(Command::Run(source.into()))
    }

    /// Run the pending source
    pub fn run_pending(&self) -> Result<()> {
        self.send(Command::RunPending)
    }

    /// Clear the console. Nothing else changes.
    pub fn request_reset(&self) -> Result<()> {
        self.send(Command::Reset)
    }

    /// Tear the host down and return to idle from any state
    pub fn restart(&self) -> Result<()> {
        self.send(Command::Restart)
    }

    /// Terminate the host and stop the driver. Safe to call any number of times.
    pub async fn dispose(&self) {
        let (ack, done) = oneshot::channel();
        if self.commands.send(Command::Dispose(ack)).is_ok() {
            let _ = done.await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    pub fn set_source(&self, text: impl Into<String>) {
        self.source.send_replace(text.into());
    }

    pub fn source(&self) -> String {
        self.source.borrow().clone()
    }

    pub fn source_slot(&self) -> SourceSlot {
        SourceSlot {
            source: self.source.clone(),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Wait until the session reaches `state`
    pub async fn wait_for(&self, state: SessionState, timeout: Duration) -> Result<()> {
        self.wait_until(|current| current == state, timeout)
            .await
            .map(|_| ())
    }

    /// Wait until `predicate` holds for the session state, returning that state
    pub async fn wait_until<F>(&self, predicate: F, timeout: Duration) -> Result<SessionState>
    where
        F: Fn(SessionState) -> bool,
    {
        let mut state = self.state.clone();
        let outcome = tokio::time::timeout(timeout, state.wait_for(|current| predicate(*current)))
            .await
            .map(|waited| waited.map(|reached| *reached));
        match outcome {
            Ok(Ok(reached)) => Ok(reached),
            Ok(Err(_)) => Err(SandboxError::ControllerClosed),
            Err(_) => Err(SandboxError::WaitTimeout(*state.borrow())),
        }
    }

    pub async fn output(&self) -> Vec<ConsoleChunk> {
        self.output.read().await.chunks().to_vec()
    }

    /// Buffered chunks numbered `seq` and later, plus the sequence number to
    /// resume from. Subscribers that lag behind the event stream catch up here.
    pub async fn output_since(&self, seq: u64) -> (Vec<ConsoleChunk>, u64) {
        let output = self.output.read().await;
        (output.since(seq).to_vec(), output.next_seq())
    }

    pub async fn rendered_output(&self) -> String {
        self.output.read().await.render()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn watchdog_stats(&self) -> WatchdogStats {
        *self.stats.borrow()
    }
}

/// What woke the driver
enum Step {
    Command(Option<Command>),
    Host(Option<HostEvent>),
    Expired,
}

/// Driver-side state; everything here is touched by the driver task only
struct ExecutionSession {
    runtime: Arc<dyn Runtime>,
    config: SandboxConfig,
    catalog: PackageCatalog,
    timeouts: Timeouts,
    state: watch::Sender<SessionState>,
    stats: watch::Sender<WatchdogStats>,
    source: Arc<watch::Sender<String>>,
    output: Arc<RwLock<ConsoleBuffer>>,
    events: broadcast::Sender<SessionEvent>,
    watchdog: Watchdog,
    host: Option<HostHandle>,
    current_run: Option<RunId>,
}

async fn host_event(host: Option<&mut HostHandle>) -> Option<HostEvent> {
    match host {
        Some(host) => host.next_event().await,
        None => std::future::pending().await,
    }
}

impl ExecutionSession {
    async fn drive(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        debug!("Session driver started");
        loop {
            let step = tokio::select! {
                command = commands.recv() => Step::Command(command),
                event = host_event(self.host.as_mut()) => Step::Host(event),
                _ = self.watchdog.expired() => Step::Expired,
            };

            match step {
                Step::Command(Some(Command::Dispose(ack))) => {
                    self.shutdown();
                    let _ = ack.send(());
                    break;
                }
                Step::Command(Some(command)) => self.handle(command).await,
                Step::Command(None) => {
                    self.shutdown();
                    break;
                }
                Step::Host(Some(event)) => self.on_host_event(event).await,
                Step::Host(None) => self.on_host_gone().await,
                Step::Expired => self.on_timeout().await,
            }
            self.stats.send_replace(self.watchdog.stats());
        }
        commands.close();
        debug!("Session driver stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Init => self.init().await,
            Command::Run(source) => self.run(source).await,
            Command::RunPending => {
                let source = self.source.borrow().clone();
                self.run(source).await;
            }
            Command::Reset => self.clear().await,
            Command::Restart => self.restart().await,
            Command::Dispose(_) => {}
        }
    }

    fn current_state(&self) -> SessionState {
        *self.state.borrow()
    }

    fn set_state(&self, next: SessionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            info!(from = %previous, to = %next, "Session state changed");
            let _ = self.events.send(SessionEvent::StateChanged(next));
        }
    }

    async fn push(&self, chunk: ConsoleChunk) {
        self.output.write().await.push(chunk.clone());
        let _ = self.events.send(SessionEvent::Output(chunk));
    }

    async fn clear(&self) {
        self.output.write().await.clear();
        let _ = self.events.send(SessionEvent::Cleared);
    }

    fn terminate_host(&mut self) {
        if let Some(mut host) = self.host.take() {
            host.terminate();
        }
    }

    async fn init(&mut self) {
        let state = self.current_state();
        if state != SessionState::Idle {
            debug!(state = %state, "Ignoring init request");
            return;
        }

        self.terminate_host();
        let host = ExecutionHost::spawn(self.runtime.clone(), &self.config);
        info!(host = %host.id(), runtime = self.runtime.name(), "Initializing sandbox");
        host.initialize();
        self.host = Some(host);

        self.set_state(SessionState::Initializing);
        self.watchdog.arm(WatchPhase::Init, self.timeouts.init);
        self.push(ConsoleChunk::system("starting Python…")).await;
    }

    async fn run(&mut self, source: String) {
        let state = self.current_state();
        if state != SessionState::Ready {
            debug!(state = %state, "Ignoring run request");
            return;
        }
        let Some(host) = self.host.as_ref() else {
            debug!("Ignoring run request without a host");
            return;
        };

        let request = RunRequest::new(source, &self.catalog);
        let run_id = request.id;
        info!(run_id = %run_id, packages = request.requested_packages.len(), "Submitting run");
        host.run(request);
        self.current_run = Some(run_id);

        self.set_state(SessionState::Running);
        self.watchdog.arm(WatchPhase::Run, self.timeouts.run);
        self.clear().await;
        let _ = self.events.send(SessionEvent::RunStarted { run_id });
    }

    async fn restart(&mut self) {
        self.terminate_host();
        self.watchdog.cancel();
        self.current_run = None;
        self.set_state(SessionState::Idle);
        self.push(ConsoleChunk::system("sandbox restarted")).await;
    }

    fn shutdown(&mut self) {
        self.terminate_host();
        self.watchdog.cancel();
        self.current_run = None;
        self.stats.send_replace(self.watchdog.stats());
        info!("Session disposed");
    }

    async fn on_host_event(&mut self, event: HostEvent) {
        match event {
            HostEvent::Ready => {
                if self.current_state() != SessionState::Initializing {
                    debug!("Ignoring stale ready event");
                    return;
                }
                self.watchdog.cancel();
                self.set_state(SessionState::Ready);
                self.push(ConsoleChunk::system("Python is ready")).await;
            }
            HostEvent::Status { message } => {
                self.push(ConsoleChunk::new(ConsoleStream::Status, message))
                    .await;
            }
            HostEvent::Output(result) => {
                for chunk in ConsoleChunk::from_result(&result) {
                    self.push(chunk).await;
                }
            }
            HostEvent::Finished {
                run_id,
                result,
                elapsed,
            } => self.on_finished(run_id, result, elapsed).await,
            HostEvent::Fault { kind, message } => self.on_fault(kind, message).await,
        }
    }

    async fn on_finished(&mut self, run_id: RunId, result: RunResult, elapsed: Duration) {
        if self.current_run != Some(run_id) {
            debug!(run_id = %run_id, "Ignoring result of a stale run");
            return;
        }
        self.current_run = None;
        self.watchdog.cancel();

        let result = hints::annotate(result);
        info!(
            run_id = %run_id,
            elapsed = ?elapsed,
            failed = matches!(result, RunResult::Error { .. }),
            "Run finished"
        );
        for chunk in ConsoleChunk::from_result(&result) {
            self.push(chunk).await;
        }
        if self.current_state() == SessionState::Running {
            self.set_state(SessionState::Ready);
        }
        let _ = self.events.send(SessionEvent::RunFinished {
            run_id,
            result,
            elapsed,
        });
    }

    async fn on_fault(&mut self, kind: FaultKind, message: String) {
        match kind {
            FaultKind::Package => {
                warn!(error = %message, "Package fault");
                self.push(ConsoleChunk::system(message)).await;
            }
            FaultKind::Startup => {
                warn!(error = %message, "Sandbox failed to start");
                self.watchdog.cancel();
                self.terminate_host();
                self.push(ConsoleChunk::system(format!(
                    "failed to start Python: {}",
                    message
                )))
                .await;
                self.set_state(SessionState::Failed);
            }
            FaultKind::Worker => {
                warn!(error = %message, "Sandbox worker failed");
                self.watchdog.cancel();
                self.current_run = None;
                self.terminate_host();
                self.push(ConsoleChunk::system(format!(
                    "the sandbox stopped: {}",
                    message
                )))
                .await;
                self.set_state(SessionState::Failed);
            }
        }
    }

    async fn on_host_gone(&mut self) {
        self.host = None;
        let state = self.current_state();
        if matches!(state, SessionState::Idle | SessionState::Failed) {
            return;
        }
        warn!(state = %state, "Execution host stopped unexpectedly");
        self.watchdog.cancel();
        self.current_run = None;
        self.push(ConsoleChunk::system("the sandbox stopped unexpectedly"))
            .await;
        self.set_state(SessionState::Failed);
    }

    async fn on_timeout(&mut self) {
        let Some((phase, budget)) = self.watchdog.fire() else {
            return;
        };
        warn!(?phase, budget = ?budget, "Sandbox timed out; resetting");

        self.terminate_host();
        self.current_run = None;
        let message = match phase {
            WatchPhase::Init => format!(
                "Python did not start within {}; the sandbox was reset",
                format_duration(budget)
            ),
            WatchPhase::Run => format!(
                "run exceeded {}; the sandbox was reset",
                format_duration(budget)
            ),
        };
        self.push(ConsoleChunk::new(ConsoleStream::Timeout, message))
            .await;
        let _ = self.events.send(SessionEvent::TimedOut { phase, budget });
        self.set_state(SessionState::Idle);
    }
}

impl Drop for ExecutionSession {
    fn drop(&mut self) {
        self.terminate_host();
    }
}
