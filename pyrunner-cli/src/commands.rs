//! CLI command implementations

use anyhow::{anyhow, bail, Context, Result};
use pyrunner_sandbox::imports::imported_modules;
use pyrunner_sandbox::{RunResult, SandboxConfig, SessionController, SessionEvent, SessionState};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info};

/// Exit status of `pyrunner run`
const EXIT_SCRIPT_ERROR: u8 = 1;
const EXIT_SANDBOX_FAILURE: u8 = 2;

pub struct RunOptions {
    pub file: Option<PathBuf>,
    pub example: Option<String>,
    pub code: Option<String>,
    pub run_timeout: Option<Duration>,
    pub init_timeout: Option<Duration>,
    pub config: Option<PathBuf>,
}

/// Load the configuration from `path`, or from the default location
pub fn load_config(path: Option<&Path>) -> Result<SandboxConfig> {
    let config = match path {
        Some(path) => {
            let mut config = SandboxConfig::load_from(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?;
            config.apply_env()?;
            config.validate()?;
            config
        }
        None => SandboxConfig::load().context("Failed to load configuration")?,
    };
    Ok(config)
}

/// Source precedence: `--code`, `--example`, FILE, then the configured default
pub fn resolve_source(config: &SandboxConfig, options: &RunOptions) -> Result<String> {
    if let Some(code) = &options.code {
        return Ok(code.clone());
    }
    if let Some(name) = &options.example {
        return config
            .example(name)
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Unknown example '{}' (see `pyrunner examples`)", name));
    }
    if let Some(file) = &options.file {
        return std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read {}", file.display()));
    }
    Ok(config.default_source.clone())
}

/// Initialize a session, run one snippet and stream the console to stdout
pub async fn execute_run(options: RunOptions) -> Result<ExitCode> {
    let mut config = load_config(options.config.as_deref())?;
    if let Some(budget) = options.run_timeout {
        config.timeouts.run = budget;
    }
    if let Some(budget) = options.init_timeout {
        config.timeouts.init = budget;
    }
    config.validate()?;

    let source = resolve_source(&config, &options)?;
    let session = SessionController::with_python(config)?;
    let mut events = session.subscribe();
    let mut console = ConsoleEcho::new(std::io::stdout());

    info!("Initializing sandbox");
    session.request_init()?;
    if !wait_until_ready(&session, &mut events, &mut console).await? {
        session.dispose().await;
        return Ok(ExitCode::from(EXIT_SANDBOX_FAILURE));
    }

    session.request_run(source)?;
    let code = wait_for_run(&session, &mut events, &mut console).await?;
    session.dispose().await;
    Ok(code)
}

/// Copies the session console to a writer, chunk by chunk, in order.
/// Events only say that something changed; the console buffer is read by
/// sequence number so a lagging subscriber never skips output.
struct ConsoleEcho<W> {
    out: W,
    next_seq: u64,
}

impl<W: Write> ConsoleEcho<W> {
    fn new(out: W) -> Self {
        Self { out, next_seq: 0 }
    }

    async fn catch_up(&mut self, session: &SessionController) -> Result<()> {
        let (chunks, next_seq) = session.output_since(self.next_seq).await;
        for chunk in &chunks {
            self.out.write_all(chunk.render().as_bytes())?;
        }
        self.out.flush()?;
        self.next_seq = next_seq;
        Ok(())
    }
}

/// Next event, echoing any console output that arrived before it
async fn next_event<W: Write>(
    session: &SessionController,
    events: &mut broadcast::Receiver<SessionEvent>,
    console: &mut ConsoleEcho<W>,
) -> Result<SessionEvent> {
    loop {
        let received = events.recv().await;
        console.catch_up(session).await?;
        match received {
            Ok(event) => return Ok(event),
            Err(RecvError::Lagged(skipped)) => debug!(skipped, "Console events lagged; resynced"),
            Err(RecvError::Closed) => bail!("Session ended unexpectedly"),
        }
    }
}

/// Echo startup output; true once the runtime is ready
async fn wait_until_ready<W: Write>(
    session: &SessionController,
    events: &mut broadcast::Receiver<SessionEvent>,
    console: &mut ConsoleEcho<W>,
) -> Result<bool> {
    loop {
        match next_event(session, events, console).await? {
            SessionEvent::StateChanged(SessionState::Ready) => return Ok(true),
            SessionEvent::StateChanged(state @ (SessionState::Failed | SessionState::Idle)) => {
                debug!(state = %state, "Sandbox did not become ready");
                return Ok(false);
            }
            _ => {}
        }
    }
}

async fn wait_for_run<W: Write>(
    session: &SessionController,
    events: &mut broadcast::Receiver<SessionEvent>,
    console: &mut ConsoleEcho<W>,
) -> Result<ExitCode> {
    loop {
        match next_event(session, events, console).await? {
            SessionEvent::RunFinished {
                result: RunResult::Error { .. },
                elapsed,
                ..
            } => {
                info!(elapsed = ?elapsed, "Run failed");
                return Ok(ExitCode::from(EXIT_SCRIPT_ERROR));
            }
            SessionEvent::RunFinished { elapsed, .. } => {
                info!(elapsed = ?elapsed, "Run finished");
                return Ok(ExitCode::SUCCESS);
            }
            SessionEvent::TimedOut { .. } | SessionEvent::StateChanged(SessionState::Failed) => {
                return Ok(ExitCode::from(EXIT_SANDBOX_FAILURE));
            }
            _ => {}
        }
    }
}

/// Print the packages the import scanner would load for `file`
pub async fn execute_imports(file: &Path, config: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;
    let source = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let catalog = config.catalog();
    let modules = imported_modules(&source);
    if modules.is_empty() {
        println!("No imports found");
        return Ok(());
    }

    for module in modules {
        match catalog.resolve(&module) {
            Some(package) => println!("{:<16} -> {}", module, package.name),
            None => println!("{:<16}    (not in catalog)", module),
        }
    }
    Ok(())
}

pub fn execute_config(config: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;
    print!("{}", config.to_toml()?);
    Ok(())
}

pub fn execute_examples(config: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;
    for (name, source) in &config.examples {
        let first_line = source.lines().next().unwrap_or_default();
        println!("{:<16} {}", name, first_line);
    }
    Ok(())
}
