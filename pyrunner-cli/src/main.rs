mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser)]
#[command(name = "pyrunner")]
#[command(about = "Run Python snippets in a supervised sandbox")]
#[command(version)]
pub struct Cli {
    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the runtime, run one snippet and print the console
    Run {
        /// Python source file
        file: Option<PathBuf>,

        /// Run a quick-load example by name
        #[arg(short, long, conflicts_with = "file")]
        example: Option<String>,

        /// Run this source text
        #[arg(short, long, conflicts_with_all = ["file", "example"])]
        code: Option<String>,

        /// Run budget (e.g. 15s)
        #[arg(long, value_parser = parse_budget)]
        run_timeout: Option<Duration>,

        /// Initialization budget (e.g. 60s)
        #[arg(long, value_parser = parse_budget)]
        init_timeout: Option<Duration>,

        /// Configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Show which packages a source file would load
    Imports {
        file: PathBuf,

        /// Configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the effective configuration
    Config {
        /// Configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// List the quick-load examples
    Examples {
        /// Configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn parse_budget(value: &str) -> std::result::Result<Duration, String> {
    pyrunner_sandbox::parse_duration("timeout", value).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let _guard = init_tracing(cli.verbose, cli.log_file.as_deref())?;

    match cli.command {
        Commands::Run {
            file,
            example,
            code,
            run_timeout,
            init_timeout,
            config,
        } => {
            let options = commands::RunOptions {
                file,
                example,
                code,
                run_timeout,
                init_timeout,
                config,
            };
            commands::execute_run(options).await
        }
        Commands::Imports { file, config } => {
            commands::execute_imports(&file, config.as_deref()).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config { config } => {
            commands::execute_config(config.as_deref())?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Examples { config } => {
            commands::execute_examples(config.as_deref())?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Logs go to stderr (stdout carries the console) and optionally to a file
fn init_tracing(verbose: bool, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let log_level = if verbose { "debug" } else { "warn" };

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let directory = path
                .parent()
                .filter(|parent| !parent.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .with_context(|| format!("Log file path has no file name: {}", path.display()))?;
            let file_appender = tracing_appender::rolling::never(directory, name);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(true),
        )
        .with(file_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(format!(
                    "pyrunner={},pyrunner_sandbox={}",
                    log_level, log_level
                ))
            }),
        )
        .init();

    Ok(guard)
}
