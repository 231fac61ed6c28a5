//! CLI entry point for the expediente tool.

use std::io::{self, IsTerminal};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use expediente_core::{
    DetectionOutcome, Pipeline, RepairOutcome, RunOutcome, RunRequest, RunSummary, Settings,
};
use tracing::{debug, info, warn};

mod app_config;
mod cli;
mod progress_ui;

use cli::{Cli, Command};
use progress_ui::SpinnerSink;

/// Process exit outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProcessExit {
    Success,
    /// Some sections or records failed.
    Partial,
    Failure,
}

impl From<ProcessExit> for ExitCode {
    fn from(value: ProcessExit) -> Self {
        match value {
            ProcessExit::Success => ExitCode::SUCCESS,
            ProcessExit::Failure => ExitCode::from(1),
            ProcessExit::Partial => ExitCode::from(2),
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let cli = Cli::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    init_tracing(default_level);
    debug!(?cli, "CLI arguments parsed");

    let settings = resolve_settings(&cli)?;
    debug!(?settings, "settings resolved");
    let pipeline = Pipeline::new(settings).context("Failed to initialize pipeline")?;

    let sink = if should_use_spinner(io::stderr().is_terminal(), cli.quiet) {
        SpinnerSink::new()
    } else {
        SpinnerSink::hidden()
    };

    let exit = match &cli.command {
        Command::Detect(args) => {
            let outcome = pipeline.detect(&args.project_id, &sink).await?;
            sink.finish();
            match outcome {
                DetectionOutcome::Unreachable => ProcessExit::Failure,
                DetectionOutcome::NoneFound | DetectionOutcome::Found { .. } => {
                    ProcessExit::Success
                }
            }
        }
        Command::Run(args) => {
            let mut request = RunRequest::project(&args.project_id);
            request.section.clone_from(&args.section);
            request.target_id.clone_from(&args.target_id);
            match pipeline.run(&request, &sink).await? {
                RunOutcome::Completed(summary) => {
                    info!(project = %summary.project_id, "{summary}");
                    exit_for_summary(&summary)
                }
                RunOutcome::AlreadyRunning => {
                    sink.finish();
                    warn!(project = %args.project_id, "project is already running");
                    ProcessExit::Failure
                }
            }
        }
        Command::Retry(args) => {
            let outcome = pipeline
                .repair_item(&args.project_id, &args.section, &args.address, &sink)
                .await?;
            sink.finish();
            match outcome {
                RepairOutcome::Repaired { ruta } => {
                    info!(path = %ruta, "record downloaded again");
                    ProcessExit::Success
                }
                RepairOutcome::Failed => {
                    warn!(address = %args.address, "record download failed again");
                    ProcessExit::Failure
                }
                RepairOutcome::AlreadyRunning => {
                    warn!(project = %args.project_id, "project is already running");
                    ProcessExit::Failure
                }
            }
        }
    };

    Ok(exit.into())
}

fn init_tracing(default_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(filter)
        .try_init();
}

/// Defaults, then the config file, then command-line flags.
fn resolve_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = Settings::default();
    if let Some(file_config) = app_config::load_file_config(cli.config.as_deref())? {
        file_config.apply(&mut settings);
    }
    if let Some(base_dir) = &cli.base_dir {
        settings.base_dir.clone_from(base_dir);
    }
    if let Command::Run(args) = &cli.command {
        if let Some(concurrency) = args.concurrency {
            settings.concurrency = usize::from(concurrency);
        }
        if let Some(concurrency) = args.attachment_concurrency {
            settings.attachment_concurrency = usize::from(concurrency);
        }
    }
    Ok(settings)
}

fn should_use_spinner(stderr_is_terminal: bool, quiet: bool) -> bool {
    let dumb_terminal = std::env::var("TERM")
        .map(|value| value.eq_ignore_ascii_case("dumb"))
        .unwrap_or(false);
    stderr_is_terminal && !quiet && !dumb_terminal
}

fn exit_for_summary(summary: &RunSummary) -> ProcessExit {
    let failed = summary
        .sections
        .iter()
        .filter(|s| s.error.is_some() || s.fallidos > 0)
        .count();
    if failed == 0 {
        ProcessExit::Success
    } else if failed < summary.sections.len() {
        ProcessExit::Partial
    } else {
        ProcessExit::Failure
    }
}
