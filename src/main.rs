//! termux-agent - interactive terminal agent
//!
//! Runs a REPL, or answers a single query passed on the command line.

use std::process::ExitCode;

use clap::Parser;
use termux_agent::agent::Agent;
use termux_agent::cli::{self, Args};
use termux_agent::config::{resolve_config_path, FileConfig, SessionConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Logs go to stderr so stdout carries only model output.
    let default_filter = if args.verbose {
        "termux_agent=debug"
    } else {
        "termux_agent=warn"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let path = resolve_config_path(args.config.clone())?;
    let mut file = FileConfig::load(&path)?;
    if args.no_stream {
        file.streaming = false;
    }
    if let Some(max) = args.max_iterations {
        file.max_iterations = max;
    }

    let query = args.one_shot_query();
    let session = SessionConfig::resolve(&file, args.backend(), query.is_none())?;
    tracing::debug!(config = %path.display(), model = %session.model, "Configuration loaded");

    let mut agent = Agent::from_session(&session)?;

    match query {
        Some(query) => cli::run_once(&mut agent, &query).await,
        None => {
            eprintln!("Using {} ({})", session.backend, session.model);
            cli::run_repl(&mut agent).await
        }
    }
}
