//! scribe - Run speech-to-text jobs in isolated worker processes
//!
//! Entry point for the scribe CLI application.

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use scribe::cli::{commands, Cli, Commands};
use scribe::config::Settings;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration only for runtime commands
    let settings = match cli.command {
        Commands::Completions { .. } => None,
        _ => Some(Settings::load()?),
    };

    // Logs go to stderr; a worker's stdout carries its events
    let default_level = match &settings {
        Some(settings) => settings.log_directive(cli.verbose),
        None if cli.verbose => "debug",
        None => "info",
    };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let Some(settings) = settings else {
        if let Commands::Completions { shell } = cli.command {
            scribe::cli::completions::print(shell);
        }
        return Ok(());
    };

    match cli.command {
        Commands::Submit(args) => commands::submit(&settings, args).await?,
        Commands::Jobs => commands::list_jobs(&settings).await?,
        Commands::StopAll => commands::stop_all(&settings).await?,
        Commands::Watch => commands::watch(&settings).await?,
        Commands::Models => commands::list_models(&settings)?,
        Commands::Archive { limit } => commands::list_archive(&settings, limit)?,
        Commands::Daemon(daemon_cmd) => {
            commands::daemon_command(&settings, daemon_cmd).await?;
        }
        Commands::Config(config_cmd) => {
            commands::config_command(&settings, config_cmd)?;
        }
        Commands::Worker => {
            tokio::task::spawn_blocking(move || scribe::worker::run_stdio(&settings))
                .await
                .context("Worker thread failed")?
                .context("Failed to report worker events")?;
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}
