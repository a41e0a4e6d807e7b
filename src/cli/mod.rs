//! Command-line interface
//!
//! `serve` runs the polling orchestrator, `migrate` applies the schema, and
//! `jobs` manages watch jobs directly against the database.

mod jobs;

pub use jobs::JobCommands;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::db::{health_check, init_pool, run_migrations};
use crate::integrations::{KeboolaTrigger, OpenAiBatchProbe};
use crate::job_coordinator::{Collaborators, JobCoordinator};
use crate::limiter::Limiter;
use crate::orchestrator::Orchestrator;
use crate::repositories::WatchJobRepository;
use crate::retry_policy::RetryPolicy;

#[derive(Parser)]
#[command(name = "batchwatch", version)]
#[command(about = "Watch OpenAI batches and trigger Keboola jobs when they finish", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run the polling orchestrator
    Serve {
        /// Process the currently due jobs once and exit
        #[arg(long)]
        once: bool,
    },
    /// Apply pending database migrations
    Migrate,
    /// Watch job management
    Jobs {
        #[command(subcommand)]
        command: JobCommands,
    },
}

/// Route a parsed command to its handler.
pub async fn handle_command(command: Commands, config: AppConfig) -> Result<()> {
    match command {
        Commands::Serve { once } => serve(config, once).await,
        Commands::Migrate => {
            let db = connect(&config).await?;
            println!("Migrations applied to {}", redact_url(&config.database_url));
            db.close().await.context("Failed to close database")?;
            Ok(())
        }
        Commands::Jobs { command } => {
            let db = connect(&config).await?;
            jobs::handle_job_command(command, db, &config).await
        }
    }
}

async fn connect(config: &AppConfig) -> Result<DatabaseConnection> {
    let db = init_pool(config).await?;
    run_migrations(&db).await?;
    Ok(db)
}

async fn serve(config: AppConfig, once: bool) -> Result<()> {
    let collaborators = Collaborators {
        probe: Arc::new(
            OpenAiBatchProbe::new(&config.openai_api_base, config.http_timeout())
                .context("Failed to build OpenAI client")?,
        ),
        probe_credentials: config.openai_credentials()?,
        trigger: Arc::new(
            KeboolaTrigger::new(config.http_timeout()).context("Failed to build Keboola client")?,
        ),
        trigger_credentials: config.keboola_credentials()?,
    };

    let db = connect(&config).await?;
    health_check(&db).await?;

    let limiter = Limiter::new(config.orchestrator.max_concurrency);
    let coordinator = Arc::new(JobCoordinator::new(
        db.clone(),
        collaborators,
        RetryPolicy::from_config(&config.retry),
        limiter,
    ));
    let jobs = WatchJobRepository::new(db).with_poll_bounds(config.poll_interval.clone());
    let orchestrator = Orchestrator::new(config.orchestrator.clone(), jobs, coordinator);

    if once {
        let stats = orchestrator.run_once().await;
        println!(
            "Processed {} due job(s), {} dispatched, {} skipped",
            stats.jobs_due, stats.jobs_dispatched, stats.jobs_skipped_in_flight
        );
        return Ok(());
    }

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        signal_token.cancel();
    });

    orchestrator.run(shutdown).await;
    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(error = %err, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("Shutdown signal received");
}

/// Strip credentials from a database URL before printing it.
fn redact_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some("***"));
            parsed.to_string()
        }
        _ => raw.to_string(),
    }
}
