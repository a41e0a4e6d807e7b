//! Watch job command handlers

use anyhow::{Context, Result};
use clap::Subcommand;
use sea_orm::DatabaseConnection;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::integrations::TriggerTarget;
use crate::models::check_log::Model as CheckLogModel;
use crate::models::watch_job::{JobStatus, Model as WatchJobModel};
use crate::repositories::{
    CheckLogRepository, NewWatchJob, WatchJobDetails, WatchJobRepository, WatchJobUpdate,
};

/// Watch job subcommands
#[derive(Subcommand)]
pub enum JobCommands {
    /// Create a watch job for 1-10 remote batches
    Create {
        #[arg(long)]
        name: String,
        /// Keboola stack base URL
        #[arg(long)]
        stack_url: String,
        #[arg(long)]
        component_id: String,
        #[arg(long)]
        configuration_id: String,
        /// Seconds between checks (defaults to the configured value)
        #[arg(long)]
        poll_interval: Option<u32>,
        /// Remote batch id; repeat for each batch
        #[arg(long = "batch", required = true)]
        batch_ids: Vec<String>,
    },
    /// List watch jobs, newest first
    List {
        /// Only jobs in this status
        #[arg(long)]
        status: Option<JobStatus>,
        #[arg(long, default_value_t = 50)]
        limit: u64,
        #[arg(long, default_value_t = 0)]
        offset: u64,
    },
    /// Show a job with its batches
    Show { id: Uuid },
    /// Change the name, target, or poll interval of a job
    Update {
        id: Uuid,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        stack_url: Option<String>,
        #[arg(long)]
        component_id: Option<String>,
        #[arg(long)]
        configuration_id: Option<String>,
        #[arg(long)]
        poll_interval: Option<u32>,
    },
    /// Stop scheduling an active job
    Pause { id: Uuid },
    /// Reactivate a paused job; it is checked on the next tick
    Resume { id: Uuid },
    /// Delete a job with its batches and logs
    Delete { id: Uuid },
    /// Show the check history of a job, newest first
    Logs {
        id: Uuid,
        #[arg(long, default_value_t = 50)]
        limit: u64,
    },
    /// System-wide counters
    Stats,
    /// Delete finished jobs older than the given number of days
    Purge {
        #[arg(long, default_value_t = 30)]
        older_than_days: u32,
    },
}

/// Handle watch job commands
pub async fn handle_job_command(
    command: JobCommands,
    db: DatabaseConnection,
    config: &AppConfig,
) -> Result<()> {
    let jobs = WatchJobRepository::new(db.clone()).with_poll_bounds(config.poll_interval.clone());
    let logs = CheckLogRepository::new(db);

    match command {
        JobCommands::Create {
            name,
            stack_url,
            component_id,
            configuration_id,
            poll_interval,
            batch_ids,
        } => {
            let details = jobs
                .create(NewWatchJob {
                    name,
                    target: TriggerTarget {
                        stack_url,
                        component_id,
                        configuration_id,
                        tag: None,
                    },
                    poll_interval_seconds: poll_interval,
                    batch_ids,
                })
                .await
                .context("Failed to create watch job")?;
            println!("Created watch job {}", details.job.id);
            print_details(&details);
        }
        JobCommands::List {
            status,
            limit,
            offset,
        } => {
            let found = jobs.list(status, limit, offset).await?;
            if found.is_empty() {
                println!("No watch jobs found.");
            } else {
                println!("Found {} watch job(s):", found.len());
                for job in &found {
                    print_summary(job);
                }
            }
        }
        JobCommands::Show { id } => {
            let details = jobs.find_with_batches(id).await?;
            print_details(&details);
        }
        JobCommands::Update {
            id,
            name,
            stack_url,
            component_id,
            configuration_id,
            poll_interval,
        } => {
            let job = jobs
                .update(
                    id,
                    WatchJobUpdate {
                        name,
                        stack_url,
                        component_id,
                        configuration_id,
                        poll_interval_seconds: poll_interval,
                    },
                )
                .await?;
            println!("Updated watch job {}", job.id);
            print_summary(&job);
        }
        JobCommands::Pause { id } => {
            let job = jobs.pause(id).await?;
            println!("Paused watch job {} ({})", job.id, job.name);
        }
        JobCommands::Resume { id } => {
            let job = jobs.resume(id).await?;
            println!("Resumed watch job {} ({})", job.id, job.name);
        }
        JobCommands::Delete { id } => {
            jobs.delete(id).await?;
            println!("Deleted watch job {id}");
        }
        JobCommands::Logs { id, limit } => {
            // Fail with NotFound rather than printing an empty history
            jobs.find_with_batches(id).await?;
            let entries = logs.list_for_job(id, limit).await?;
            if entries.is_empty() {
                println!("No check logs for job {id}.");
            }
            for entry in &entries {
                print_log(entry);
            }
        }
        JobCommands::Stats => {
            let stats = jobs.stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        JobCommands::Purge { older_than_days } => {
            let purged = jobs.purge_finished(older_than_days).await?;
            println!("Purged {purged} finished watch job(s) older than {older_than_days} day(s)");
        }
    }

    Ok(())
}

fn print_summary(job: &WatchJobModel) {
    let next = job
        .next_check_at
        .map(|at| at.to_rfc3339())
        .unwrap_or_else(|| "-".to_string());
    println!(
        "  {}  {:<24} {:<24} every {}s  next: {}",
        job.id, job.status, job.name, job.poll_interval_seconds, next
    );
}

fn print_details(details: &WatchJobDetails) {
    let job = &details.job;
    println!("Job:        {} ({})", job.name, job.id);
    println!("Status:     {}", job.status);
    println!(
        "Target:     {} / {} / {}",
        job.target_stack_url, job.target_component_id, job.target_configuration_id
    );
    println!("Interval:   {}s", job.poll_interval_seconds);
    println!("Created:    {}", job.created_at.to_rfc3339());
    if let Some(at) = job.last_check_at {
        println!("Last check: {}", at.to_rfc3339());
    }
    if let Some(at) = job.next_check_at {
        println!("Next check: {}", at.to_rfc3339());
    }
    if let Some(at) = job.completed_at {
        println!("Completed:  {}", at.to_rfc3339());
    }
    println!("Batches ({}):", details.batches.len());
    for batch in &details.batches {
        let finished = batch
            .completed_at
            .map(|at| format!(" at {}", at.to_rfc3339()))
            .unwrap_or_default();
        println!("  {:<40} {}{}", batch.remote_batch_id, batch.status, finished);
    }
}

fn print_log(entry: &CheckLogModel) {
    println!(
        "{}  [{:<9}] {}",
        entry.created_at.to_rfc3339(),
        entry.category,
        entry.message
    );
}
