//! # Job Coordinator
//!
//! Runs one polling cycle for a watch job: checks every in-progress batch
//! concurrently, records a summary, and either schedules the next cycle or,
//! once every batch is terminal, fires the downstream trigger exactly once.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use metrics::{counter, histogram};
use sea_orm::DatabaseConnection;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::batch_checker::{BatchCheckOutcome, BatchChecker};
use crate::integrations::{
    ActionTrigger, Credentials, StatusProbe, TriggerError, TriggerMetadata, TriggerReceipt,
};
use crate::limiter::Limiter;
use crate::models::batch_watch::Model as BatchWatchModel;
use crate::models::check_log::LogCategory;
use crate::models::watch_job::{JobStatus, Model as WatchJobModel};
use crate::repositories::{BatchWatchRepository, CheckLogRepository, WatchJobRepository};
use crate::retry_policy::RetryPolicy;

/// External services a coordinator talks to, with their credentials.
#[derive(Clone)]
pub struct Collaborators {
    pub probe: Arc<dyn StatusProbe>,
    pub probe_credentials: Credentials,
    pub trigger: Arc<dyn ActionTrigger>,
    pub trigger_credentials: Credentials,
}

/// Result of one [`JobCoordinator::process`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Job was missing, no longer active, or changed during the cycle
    Skipped,
    /// Batches remain in progress; next cycle scheduled
    Rescheduled { next_check_at: DateTime<Utc> },
    /// Trigger fired and the job reached a completed status
    Triggered {
        status: JobStatus,
        remote_job_id: String,
    },
    /// Trigger call failed; job marked failed
    TriggerFailed { message: String },
    /// Another task already claimed the trigger
    ClaimLost,
    /// A database write failed; the job is retried on a later tick
    PersistFailed { message: String },
}

impl JobOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            JobOutcome::Skipped => "skipped",
            JobOutcome::Rescheduled { .. } => "rescheduled",
            JobOutcome::Triggered { .. } => "triggered",
            JobOutcome::TriggerFailed { .. } => "trigger_failed",
            JobOutcome::ClaimLost => "claim_lost",
            JobOutcome::PersistFailed { .. } => "persist_failed",
        }
    }
}

pub struct JobCoordinator {
    jobs: WatchJobRepository,
    batches: BatchWatchRepository,
    logs: CheckLogRepository,
    checker: BatchChecker,
    trigger: Arc<dyn ActionTrigger>,
    trigger_credentials: Credentials,
    limiter: Limiter,
}

impl JobCoordinator {
    pub fn new(
        db: DatabaseConnection,
        collaborators: Collaborators,
        policy: RetryPolicy,
        limiter: Limiter,
    ) -> Self {
        let batches = BatchWatchRepository::new(db.clone());
        let logs = CheckLogRepository::new(db.clone());
        let checker = BatchChecker::new(
            collaborators.probe,
            collaborators.probe_credentials,
            policy,
            limiter.clone(),
            batches.clone(),
            logs.clone(),
        );

        Self {
            jobs: WatchJobRepository::new(db),
            batches,
            logs,
            checker,
            trigger: collaborators.trigger,
            trigger_credentials: collaborators.trigger_credentials,
            limiter,
        }
    }

    pub fn limiter(&self) -> &Limiter {
        &self.limiter
    }

    /// Run one polling cycle for `job`.
    #[instrument(skip_all, fields(job_id = %job.id))]
    pub async fn process(&self, job: &WatchJobModel) -> JobOutcome {
        let started = Instant::now();
        let outcome = self.run_cycle(job.id).await;

        histogram!("batchwatch_job_cycle_duration_ms")
            .record(started.elapsed().as_secs_f64() * 1_000.0);
        counter!("batchwatch_job_cycles_total", "outcome" => outcome.label()).increment(1);
        outcome
    }

    async fn run_cycle(&self, job_id: Uuid) -> JobOutcome {
        let job = match self.jobs.find(job_id).await {
            Ok(Some(job)) if job.job_status() == JobStatus::Active => job,
            Ok(_) => {
                debug!("Job no longer active, skipping");
                return JobOutcome::Skipped;
            }
            Err(err) => return self.persist_failed(job_id, "load job", err.to_string()).await,
        };

        let pending = match self.batches.in_progress_for_job(job.id).await {
            Ok(pending) => pending,
            Err(err) => return self.reschedule_after_error(&job, err.to_string()).await,
        };

        let checked_any = !pending.is_empty();
        if checked_any {
            self.check_batches(pending).await;
        }

        let batches = match self.batches.list_for_job(job.id).await {
            Ok(batches) => batches,
            Err(err) => return self.reschedule_after_error(&job, err.to_string()).await,
        };

        let summary = CycleSummary::from_batches(&batches);
        if checked_any {
            self.append_log(job.id, LogCategory::Checking, summary.message())
                .await;
        }

        if summary.in_progress == 0 {
            self.fire_trigger(&job, &batches).await
        } else {
            self.schedule_next(&job).await
        }
    }

    /// Check every batch concurrently and wait for all of them.
    async fn check_batches(&self, pending: Vec<BatchWatchModel>) {
        let mut tasks = JoinSet::new();
        for batch in pending {
            let checker = self.checker.clone();
            tasks.spawn(async move { checker.check(&batch).await });
        }

        let mut gave_up = 0usize;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(BatchCheckOutcome::GaveUp { .. } | BatchCheckOutcome::PersistFailed { .. }) => {
                    gave_up += 1;
                }
                Ok(_) => {}
                Err(err) => error!(error = %err, "Batch check task failed"),
            }
        }
        if gave_up > 0 {
            warn!(gave_up, "Some batches could not be checked this cycle");
        }
    }

    async fn fire_trigger(&self, job: &WatchJobModel, batches: &[BatchWatchModel]) -> JobOutcome {
        let now = Utc::now();
        match self.jobs.claim_for_trigger(job.id, now).await {
            Ok(true) => {}
            Ok(false) => {
                warn!("Trigger already claimed or job left active state");
                return JobOutcome::ClaimLost;
            }
            Err(err) => {
                return self
                    .persist_failed(job.id, "claim job for trigger", err.to_string())
                    .await;
            }
        }

        let metadata = build_metadata(batches);
        let target = job.target();

        info!(
            configuration_id = %target.configuration_id,
            completed = metadata.batch_count_completed,
            failed = metadata.batch_count_failed,
            "All batches terminal, triggering downstream job"
        );

        let result: Result<TriggerReceipt, TriggerError> = self
            .limiter
            .run(
                self.trigger
                    .invoke(&target, &self.trigger_credentials, &metadata),
            )
            .await
            .unwrap_or_else(|closed| Err(TriggerError::permanent(closed.to_string())));

        match result {
            Ok(receipt) => {
                let status = if metadata.batch_count_failed == 0 {
                    JobStatus::Completed
                } else {
                    JobStatus::CompletedWithFailures
                };
                counter!("batchwatch_triggers_total", "result" => "success").increment(1);

                if let Err(err) = self.jobs.finalize(job.id, status, Utc::now()).await {
                    // The claim already unscheduled the job, so it will not re-trigger
                    error!(error = %err, remote_job_id = %receipt.remote_job_id, "Failed to record completed job");
                    self.append_log(
                        job.id,
                        LogCategory::Error,
                        format!("Failed to record status {status}: {err}"),
                    )
                    .await;
                }

                let mut message = format!(
                    "Triggered Keboola job {} ({} completed, {} failed)",
                    receipt.remote_job_id,
                    metadata.batch_count_completed,
                    metadata.batch_count_failed
                );
                if let Some(url) = &receipt.url {
                    message.push_str(&format!(": {url}"));
                }
                self.append_log(job.id, LogCategory::Triggered, message)
                    .await;

                info!(remote_job_id = %receipt.remote_job_id, %status, "Watch job finished");
                JobOutcome::Triggered {
                    status,
                    remote_job_id: receipt.remote_job_id,
                }
            }
            Err(err) => {
                counter!("batchwatch_triggers_total", "result" => "failure").increment(1);
                error!(error = %err, "Downstream trigger failed; job needs manual intervention");

                if let Err(db_err) = self.jobs.finalize(job.id, JobStatus::Failed, Utc::now()).await
                {
                    error!(error = %db_err, "Failed to mark job failed");
                    self.append_log(
                        job.id,
                        LogCategory::Error,
                        format!("Failed to record status {}: {db_err}", JobStatus::Failed),
                    )
                    .await;
                }
                let message = format!("Failed to trigger Keboola job: {}", err.message);
                self.append_log(job.id, LogCategory::Error, message.clone())
                    .await;

                JobOutcome::TriggerFailed { message }
            }
        }
    }

    async fn schedule_next(&self, job: &WatchJobModel) -> JobOutcome {
        let now = Utc::now();
        let next_check_at = now + Duration::seconds(i64::from(job.poll_interval_seconds.max(1)));

        match self
            .jobs
            .schedule_next_check(job.id, job.updated_at, now, next_check_at)
            .await
        {
            Ok(true) => {
                debug!(%next_check_at, "Next check scheduled");
                JobOutcome::Rescheduled { next_check_at }
            }
            Ok(false) => {
                // Row was modified after this cycle loaded it
                debug!("Job changed during the cycle, schedule left untouched");
                JobOutcome::Skipped
            }
            Err(err) => {
                self.persist_failed(job.id, "schedule next check", err.to_string())
                    .await
            }
        }
    }

    /// Best-effort reschedule when the cycle could not read its batches.
    async fn reschedule_after_error(&self, job: &WatchJobModel, message: String) -> JobOutcome {
        self.append_log(job.id, LogCategory::Error, format!("Check cycle failed: {message}"))
            .await;
        if let JobOutcome::Rescheduled { .. } = self.schedule_next(job).await {
            debug!("Rescheduled after failed cycle");
        }
        JobOutcome::PersistFailed { message }
    }

    async fn persist_failed(&self, job_id: Uuid, action: &str, message: String) -> JobOutcome {
        error!(error = %message, action, "Database write failed during cycle");
        self.append_log(
            job_id,
            LogCategory::Error,
            format!("Failed to {action}: {message}"),
        )
        .await;
        JobOutcome::PersistFailed { message }
    }

    async fn append_log(&self, job_id: Uuid, category: LogCategory, message: String) {
        if let Err(err) = self.logs.append(job_id, category, message).await {
            error!(error = %err, %category, "Failed to write check log");
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
struct CycleSummary {
    total: usize,
    completed: usize,
    failed: usize,
    in_progress: usize,
}

impl CycleSummary {
    fn from_batches(batches: &[BatchWatchModel]) -> Self {
        let mut summary = CycleSummary {
            total: batches.len(),
            ..Default::default()
        };
        for batch in batches {
            let status = batch.batch_status();
            if status.is_failed() {
                summary.failed += 1;
            } else if status.is_terminal() {
                summary.completed += 1;
            } else {
                summary.in_progress += 1;
            }
        }
        summary
    }

    fn message(&self) -> String {
        format!(
            "Checked {} batch(es): {} completed, {} failed, {} in progress",
            self.total, self.completed, self.failed, self.in_progress
        )
    }
}

/// Completion summary sent with the trigger.
pub fn build_metadata(batches: &[BatchWatchModel]) -> TriggerMetadata {
    let mut metadata = TriggerMetadata {
        batch_count_total: batches.len(),
        ..Default::default()
    };
    for batch in batches {
        let status = batch.batch_status();
        if status.is_failed() {
            metadata.batch_ids_failed.push(batch.remote_batch_id.clone());
        } else if status.is_terminal() {
            metadata
                .batch_ids_completed
                .push(batch.remote_batch_id.clone());
        }
    }
    metadata.batch_count_completed = metadata.batch_ids_completed.len();
    metadata.batch_count_failed = metadata.batch_ids_failed.len();
    metadata
}
