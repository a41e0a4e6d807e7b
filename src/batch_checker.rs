//! # Batch Checker
//!
//! Drives one in-progress batch through the status probe and the retry
//! policy and persists any transition. Every failure is folded into the
//! returned [`BatchCheckOutcome`]; nothing propagates to the caller.

use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

use crate::integrations::{Credentials, FailureKind, ProbeError, RemoteBatchState, StatusProbe};
use crate::limiter::Limiter;
use crate::models::batch_watch::{BatchStatus, Model as BatchWatchModel};
use crate::models::check_log::LogCategory;
use crate::repositories::{BatchWatchRepository, CheckLogRepository};
use crate::retry_policy::{RetryDecision, RetryPolicy};

/// Result of checking a single batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchCheckOutcome {
    /// Probe succeeded and the mapped status matches the stored one
    Unchanged,
    /// Status moved from in_progress to a terminal value
    Transitioned { to: BatchStatus },
    /// Probe failed permanently or exhausted its retries
    GaveUp {
        kind: FailureKind,
        attempts: u32,
        message: String,
    },
    /// Probe succeeded but the new status could not be stored
    PersistFailed { message: String },
}

impl BatchCheckOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            BatchCheckOutcome::Unchanged => "unchanged",
            BatchCheckOutcome::Transitioned { .. } => "transitioned",
            BatchCheckOutcome::GaveUp { .. } => "gave_up",
            BatchCheckOutcome::PersistFailed { .. } => "persist_failed",
        }
    }
}

#[derive(Clone)]
pub struct BatchChecker {
    probe: Arc<dyn StatusProbe>,
    credentials: Credentials,
    policy: RetryPolicy,
    limiter: Limiter,
    batches: BatchWatchRepository,
    logs: CheckLogRepository,
}

impl BatchChecker {
    pub fn new(
        probe: Arc<dyn StatusProbe>,
        credentials: Credentials,
        policy: RetryPolicy,
        limiter: Limiter,
        batches: BatchWatchRepository,
        logs: CheckLogRepository,
    ) -> Self {
        Self {
            probe,
            credentials,
            policy,
            limiter,
            batches,
            logs,
        }
    }

    /// Check one batch. Terminal batches are returned unchanged without probing.
    #[instrument(
        skip_all,
        fields(job_id = %batch.job_id, batch_id = %batch.id, remote_batch_id = %batch.remote_batch_id)
    )]
    pub async fn check(&self, batch: &BatchWatchModel) -> BatchCheckOutcome {
        if batch.is_terminal() {
            return BatchCheckOutcome::Unchanged;
        }

        let outcome = match self.probe_with_retry(batch).await {
            Ok(state) => self.apply(batch, state).await,
            Err((err, attempts)) => self.give_up(batch, err, attempts).await,
        };

        counter!("batchwatch_batch_checks_total", "outcome" => outcome.label()).increment(1);
        outcome
    }

    async fn probe_with_retry(
        &self,
        batch: &BatchWatchModel,
    ) -> Result<RemoteBatchState, (ProbeError, u32)> {
        let mut attempt = 1;
        loop {
            let result = self
                .limiter
                .run(self.probe.check(&batch.remote_batch_id, &self.credentials))
                .await
                .unwrap_or_else(|closed| Err(ProbeError::permanent(closed.to_string())));

            let err = match result {
                Ok(state) => return Ok(state),
                Err(err) => err,
            };

            match self.policy.decide(err.kind, attempt) {
                RetryDecision::RetryAfter(delay) => {
                    warn!(
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %err,
                        "Batch probe failed, retrying"
                    );
                    counter!("batchwatch_probe_retries_total").increment(1);
                    sleep(delay).await;
                    attempt += 1;
                }
                RetryDecision::GiveUp => return Err((err, attempt)),
            }
        }
    }

    async fn apply(&self, batch: &BatchWatchModel, state: RemoteBatchState) -> BatchCheckOutcome {
        let mapped = BatchStatus::from_remote(&state.status);
        if mapped == batch.batch_status() {
            debug!(remote_status = %state.status, "Batch still in progress");
            return BatchCheckOutcome::Unchanged;
        }

        match self.batches.record_status(batch.id, mapped, Utc::now()).await {
            Ok(true) => {}
            Ok(false) => {
                // Another writer moved the row first
                debug!(status = %mapped, "Batch already left in_progress");
                return BatchCheckOutcome::Unchanged;
            }
            Err(err) => {
                error!(error = %err, status = %mapped, "Failed to persist batch status");
                let message = format!(
                    "Failed to record status {} for batch {}: {}",
                    mapped, batch.remote_batch_id, err
                );
                self.append_log(batch, LogCategory::Error, message.clone())
                    .await;
                return BatchCheckOutcome::PersistFailed { message };
            }
        }

        info!(status = %mapped, remote_status = %state.status, "Batch reached terminal status");

        let (category, message) = if mapped.is_failed() {
            let detail = state
                .error_message
                .map(|msg| format!(": {msg}"))
                .unwrap_or_default();
            (
                LogCategory::Failed,
                format!("Batch {} {}{}", batch.remote_batch_id, mapped, detail),
            )
        } else {
            (
                LogCategory::Success,
                format!("Batch {} completed", batch.remote_batch_id),
            )
        };
        self.append_log(batch, category, message).await;

        BatchCheckOutcome::Transitioned { to: mapped }
    }

    async fn give_up(
        &self,
        batch: &BatchWatchModel,
        err: ProbeError,
        attempts: u32,
    ) -> BatchCheckOutcome {
        error!(attempts, kind = %err.kind, error = %err, "Giving up on batch for this cycle");

        let message = format!(
            "Failed to check batch {} after {} attempt(s): {}",
            batch.remote_batch_id, attempts, err.message
        );
        self.append_log(batch, LogCategory::Error, message.clone())
            .await;

        BatchCheckOutcome::GaveUp {
            kind: err.kind,
            attempts,
            message,
        }
    }

    async fn append_log(&self, batch: &BatchWatchModel, category: LogCategory, message: String) {
        if let Err(err) = self.logs.append(batch.job_id, category, message).await {
            error!(error = %err, %category, "Failed to write check log");
        }
    }
}
