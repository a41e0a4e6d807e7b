//! Test utilities shared by the integration tests.
//!
//! Provides an in-memory SQLite database with migrations applied and
//! scripted fakes for the status probe and the downstream trigger.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use batchwatch::integrations::{
    ActionTrigger, Credentials, ProbeError, RemoteBatchState, StatusProbe, TriggerError,
    TriggerMetadata, TriggerReceipt, TriggerTarget,
};
use batchwatch::job_coordinator::{Collaborators, JobCoordinator};
use batchwatch::limiter::Limiter;
use batchwatch::repositories::{NewWatchJob, WatchJobDetails, WatchJobRepository};
use batchwatch::retry_policy::RetryPolicy;
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, DatabaseConnection};

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

/// Creates an active watch job over `batch_ids` with a 60 second interval.
pub async fn create_job(db: &DatabaseConnection, batch_ids: &[&str]) -> Result<WatchJobDetails> {
    let repo = WatchJobRepository::new(db.clone());
    let details = repo
        .create(NewWatchJob {
            name: "nightly classification".to_string(),
            target: test_target(),
            poll_interval_seconds: Some(60),
            batch_ids: batch_ids.iter().map(|id| id.to_string()).collect(),
        })
        .await?;
    Ok(details)
}

pub fn test_target() -> TriggerTarget {
    TriggerTarget {
        stack_url: "https://connection.keboola.com".to_string(),
        component_id: "kds-team.app-custom-python".to_string(),
        configuration_id: "987654".to_string(),
        tag: None,
    }
}

/// Retry policy with millisecond delays so tests stay fast.
pub fn fast_retry_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(Duration::from_millis(1), Duration::from_millis(5), max_attempts)
}

pub fn coordinator(
    db: &DatabaseConnection,
    probe: Arc<ScriptedProbe>,
    trigger: Arc<RecordingTrigger>,
    limiter: Limiter,
) -> JobCoordinator {
    JobCoordinator::new(
        db.clone(),
        Collaborators {
            probe,
            probe_credentials: Credentials::new("sk-test-openai-key"),
            trigger,
            trigger_credentials: Credentials::new("kbc-test-token"),
        },
        fast_retry_policy(3),
        limiter,
    )
}

/// Status probe answering from per-batch scripts.
///
/// Each call pops the next scripted response for the batch; once a script
/// is exhausted the last response repeats. Unknown batches report
/// `in_progress`.
#[derive(Default)]
pub struct ScriptedProbe {
    scripts: Mutex<HashMap<String, VecDeque<Result<RemoteBatchState, ProbeError>>>>,
    last: Mutex<HashMap<String, Result<RemoteBatchState, ProbeError>>>,
    calls: Mutex<HashMap<String, usize>>,
    delay: Option<Duration>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn script(
        &self,
        remote_batch_id: &str,
        responses: Vec<Result<RemoteBatchState, ProbeError>>,
    ) {
        self.scripts
            .lock()
            .unwrap()
            .insert(remote_batch_id.to_string(), responses.into());
    }

    /// Always answer `status` for the batch.
    pub fn set_status(&self, remote_batch_id: &str, status: &str) {
        self.script(remote_batch_id, vec![Ok(RemoteBatchState::new(status))]);
    }

    pub fn calls_for(&self, remote_batch_id: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(remote_batch_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatusProbe for ScriptedProbe {
    async fn check(
        &self,
        remote_batch_id: &str,
        _credentials: &Credentials,
    ) -> Result<RemoteBatchState, ProbeError> {
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_active, Ordering::SeqCst);
        *self
            .calls
            .lock()
            .unwrap()
            .entry(remote_batch_id.to_string())
            .or_insert(0) += 1;

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(remote_batch_id)
            .and_then(|script| script.pop_front());
        let response = match next {
            Some(response) => {
                self.last
                    .lock()
                    .unwrap()
                    .insert(remote_batch_id.to_string(), response.clone());
                response
            }
            None => self
                .last
                .lock()
                .unwrap()
                .get(remote_batch_id)
                .cloned()
                .unwrap_or_else(|| Ok(RemoteBatchState::new("in_progress"))),
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        response
    }
}

/// Trigger that records every invocation.
pub struct RecordingTrigger {
    invocations: Mutex<Vec<(TriggerTarget, TriggerMetadata)>>,
    failure: Option<TriggerError>,
}

impl RecordingTrigger {
    pub fn succeeding() -> Self {
        Self {
            invocations: Mutex::new(Vec::new()),
            failure: None,
        }
    }

    pub fn failing(error: TriggerError) -> Self {
        Self {
            invocations: Mutex::new(Vec::new()),
            failure: Some(error),
        }
    }

    pub fn invocations(&self) -> Vec<(TriggerTarget, TriggerMetadata)> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.invocations.lock().unwrap().len()
    }
}

#[async_trait]
impl ActionTrigger for RecordingTrigger {
    async fn invoke(
        &self,
        target: &TriggerTarget,
        _credentials: &Credentials,
        metadata: &TriggerMetadata,
    ) -> Result<TriggerReceipt, TriggerError> {
        let number = {
            let mut invocations = self.invocations.lock().unwrap();
            invocations.push((target.clone(), metadata.clone()));
            invocations.len()
        };

        match &self.failure {
            Some(err) => Err(err.clone()),
            None => Ok(TriggerReceipt {
                remote_job_id: format!("kbc-job-{number}"),
                status: Some("created".to_string()),
                url: None,
            }),
        }
    }
}
