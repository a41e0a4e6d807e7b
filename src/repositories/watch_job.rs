//! # WatchJob Repository
//!
//! CRUD surface for watch jobs plus the scheduling writes used by the polling
//! engine. Scheduling writes are conditional updates so that a job paused,
//! deleted, or claimed by another task in the meantime is left alone.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::Serialize;
use uuid::Uuid;

use crate::config::PollIntervalConfig;
use crate::error::{RepositoryError, map_db_err};
use crate::integrations::TriggerTarget;
use crate::models::batch_watch::{
    self, ActiveModel as BatchWatchActiveModel, BatchStatus, Entity as BatchWatchEntity,
};
use crate::models::check_log::{self, Entity as CheckLogEntity};
use crate::models::watch_job::{ActiveModel, Column, Entity, JobStatus, Model};

/// Maximum number of remote batches a single job may watch.
pub const MAX_BATCHES_PER_JOB: usize = 10;

const MAX_NAME_LEN: usize = 255;
const MAX_REMOTE_ID_LEN: usize = 255;
const MAX_STACK_URL_LEN: usize = 500;

/// Input for [`WatchJobRepository::create`].
#[derive(Debug, Clone)]
pub struct NewWatchJob {
    pub name: String,
    pub target: TriggerTarget,
    /// Falls back to the configured default when unset
    pub poll_interval_seconds: Option<u32>,
    pub batch_ids: Vec<String>,
}

/// Partial update for [`WatchJobRepository::update`]; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct WatchJobUpdate {
    pub name: Option<String>,
    pub stack_url: Option<String>,
    pub component_id: Option<String>,
    pub configuration_id: Option<String>,
    pub poll_interval_seconds: Option<u32>,
}

impl WatchJobUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.stack_url.is_none()
            && self.component_id.is_none()
            && self.configuration_id.is_none()
            && self.poll_interval_seconds.is_none()
    }
}

/// A watch job together with its batches.
#[derive(Debug, Clone)]
pub struct WatchJobDetails {
    pub job: Model,
    pub batches: Vec<batch_watch::Model>,
}

impl WatchJobDetails {
    pub fn count_by_status(&self, status: BatchStatus) -> usize {
        self.batches
            .iter()
            .filter(|batch| batch.batch_status() == status)
            .count()
    }
}

/// System-wide counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SystemStats {
    pub total_jobs: u64,
    pub jobs_by_status: BTreeMap<String, u64>,
    pub total_batches: u64,
    pub batches_in_progress: u64,
    pub total_log_entries: u64,
}

/// Repository for watch job database operations
#[derive(Clone)]
pub struct WatchJobRepository {
    db: DatabaseConnection,
    poll_bounds: PollIntervalConfig,
}

impl WatchJobRepository {
    /// Create a repository using the default poll interval bounds
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            db,
            poll_bounds: PollIntervalConfig::default(),
        }
    }

    /// Override the poll interval bounds used for validation
    pub fn with_poll_bounds(mut self, poll_bounds: PollIntervalConfig) -> Self {
        self.poll_bounds = poll_bounds;
        self
    }

    /// Create a watch job and its batches in one transaction.
    ///
    /// The job is immediately due.
    pub async fn create(&self, input: NewWatchJob) -> Result<WatchJobDetails, RepositoryError> {
        let name = validate_name(&input.name)?;
        let target = validate_target(&input.target)?;
        let interval = input
            .poll_interval_seconds
            .unwrap_or(self.poll_bounds.default_seconds);
        self.validate_interval(interval)?;
        let batch_ids = validate_batch_ids(&input.batch_ids)?;

        let now = Utc::now().fixed_offset();
        let job_id = Uuid::new_v4();

        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| map_db_err("starting create transaction", e))?;

        let job = ActiveModel {
            id: Set(job_id),
            name: Set(name),
            target_stack_url: Set(target.stack_url),
            target_component_id: Set(target.component_id),
            target_configuration_id: Set(target.configuration_id),
            poll_interval_seconds: Set(interval as i32),
            status: Set(JobStatus::Active.as_str().to_string()),
            last_check_at: Set(None),
            next_check_at: Set(Some(now)),
            created_at: Set(now),
            updated_at: Set(now),
            completed_at: Set(None),
        }
        .insert(&txn)
        .await
        .map_err(|e| map_db_err("inserting watch job", e))?;

        let mut batches = Vec::with_capacity(batch_ids.len());
        for remote_batch_id in batch_ids {
            let batch = BatchWatchActiveModel {
                id: Set(Uuid::new_v4()),
                job_id: Set(job_id),
                remote_batch_id: Set(remote_batch_id),
                status: Set(BatchStatus::InProgress.as_str().to_string()),
                created_at: Set(now),
                completed_at: Set(None),
            }
            .insert(&txn)
            .await
            .map_err(|e| map_db_err("inserting batch watch", e))?;
            batches.push(batch);
        }

        txn.commit()
            .await
            .map_err(|e| map_db_err("committing create transaction", e))?;

        tracing::info!(
            job_id = %job.id,
            name = %job.name,
            batches = batches.len(),
            poll_interval_seconds = job.poll_interval_seconds,
            "Watch job created"
        );

        Ok(WatchJobDetails { job, batches })
    }

    /// Find a watch job by ID
    pub async fn find(&self, job_id: Uuid) -> Result<Option<Model>, RepositoryError> {
        Entity::find_by_id(job_id)
            .one(&self.db)
            .await
            .map_err(|e| map_db_err("loading watch job", e))
    }

    /// Find a watch job and its batches, failing with `NotFound` when missing
    pub async fn find_with_batches(
        &self,
        job_id: Uuid,
    ) -> Result<WatchJobDetails, RepositoryError> {
        let job = self.require(job_id).await?;
        let batches = BatchWatchEntity::find()
            .filter(batch_watch::Column::JobId.eq(job_id))
            .order_by_asc(batch_watch::Column::CreatedAt)
            .order_by_asc(batch_watch::Column::RemoteBatchId)
            .all(&self.db)
            .await
            .map_err(|e| map_db_err("loading batch watches", e))?;

        Ok(WatchJobDetails { job, batches })
    }

    /// List watch jobs, newest first, with optional status filter
    pub async fn list(
        &self,
        status: Option<JobStatus>,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<Model>, RepositoryError> {
        let mut query = Entity::find().order_by_desc(Column::CreatedAt);

        if let Some(status) = status {
            query = query.filter(Column::Status.eq(status.as_str()));
        }

        query
            .offset(offset)
            .limit(limit)
            .all(&self.db)
            .await
            .map_err(|e| map_db_err("listing watch jobs", e))
    }

    /// Update the name, target, or poll interval of a job
    pub async fn update(
        &self,
        job_id: Uuid,
        changes: WatchJobUpdate,
    ) -> Result<Model, RepositoryError> {
        if changes.is_empty() {
            return Err(RepositoryError::validation("no fields to update"));
        }

        let job = self.require(job_id).await?;
        let mut target = job.target();
        if let Some(stack_url) = changes.stack_url {
            target.stack_url = stack_url;
        }
        if let Some(component_id) = changes.component_id {
            target.component_id = component_id;
        }
        if let Some(configuration_id) = changes.configuration_id {
            target.configuration_id = configuration_id;
        }
        let target = validate_target(&target)?;

        let mut active: ActiveModel = job.into();
        if let Some(name) = changes.name {
            active.name = Set(validate_name(&name)?);
        }
        if let Some(interval) = changes.poll_interval_seconds {
            self.validate_interval(interval)?;
            active.poll_interval_seconds = Set(interval as i32);
        }
        active.target_stack_url = Set(target.stack_url);
        active.target_component_id = Set(target.component_id);
        active.target_configuration_id = Set(target.configuration_id);
        active.updated_at = Set(Utc::now().fixed_offset());

        let updated = active
            .update(&self.db)
            .await
            .map_err(|e| map_db_err("updating watch job", e))?;

        tracing::info!(job_id = %job_id, "Watch job updated");
        Ok(updated)
    }

    /// Remove an active job from scheduling
    pub async fn pause(&self, job_id: Uuid) -> Result<Model, RepositoryError> {
        let now = Utc::now().fixed_offset();
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(JobStatus::Paused.as_str()))
            .col_expr(Column::NextCheckAt, Expr::value(None::<DateTimeWithTimeZone>))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.eq(job_id))
            .filter(Column::Status.eq(JobStatus::Active.as_str()))
            .exec(&self.db)
            .await
            .map_err(|e| map_db_err("pausing watch job", e))?;

        let job = self.require(job_id).await?;
        if result.rows_affected == 0 {
            return Err(RepositoryError::Conflict(format!(
                "cannot pause job in status '{}'",
                job.status
            )));
        }

        tracing::info!(job_id = %job_id, "Watch job paused");
        Ok(job)
    }

    /// Reactivate a paused job; it becomes due immediately
    pub async fn resume(&self, job_id: Uuid) -> Result<Model, RepositoryError> {
        let now = Utc::now().fixed_offset();
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(JobStatus::Active.as_str()))
            .col_expr(Column::NextCheckAt, Expr::value(Some(now)))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.eq(job_id))
            .filter(Column::Status.eq(JobStatus::Paused.as_str()))
            .exec(&self.db)
            .await
            .map_err(|e| map_db_err("resuming watch job", e))?;

        let job = self.require(job_id).await?;
        if result.rows_affected == 0 {
            return Err(RepositoryError::Conflict(format!(
                "cannot resume job in status '{}'",
                job.status
            )));
        }

        tracing::info!(job_id = %job_id, "Watch job resumed");
        Ok(job)
    }

    /// Delete a job together with its batches and check logs
    pub async fn delete(&self, job_id: Uuid) -> Result<(), RepositoryError> {
        let deleted = self.delete_many(vec![job_id]).await?;
        if deleted == 0 {
            return Err(RepositoryError::NotFound(job_id));
        }
        tracing::info!(job_id = %job_id, "Watch job deleted");
        Ok(())
    }

    /// Delete finished jobs whose last update is older than `older_than_days`
    pub async fn purge_finished(&self, older_than_days: u32) -> Result<u64, RepositoryError> {
        let cutoff = (Utc::now() - Duration::days(i64::from(older_than_days))).fixed_offset();
        let finished: Vec<&str> = JobStatus::ALL
            .iter()
            .filter(|status| status.is_final())
            .map(|status| status.as_str())
            .collect();

        let ids: Vec<Uuid> = Entity::find()
            .select_only()
            .column(Column::Id)
            .filter(Column::Status.is_in(finished))
            .filter(Column::UpdatedAt.lt(cutoff))
            .into_tuple()
            .all(&self.db)
            .await
            .map_err(|e| map_db_err("selecting finished jobs", e))?;

        if ids.is_empty() {
            return Ok(0);
        }

        let deleted = self.delete_many(ids).await?;
        tracing::info!(deleted, older_than_days, "Purged finished watch jobs");
        Ok(deleted)
    }

    /// Active jobs whose next check is due, oldest first
    pub async fn due_jobs(
        &self,
        now: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<Model>, RepositoryError> {
        Entity::find()
            .filter(Column::Status.eq(JobStatus::Active.as_str()))
            .filter(Column::NextCheckAt.is_not_null())
            .filter(Column::NextCheckAt.lte(now.fixed_offset()))
            .order_by_asc(Column::NextCheckAt)
            .limit(limit)
            .all(&self.db)
            .await
            .map_err(|e| map_db_err("loading due jobs", e))
    }

    /// Earliest scheduled check among active jobs, ignoring `exclude`
    pub async fn next_check_time(
        &self,
        exclude: &[Uuid],
    ) -> Result<Option<DateTime<Utc>>, RepositoryError> {
        let mut query = Entity::find()
            .filter(Column::Status.eq(JobStatus::Active.as_str()))
            .filter(Column::NextCheckAt.is_not_null());
        if !exclude.is_empty() {
            query = query.filter(Column::Id.is_not_in(exclude.iter().copied()));
        }

        let next = query
            .order_by_asc(Column::NextCheckAt)
            .one(&self.db)
            .await
            .map_err(|e| map_db_err("loading next check time", e))?;

        Ok(next
            .and_then(|job| job.next_check_at)
            .map(|at| at.with_timezone(&Utc)))
    }

    /// Record a finished polling cycle and schedule the next one.
    ///
    /// `loaded_updated_at` is the `updated_at` the cycle read. Returns
    /// `false` when the job is no longer active or was modified since, so a
    /// pause or resume during the cycle keeps its own schedule.
    pub async fn schedule_next_check(
        &self,
        job_id: Uuid,
        loaded_updated_at: DateTimeWithTimeZone,
        checked_at: DateTime<Utc>,
        next_check_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = Entity::update_many()
            .col_expr(Column::LastCheckAt, Expr::value(Some(checked_at.fixed_offset())))
            .col_expr(Column::NextCheckAt, Expr::value(Some(next_check_at.fixed_offset())))
            .col_expr(Column::UpdatedAt, Expr::value(checked_at.fixed_offset()))
            .filter(Column::Id.eq(job_id))
            .filter(Column::Status.eq(JobStatus::Active.as_str()))
            .filter(Column::UpdatedAt.eq(loaded_updated_at))
            .exec(&self.db)
            .await
            .map_err(|e| map_db_err("scheduling next check", e))?;

        Ok(result.rows_affected == 1)
    }

    /// Take exclusive ownership of the trigger for an active, scheduled job.
    ///
    /// Clears `next_check_at` so the job is never due again. Only the caller
    /// that gets `true` may invoke the trigger.
    pub async fn claim_for_trigger(
        &self,
        job_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = Entity::update_many()
            .col_expr(Column::NextCheckAt, Expr::value(None::<DateTimeWithTimeZone>))
            .col_expr(Column::LastCheckAt, Expr::value(Some(now.fixed_offset())))
            .col_expr(Column::UpdatedAt, Expr::value(now.fixed_offset()))
            .filter(Column::Id.eq(job_id))
            .filter(Column::Status.eq(JobStatus::Active.as_str()))
            .filter(Column::NextCheckAt.is_not_null())
            .exec(&self.db)
            .await
            .map_err(|e| map_db_err("claiming job for trigger", e))?;

        Ok(result.rows_affected == 1)
    }

    /// Write the final status of a claimed job
    pub async fn finalize(
        &self,
        job_id: Uuid,
        status: JobStatus,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let completed_at = match status {
            JobStatus::Completed | JobStatus::CompletedWithFailures => Some(now.fixed_offset()),
            _ => None,
        };

        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(status.as_str()))
            .col_expr(Column::CompletedAt, Expr::value(completed_at))
            .col_expr(Column::UpdatedAt, Expr::value(now.fixed_offset()))
            .filter(Column::Id.eq(job_id))
            .exec(&self.db)
            .await
            .map_err(|e| map_db_err("finalizing watch job", e))?;

        if result.rows_affected == 0 {
            return Err(RepositoryError::NotFound(job_id));
        }
        Ok(())
    }

    /// Job counts per status, batch and log totals
    pub async fn stats(&self) -> Result<SystemStats, RepositoryError> {
        let per_status: Vec<(String, i64)> = Entity::find()
            .select_only()
            .column(Column::Status)
            .column_as(Expr::col(Column::Id).count(), "count")
            .group_by(Column::Status)
            .into_tuple()
            .all(&self.db)
            .await
            .map_err(|e| map_db_err("counting jobs by status", e))?;

        let mut stats = SystemStats::default();
        for status in JobStatus::ALL {
            stats.jobs_by_status.insert(status.as_str().to_string(), 0);
        }
        for (status, count) in per_status {
            let count = count.max(0) as u64;
            stats.total_jobs += count;
            *stats.jobs_by_status.entry(status).or_insert(0) += count;
        }

        stats.total_batches = BatchWatchEntity::find()
            .count(&self.db)
            .await
            .map_err(|e| map_db_err("counting batch watches", e))?;
        stats.batches_in_progress = BatchWatchEntity::find()
            .filter(batch_watch::Column::Status.eq(BatchStatus::InProgress.as_str()))
            .count(&self.db)
            .await
            .map_err(|e| map_db_err("counting in-progress batches", e))?;
        stats.total_log_entries = CheckLogEntity::find()
            .count(&self.db)
            .await
            .map_err(|e| map_db_err("counting check logs", e))?;

        Ok(stats)
    }

    async fn require(&self, job_id: Uuid) -> Result<Model, RepositoryError> {
        self.find(job_id)
            .await?
            .ok_or(RepositoryError::NotFound(job_id))
    }

    async fn delete_many(&self, job_ids: Vec<Uuid>) -> Result<u64, RepositoryError> {
        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| map_db_err("starting delete transaction", e))?;

        CheckLogEntity::delete_many()
            .filter(check_log::Column::JobId.is_in(job_ids.clone()))
            .exec(&txn)
            .await
            .map_err(|e| map_db_err("deleting check logs", e))?;
        BatchWatchEntity::delete_many()
            .filter(batch_watch::Column::JobId.is_in(job_ids.clone()))
            .exec(&txn)
            .await
            .map_err(|e| map_db_err("deleting batch watches", e))?;
        let result = Entity::delete_many()
            .filter(Column::Id.is_in(job_ids))
            .exec(&txn)
            .await
            .map_err(|e| map_db_err("deleting watch jobs", e))?;

        txn.commit()
            .await
            .map_err(|e| map_db_err("committing delete transaction", e))?;

        Ok(result.rows_affected)
    }

    fn validate_interval(&self, seconds: u32) -> Result<(), RepositoryError> {
        if !self.poll_bounds.contains(seconds) {
            return Err(RepositoryError::validation(format!(
                "poll interval must be between {} and {} seconds, got {}",
                self.poll_bounds.min_seconds, self.poll_bounds.max_seconds, seconds
            )));
        }
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<String, RepositoryError> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
        return Err(RepositoryError::validation(format!(
            "name must be 1-{MAX_NAME_LEN} characters"
        )));
    }
    Ok(name.to_string())
}

fn validate_target(target: &TriggerTarget) -> Result<TriggerTarget, RepositoryError> {
    let stack_url = target.stack_url.trim().trim_end_matches('/').to_string();
    if stack_url.len() > MAX_STACK_URL_LEN {
        return Err(RepositoryError::validation("stack URL is too long"));
    }
    let parsed = url::Url::parse(&stack_url)
        .map_err(|e| RepositoryError::validation(format!("invalid stack URL: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(RepositoryError::validation(
            "stack URL must use http or https",
        ));
    }

    let component_id = target.component_id.trim();
    let configuration_id = target.configuration_id.trim();
    if component_id.is_empty() || configuration_id.is_empty() {
        return Err(RepositoryError::validation(
            "component id and configuration id are required",
        ));
    }

    Ok(TriggerTarget {
        stack_url,
        component_id: component_id.to_string(),
        configuration_id: configuration_id.to_string(),
        tag: None,
    })
}

fn validate_batch_ids(batch_ids: &[String]) -> Result<Vec<String>, RepositoryError> {
    if batch_ids.is_empty() || batch_ids.len() > MAX_BATCHES_PER_JOB {
        return Err(RepositoryError::validation(format!(
            "a job watches 1-{MAX_BATCHES_PER_JOB} batches, got {}",
            batch_ids.len()
        )));
    }

    let mut seen = HashSet::with_capacity(batch_ids.len());
    let mut cleaned = Vec::with_capacity(batch_ids.len());
    for raw in batch_ids {
        let id = raw.trim();
        if id.is_empty() || id.len() > MAX_REMOTE_ID_LEN {
            return Err(RepositoryError::validation(format!(
                "batch id must be 1-{MAX_REMOTE_ID_LEN} characters"
            )));
        }
        if !seen.insert(id.to_string()) {
            return Err(RepositoryError::validation(format!(
                "duplicate batch id '{id}'"
            )));
        }
        cleaned.push(id.to_string());
    }
    Ok(cleaned)
}
