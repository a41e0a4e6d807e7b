//! # BatchWatch Repository
//!
//! Read access to a job's batches and the single status write used by the
//! batch checker.

use chrono::{DateTime, Utc};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use uuid::Uuid;

use crate::error::{RepositoryError, map_db_err};
use crate::models::batch_watch::{BatchStatus, Column, Entity, Model};

/// Repository for batch watch database operations
#[derive(Clone)]
pub struct BatchWatchRepository {
    db: DatabaseConnection,
}

impl BatchWatchRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// All batches of a job in creation order
    pub async fn list_for_job(&self, job_id: Uuid) -> Result<Vec<Model>, RepositoryError> {
        Entity::find()
            .filter(Column::JobId.eq(job_id))
            .order_by_asc(Column::CreatedAt)
            .order_by_asc(Column::RemoteBatchId)
            .all(&self.db)
            .await
            .map_err(|e| map_db_err("loading batch watches", e))
    }

    /// Batches of a job that still need checking
    pub async fn in_progress_for_job(&self, job_id: Uuid) -> Result<Vec<Model>, RepositoryError> {
        Entity::find()
            .filter(Column::JobId.eq(job_id))
            .filter(Column::Status.eq(BatchStatus::InProgress.as_str()))
            .order_by_asc(Column::CreatedAt)
            .order_by_asc(Column::RemoteBatchId)
            .all(&self.db)
            .await
            .map_err(|e| map_db_err("loading in-progress batches", e))
    }

    /// Move an in-progress batch to `status`.
    ///
    /// A terminal status stamps `completed_at`. The write only applies while
    /// the stored status is still `in_progress`, so terminal rows never
    /// change; returns whether the row was updated.
    pub async fn record_status(
        &self,
        batch_id: Uuid,
        status: BatchStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        if status == BatchStatus::InProgress {
            return Ok(false);
        }

        let completed_at: Option<DateTimeWithTimeZone> = Some(now.fixed_offset());
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(status.as_str()))
            .col_expr(Column::CompletedAt, Expr::value(completed_at))
            .filter(Column::Id.eq(batch_id))
            .filter(Column::Status.eq(BatchStatus::InProgress.as_str()))
            .exec(&self.db)
            .await
            .map_err(|e| map_db_err("recording batch status", e))?;

        Ok(result.rows_affected == 1)
    }
}
