//! # CheckLog Repository
//!
//! Append-only audit trail. Rows are removed only together with their job.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use uuid::Uuid;

use crate::error::{RepositoryError, map_db_err};
use crate::models::check_log::{ActiveModel, Column, Entity, LogCategory, Model};

/// Repository for check log database operations
#[derive(Clone)]
pub struct CheckLogRepository {
    db: DatabaseConnection,
}

impl CheckLogRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Append one entry for a job
    pub async fn append(
        &self,
        job_id: Uuid,
        category: LogCategory,
        message: impl Into<String>,
    ) -> Result<Model, RepositoryError> {
        let entry = ActiveModel {
            id: Set(Uuid::new_v4()),
            job_id: Set(job_id),
            category: Set(category.as_str().to_string()),
            message: Set(message.into()),
            created_at: Set(Utc::now().fixed_offset()),
        };

        entry
            .insert(&self.db)
            .await
            .map_err(|e| map_db_err("appending check log", e))
    }

    /// Most recent entries for a job, newest first
    pub async fn list_for_job(
        &self,
        job_id: Uuid,
        limit: u64,
    ) -> Result<Vec<Model>, RepositoryError> {
        Entity::find()
            .filter(Column::JobId.eq(job_id))
            .order_by_desc(Column::CreatedAt)
            .limit(limit)
            .all(&self.db)
            .await
            .map_err(|e| map_db_err("loading check logs", e))
    }

    /// Entries of one category for a job, oldest first
    pub async fn list_by_category(
        &self,
        job_id: Uuid,
        category: LogCategory,
    ) -> Result<Vec<Model>, RepositoryError> {
        Entity::find()
            .filter(Column::JobId.eq(job_id))
            .filter(Column::Category.eq(category.as_str()))
            .order_by_asc(Column::CreatedAt)
            .all(&self.db)
            .await
            .map_err(|e| map_db_err("loading check logs by category", e))
    }
}
