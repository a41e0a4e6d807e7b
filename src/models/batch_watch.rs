//! BatchWatch entity model
//!
//! This module contains the SeaORM entity model for the batch_watches table.
//! Each row tracks the lifecycle of one remote batch owned by a watch job.

use std::fmt;
use std::str::FromStr;

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::watch_job::UnknownStatus;

/// BatchWatch entity representing one tracked remote batch
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "batch_watches")]
pub struct Model {
    /// Unique identifier for the batch watch (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Owning watch job
    pub job_id: Uuid,

    /// Opaque identifier of the batch at the compute provider
    pub remote_batch_id: String,

    /// Lifecycle status, see [`BatchStatus`]
    pub status: String,

    /// Timestamp when the batch was added to the job
    pub created_at: DateTimeWithTimeZone,

    /// Timestamp of the first transition into a terminal status
    pub completed_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::watch_job::Entity",
        from = "Column::JobId",
        to = "super::watch_job::Column::Id",
        on_delete = "Cascade"
    )]
    WatchJob,
}

impl Related<super::watch_job::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::WatchJob.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Parsed status; an unrecognised value is treated as still in progress.
    pub fn batch_status(&self) -> BatchStatus {
        self.status.parse().unwrap_or(BatchStatus::InProgress)
    }

    pub fn is_terminal(&self) -> bool {
        self.batch_status().is_terminal()
    }
}

/// Lifecycle status of a tracked remote batch.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    InProgress,
    Completed,
    Failed,
    Cancelled,
    Expired,
}

impl BatchStatus {
    pub const ALL: [BatchStatus; 5] = [
        BatchStatus::InProgress,
        BatchStatus::Completed,
        BatchStatus::Failed,
        BatchStatus::Cancelled,
        BatchStatus::Expired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::InProgress => "in_progress",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
            BatchStatus::Cancelled => "cancelled",
            BatchStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, BatchStatus::InProgress)
    }

    /// Terminal, but not a success.
    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            BatchStatus::Failed | BatchStatus::Cancelled | BatchStatus::Expired
        )
    }

    /// Maps a provider lifecycle state onto the tracked statuses.
    ///
    /// Transitional provider states (`validating`, `finalizing`, `cancelling`)
    /// and anything unrecognised stay `InProgress` until the provider reports
    /// a terminal state.
    pub fn from_remote(state: &str) -> Self {
        match state.trim().to_ascii_lowercase().as_str() {
            "completed" => BatchStatus::Completed,
            "failed" => BatchStatus::Failed,
            "cancelled" => BatchStatus::Cancelled,
            "expired" => BatchStatus::Expired,
            _ => BatchStatus::InProgress,
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchStatus {
    type Err = UnknownStatus;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        BatchStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == value)
            .ok_or_else(|| UnknownStatus(value.to_string()))
    }
}
