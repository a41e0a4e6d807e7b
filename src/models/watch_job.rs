//! WatchJob entity model
//!
//! This module contains the SeaORM entity model for the watch_jobs table,
//! which groups the remote batches being watched together with the downstream
//! target that is triggered once every batch is terminal.

use std::fmt;
use std::str::FromStr;

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::integrations::TriggerTarget;

/// WatchJob entity representing one monitored unit of work
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "watch_jobs")]
pub struct Model {
    /// Unique identifier for the watch job (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Human-readable name
    pub name: String,

    /// Base URL of the Keboola stack to trigger
    pub target_stack_url: String,

    /// Keboola component id of the configuration to run
    pub target_component_id: String,

    /// Keboola configuration id to run
    pub target_configuration_id: String,

    /// Seconds between polling cycles
    pub poll_interval_seconds: i32,

    /// Lifecycle status, see [`JobStatus`]
    pub status: String,

    /// Timestamp of the most recent polling cycle
    pub last_check_at: Option<DateTimeWithTimeZone>,

    /// Timestamp when the job becomes due again; `None` removes it from scheduling
    pub next_check_at: Option<DateTimeWithTimeZone>,

    /// Timestamp when the job was created
    pub created_at: DateTimeWithTimeZone,

    /// Timestamp when the job was last updated
    pub updated_at: DateTimeWithTimeZone,

    /// Timestamp when the job reached a final status
    pub completed_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::batch_watch::Entity")]
    BatchWatches,
    #[sea_orm(has_many = "super::check_log::Entity")]
    CheckLogs,
}

impl Related<super::batch_watch::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::BatchWatches.def()
    }
}

impl Related<super::check_log::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CheckLogs.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Parsed lifecycle status. Unknown values are treated as `Failed` so they
    /// are never scheduled.
    pub fn job_status(&self) -> JobStatus {
        self.status.parse().unwrap_or(JobStatus::Failed)
    }

    /// Downstream target reference for the trigger.
    pub fn target(&self) -> TriggerTarget {
        TriggerTarget {
            stack_url: self.target_stack_url.clone(),
            component_id: self.target_component_id.clone(),
            configuration_id: self.target_configuration_id.clone(),
            tag: Some(format!("batchwatch-{}", self.id)),
        }
    }
}

/// Lifecycle status of a watch job.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Active,
    Paused,
    Completed,
    CompletedWithFailures,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Active,
        JobStatus::Paused,
        JobStatus::Completed,
        JobStatus::CompletedWithFailures,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Active => "active",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::CompletedWithFailures => "completed_with_failures",
            JobStatus::Failed => "failed",
        }
    }

    /// Whether the job has left the polling lifecycle for good.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::CompletedWithFailures | JobStatus::Failed
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == value)
            .ok_or_else(|| UnknownStatus(value.to_string()))
    }
}

/// Returned when a stored status string does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown status value '{0}'")]
pub struct UnknownStatus(pub String);
