//! CheckLog entity model
//!
//! Append-only audit records written by the polling engine.

use std::fmt;

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "check_logs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Owning watch job
    pub job_id: Uuid,

    /// One of [`LogCategory`]
    pub category: String,

    #[sea_orm(column_type = "Text")]
    pub message: String,

    pub created_at: DateTimeWithTimeZone,
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

/// Category of a check log entry.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogCategory {
    Checking,
    Success,
    Failed,
    Error,
    Triggered,
}

impl LogCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogCategory::Checking => "checking",
            LogCategory::Success => "success",
            LogCategory::Failed => "failed",
            LogCategory::Error => "error",
            LogCategory::Triggered => "triggered",
        }
    }
}

impl fmt::Display for LogCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
