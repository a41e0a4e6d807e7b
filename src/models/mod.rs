//! # Data Models
//!
//! SeaORM entities for the three persisted tables and the typed status enums
//! backing their string columns.

pub mod batch_watch;
pub mod check_log;
pub mod watch_job;

pub use batch_watch::{BatchStatus, Entity as BatchWatch};
pub use check_log::{Entity as CheckLog, LogCategory};
pub use watch_job::{Entity as WatchJob, JobStatus};
