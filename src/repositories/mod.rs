//! # Repository Layer
//!
//! Repository types that encapsulate SeaORM operations for the three tables.
//! Status columns of batches are only written through
//! [`BatchWatchRepository::record_status`].

pub mod batch_watch;
pub mod check_log;
pub mod watch_job;

pub use batch_watch::BatchWatchRepository;
pub use check_log::CheckLogRepository;
pub use watch_job::{
    NewWatchJob, SystemStats, WatchJobDetails, WatchJobRepository, WatchJobUpdate,
};
