//! # batchwatch
//!
//! Polls long-running OpenAI batch jobs and, once every batch of a watch job
//! has reached a terminal state, triggers a Keboola Connection job exactly
//! once with a summary of the results.

pub mod batch_checker;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod integrations;
pub mod job_coordinator;
pub mod limiter;
pub mod models;
pub mod orchestrator;
pub mod repositories;
pub mod retry_policy;
pub mod telemetry;
pub use migration;
