//! Database migrations for batchwatch.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2026_10_01_000001_create_watch_jobs;
mod m2026_10_01_000002_create_batch_watches;
mod m2026_10_01_000003_create_check_logs;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2026_10_01_000001_create_watch_jobs::Migration),
            Box::new(m2026_10_01_000002_create_batch_watches::Migration),
            Box::new(m2026_10_01_000003_create_check_logs::Migration),
        ]
    }
}
