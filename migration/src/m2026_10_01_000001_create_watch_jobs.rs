//! Migration to create the watch_jobs table.
//!
//! A watch job groups the remote batches being monitored together with the
//! downstream Keboola target that fires once all of them are terminal.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(WatchJobs::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(WatchJobs::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(WatchJobs::Name).string_len(255).not_null())
                    .col(ColumnDef::new(WatchJobs::TargetStackUrl).string_len(500).not_null())
                    .col(ColumnDef::new(WatchJobs::TargetComponentId).string_len(255).not_null())
                    .col(
                        ColumnDef::new(WatchJobs::TargetConfigurationId)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WatchJobs::PollIntervalSeconds)
                            .integer()
                            .not_null()
                            .default(120),
                    )
                    .col(
                        ColumnDef::new(WatchJobs::Status)
                            .string_len(32)
                            .not_null()
                            .default("active"),
                    )
                    .col(
                        ColumnDef::new(WatchJobs::LastCheckAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(WatchJobs::NextCheckAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(WatchJobs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(WatchJobs::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(WatchJobs::CompletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Due-job selection filters on status and orders by next_check_at
        manager
            .create_index(
                Index::create()
                    .name("idx_watch_jobs_status_next_check")
                    .table(WatchJobs::Table)
                    .col(WatchJobs::Status)
                    .col(WatchJobs::NextCheckAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_watch_jobs_status_next_check")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(WatchJobs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum WatchJobs {
    Table,
    Id,
    Name,
    TargetStackUrl,
    TargetComponentId,
    TargetConfigurationId,
    PollIntervalSeconds,
    Status,
    LastCheckAt,
    NextCheckAt,
    CreatedAt,
    UpdatedAt,
    CompletedAt,
}
