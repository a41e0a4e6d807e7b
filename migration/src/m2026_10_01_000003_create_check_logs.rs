//! Migration to create the check_logs table.
//!
//! Append-only audit trail of checks, transitions, triggers and errors per
//! watch job.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CheckLogs::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(CheckLogs::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(CheckLogs::JobId).uuid().not_null())
                    .col(ColumnDef::new(CheckLogs::Category).string_len(32).not_null())
                    .col(ColumnDef::new(CheckLogs::Message).text().not_null())
                    .col(
                        ColumnDef::new(CheckLogs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_check_logs_job_id")
                            .from(CheckLogs::Table, CheckLogs::JobId)
                            .to(WatchJobs::Table, WatchJobs::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_check_logs_job_created")
                    .table(CheckLogs::Table)
                    .col(CheckLogs::JobId)
                    .col(CheckLogs::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_check_logs_job_created").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(CheckLogs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum CheckLogs {
    Table,
    Id,
    JobId,
    Category,
    Message,
    CreatedAt,
}

#[derive(DeriveIden)]
enum WatchJobs {
    Table,
    Id,
}
