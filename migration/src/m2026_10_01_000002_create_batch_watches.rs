//! Migration to create the batch_watches table.
//!
//! Each row tracks one remote batch owned by a watch job. A remote batch id
//! may appear at most once per job.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(BatchWatches::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(BatchWatches::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(BatchWatches::JobId).uuid().not_null())
                    .col(
                        ColumnDef::new(BatchWatches::RemoteBatchId)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(BatchWatches::Status)
                            .string_len(32)
                            .not_null()
                            .default("in_progress"),
                    )
                    .col(
                        ColumnDef::new(BatchWatches::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(BatchWatches::CompletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_batch_watches_job_id")
                            .from(BatchWatches::Table, BatchWatches::JobId)
                            .to(WatchJobs::Table, WatchJobs::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_batch_watches_job_remote_unique")
                    .table(BatchWatches::Table)
                    .col(BatchWatches::JobId)
                    .col(BatchWatches::RemoteBatchId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_batch_watches_status")
                    .table(BatchWatches::Table)
                    .col(BatchWatches::Status)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_batch_watches_job_remote_unique")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(Index::drop().name("idx_batch_watches_status").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(BatchWatches::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum BatchWatches {
    Table,
    Id,
    JobId,
    RemoteBatchId,
    Status,
    CreatedAt,
    CompletedAt,
}

#[derive(DeriveIden)]
enum WatchJobs {
    Table,
    Id,
}
