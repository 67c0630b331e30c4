//! Migration to create the job_histories table.
//!
//! One row is appended per successful claim; completion fills in the
//! terminal columns.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(JobHistories::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(JobHistories::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(JobHistories::JobId).string().not_null())
                    .col(ColumnDef::new(JobHistories::Node).string().null())
                    .col(ColumnDef::new(JobHistories::Host).string().null())
                    .col(ColumnDef::new(JobHistories::Thread).string().null())
                    .col(
                        ColumnDef::new(JobHistories::BeginAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(JobHistories::EndAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(JobHistories::ExitCode).integer().null())
                    .col(ColumnDef::new(JobHistories::Description).text().null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_job_histories_job_id")
                    .table(JobHistories::Table)
                    .col(JobHistories::JobId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_job_histories_job_id").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(JobHistories::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum JobHistories {
    Table,
    Id,
    JobId,
    Node,
    Host,
    Thread,
    BeginAt,
    EndAt,
    ExitCode,
    Description,
}
