//! Migration to create the jobs table.
//!
//! Each row is one job definition keyed externally by `job_id` and internally
//! by the auto-increment `id` that association and flow rows reference.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Jobs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Jobs::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Jobs::JobId).string().not_null())
                    .col(ColumnDef::new(Jobs::UpdateId).big_integer().not_null())
                    .col(
                        ColumnDef::new(Jobs::State)
                            .integer()
                            .not_null()
                            // INIT
                            .default(4),
                    )
                    .col(ColumnDef::new(Jobs::Content).text().null())
                    .col(
                        ColumnDef::new(Jobs::StartAfter)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Jobs::Node).string().null())
                    .col(ColumnDef::new(Jobs::Host).string().null())
                    .col(
                        ColumnDef::new(Jobs::Priority)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_jobs_job_id")
                    .table(Jobs::Table)
                    .col(Jobs::JobId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Readiness scans WAIT jobs in priority order.
        manager
            .create_index(
                Index::create()
                    .name("idx_jobs_state_priority")
                    .table(Jobs::Table)
                    .col(Jobs::State)
                    .col(Jobs::Priority)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_jobs_update_id_state")
                    .table(Jobs::Table)
                    .col(Jobs::UpdateId)
                    .col(Jobs::State)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_jobs_update_id_state").to_owned())
            .await?;
        manager
            .drop_index(Index::drop().name("idx_jobs_state_priority").to_owned())
            .await?;
        manager
            .drop_index(Index::drop().name("idx_jobs_job_id").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Jobs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub(crate) enum Jobs {
    Table,
    Id,
    JobId,
    UpdateId,
    State,
    Content,
    StartAfter,
    Node,
    Host,
    Priority,
}
