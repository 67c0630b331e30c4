//! Migration to create the producers and consumers tables.
//!
//! Both tables associate a job (by internal id) with a product name. The
//! composite primary key makes repeated association inserts idempotent.

use sea_orm_migration::prelude::*;

use crate::m2025_01_10_000001_create_jobs::Jobs;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Producers::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Producers::JobId).integer().not_null())
                    .col(ColumnDef::new(Producers::Product).string().not_null())
                    .primary_key(
                        Index::create()
                            .col(Producers::JobId)
                            .col(Producers::Product),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_producers_job_id")
                            .from(Producers::Table, Producers::JobId)
                            .to(Jobs::Table, Jobs::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Consumers::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Consumers::JobId).integer().not_null())
                    .col(ColumnDef::new(Consumers::Product).string().not_null())
                    .primary_key(
                        Index::create()
                            .col(Consumers::JobId)
                            .col(Consumers::Product),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_consumers_job_id")
                            .from(Consumers::Table, Consumers::JobId)
                            .to(Jobs::Table, Jobs::Id),
                    )
                    .to_owned(),
            )
            .await?;

        // Edge recomputation looks associations up by product name.
        manager
            .create_index(
                Index::create()
                    .name("idx_producers_product")
                    .table(Producers::Table)
                    .col(Producers::Product)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_consumers_product")
                    .table(Consumers::Table)
                    .col(Consumers::Product)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_consumers_product").to_owned())
            .await?;
        manager
            .drop_index(Index::drop().name("idx_producers_product").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Consumers::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Producers::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Producers {
    Table,
    JobId,
    Product,
}

#[derive(DeriveIden)]
enum Consumers {
    Table,
    JobId,
    Product,
}
