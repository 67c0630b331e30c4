//! Migration to create the flows table.
//!
//! A flow row is a derived dependency edge from a producer job to a consumer
//! job, both referenced by internal id.

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
                    .table(Flows::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Flows::ProducerId).integer().not_null())
                    .col(ColumnDef::new(Flows::ConsumerId).integer().not_null())
                    .primary_key(
                        Index::create()
                            .col(Flows::ProducerId)
                            .col(Flows::ConsumerId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_flows_producer_id")
                            .from(Flows::Table, Flows::ProducerId)
                            .to(Jobs::Table, Jobs::Id),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_flows_consumer_id")
                            .from(Flows::Table, Flows::ConsumerId)
                            .to(Jobs::Table, Jobs::Id),
                    )
                    .to_owned(),
            )
            .await?;

        // The readiness join starts from the consumer side.
        manager
            .create_index(
                Index::create()
                    .name("idx_flows_consumer_id")
                    .table(Flows::Table)
                    .col(Flows::ConsumerId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_flows_consumer_id").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Flows::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Flows {
    Table,
    ProducerId,
    ConsumerId,
}
