//! Database migrations for the job store.
//!
//! Creates the job, flow, product association and execution history tables.

pub use sea_orm_migration::prelude::*;

mod m2025_01_10_000001_create_jobs;
mod m2025_01_10_000002_create_product_associations;
mod m2025_01_10_000003_create_flows;
mod m2025_01_10_000004_create_job_histories;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_01_10_000001_create_jobs::Migration),
            Box::new(m2025_01_10_000002_create_product_associations::Migration),
            Box::new(m2025_01_10_000003_create_flows::Migration),
            Box::new(m2025_01_10_000004_create_job_histories::Migration),
        ]
    }
}
