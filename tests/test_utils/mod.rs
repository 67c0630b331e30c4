//! Test utilities for database testing.
//!
//! Sets up in-memory SQLite stores with migrations applied and the Initiator
//! seeded, plus helpers for inspecting the flow graph.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use jobstore::db::prepare_schema;
use jobstore::models::{Flows, Job, JobState, Jobs};
use jobstore::repositories::JobStore;
use sea_orm::{Database, DatabaseConnection, EntityTrait};

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    prepare_schema(&db).await?;
    Ok(db)
}

/// Opens a job store over a fresh in-memory database.
pub async fn setup_store() -> Result<Arc<JobStore>> {
    let db = setup_test_db().await?;
    Ok(Arc::new(JobStore::new(Arc::new(db)).await?))
}

/// A job that runs `true` when claimed.
pub fn runnable(job_id: &str) -> Job {
    Job::new(job_id).with_attr("commands", serde_json::json!(["true"]))
}

/// All flow edges as `(producer job_id, consumer job_id)`, sorted.
pub async fn edges(store: &JobStore) -> Result<Vec<(String, String)>> {
    let names: HashMap<i32, String> = Jobs::find()
        .all(store.db())
        .await?
        .into_iter()
        .map(|row| (row.id, row.job_id))
        .collect();

    let mut edges: Vec<(String, String)> = Flows::find()
        .all(store.db())
        .await?
        .into_iter()
        .map(|edge| {
            (
                names[&edge.producer_id].clone(),
                names[&edge.consumer_id].clone(),
            )
        })
        .collect();
    edges.sort();
    Ok(edges)
}

/// Current state of a job.
pub async fn state_of(store: &JobStore, job_id: &str) -> Result<JobState> {
    let job = store
        .get_job(job_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("job {} not found", job_id))?;
    job.state()
        .ok_or_else(|| anyhow::anyhow!("job {} has no state", job_id))
}

pub fn pair(producer: &str, consumer: &str) -> (String, String) {
    (producer.to_string(), consumer.to_string())
}
