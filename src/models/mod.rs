//! # Data Models
//!
//! SeaORM entities for the job store tables plus the job definition type
//! exchanged with clients.

pub mod consumer;
pub mod definition;
pub mod flow;
pub mod job;
pub mod job_history;
pub mod job_state;
pub mod producer;

pub use consumer::Entity as Consumers;
pub use definition::{INITIATOR_JOB_ID, Job, JobAttributes};
pub use flow::Entity as Flows;
pub use job::Entity as Jobs;
pub use job_history::Entity as JobHistories;
pub use job_state::{ExitCode, JobState};
pub use producer::Entity as Producers;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Service information returned by the root endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "jobstore".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
