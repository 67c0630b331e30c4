//! # Job Store
//!
//! Relational job store shared by every scheduler instance and worker. All
//! coordination happens through the database: registration batches are
//! published atomically, readiness is a single query and every state change a
//! worker makes is a compare-and-set keyed by `(job_id, state, update_id)`.
//!
//! The operations are grouped by component:
//!
//! * [`register`](JobStore::register) maintains product associations and flow edges
//! * [`get_job_tickets`](JobStore::get_job_tickets) selects ready work
//! * [`offer_to_execute`](JobStore::offer_to_execute),
//!   [`report_completion_status`](JobStore::report_completion_status) and
//!   [`set_state`](JobStore::set_state) move jobs through their lifecycle
//! * [`get_graph`](JobStore::get_graph) walks the dependency graph
//! * the remaining read and delete operations live in `query`

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, QuerySelect,
};
use serde::Serialize;
use tracing::info;

use crate::command::{CommandBuilder, ShellCommandBuilder};
use crate::models::{INITIATOR_JOB_ID, Jobs, job};

mod error;
mod graph;
mod query;
mod readiness;
mod register;
mod transition;

pub use error::{ErrorKind, StoreError};
pub use graph::{GraphNode, GraphOptions, JobGraph};
pub use query::{FindOptions, HistoryOptions, HistoryOrder, JobSummary, Projection, SizeOptions};
pub use readiness::TicketOptions;
pub use transition::{Completion, Offer};

/// Handle to a ready job as returned by the readiness query.
///
/// The `assignment` describes who is about to claim it and is recorded in the
/// execution history on a successful claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobTicket {
    pub job_id: String,
    pub update_id: i64,
    /// Node affinity of the job at selection time
    pub node: Option<String>,
    pub assignment: Assignment,
}

/// Identity of the worker claiming a ticket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Assignment {
    pub node: Option<String>,
    pub host: Option<String>,
    pub thread: Option<String>,
}

impl JobTicket {
    pub fn new(job_id: impl Into<String>, update_id: i64, node: Option<String>) -> Self {
        Self {
            job_id: job_id.into(),
            update_id,
            node,
            assignment: Assignment::default(),
        }
    }

    pub fn assigned(mut self, assignment: Assignment) -> Self {
        self.assignment = assignment;
        self
    }
}

/// Job store over a shared relational database
pub struct JobStore {
    db: Arc<DatabaseConnection>,
    initiator_id: i32,
    command_builder: Arc<dyn CommandBuilder>,
}

impl JobStore {
    /// Opens the store, resolving the Initiator job's internal id once.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MissingInitiator`] when the Initiator row has not
    /// been seeded.
    pub async fn new(db: Arc<DatabaseConnection>) -> Result<Self, StoreError> {
        let initiator_id = Jobs::find()
            .select_only()
            .column(job::Column::Id)
            .filter(job::Column::JobId.eq(INITIATOR_JOB_ID))
            .into_tuple::<i32>()
            .one(db.as_ref())
            .await?
            .ok_or(StoreError::MissingInitiator)?;

        info!(initiator_id, "Job store ready");

        Ok(Self {
            db,
            initiator_id,
            command_builder: Arc::new(ShellCommandBuilder),
        })
    }

    /// Replaces the builder used to turn claimed jobs into execution units.
    pub fn with_command_builder(mut self, builder: Arc<dyn CommandBuilder>) -> Self {
        self.command_builder = builder;
        self
    }

    pub fn db(&self) -> &DatabaseConnection {
        self.db.as_ref()
    }
}

/// Current time as stored in timestamp columns (UTC, whole seconds).
pub(crate) fn db_now() -> DateTimeWithTimeZone {
    to_db_time(Utc::now())
}

pub(crate) fn to_db_time(value: DateTime<Utc>) -> DateTimeWithTimeZone {
    DateTime::<Utc>::from_timestamp(value.timestamp(), 0)
        .unwrap_or(value)
        .into()
}

/// Loads the single row for `job_id`, if any.
pub(crate) async fn find_job_row<C: ConnectionTrait>(
    conn: &C,
    job_id: &str,
) -> Result<Option<job::Model>, StoreError> {
    let mut rows = Jobs::find()
        .filter(job::Column::JobId.eq(job_id))
        .all(conn)
        .await?;

    match rows.len() {
        0 => Ok(None),
        1 => Ok(rows.pop()),
        count => Err(StoreError::DuplicateJob {
            job_id: job_id.to_string(),
            count,
        }),
    }
}
