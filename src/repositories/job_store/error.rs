//! Errors raised by job store operations.

use sea_orm::DbErr;
use thiserror::Error;

use crate::command::CommandError;
use crate::models::INITIATOR_JOB_ID;

/// Broad classification used by callers to decide how to surface an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The caller supplied something the store refuses to act on.
    Validation,
    /// Persisted data contradicts the store's own invariants.
    Consistency,
    /// A claimed job could not be turned into an execution unit.
    Execution,
    /// The storage backend failed.
    Storage,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job '{job_id}' is not acceptable: {reason}")]
    Unacceptable { job_id: String, reason: String },
    #[error("update_id is required to register new job '{job_id}'")]
    MissingUpdateId { job_id: String },
    #[error("unknown exit code {0}")]
    UnknownExitCode(i32),
    #[error("no job ids given")]
    NoJobsSelected,
    #[error("invalid options: {0}")]
    InvalidOptions(String),
    #[error("{count} rows share job_id '{job_id}'")]
    DuplicateJob { job_id: String, count: usize },
    #[error("job '{job_id}' disappeared after being claimed")]
    JobVanished { job_id: String },
    #[error("state update for job '{job_id}' touched {rows} rows")]
    TooManyRows { job_id: String, rows: u64 },
    #[error("stored content of job '{job_id}' is unreadable: {reason}")]
    CorruptContent { job_id: String, reason: String },
    #[error("the {} job is missing; run the seeds before starting the store", INITIATOR_JOB_ID)]
    MissingInitiator,
    #[error("failed to build execution unit: {0}")]
    CommandBuild(#[from] CommandError),
    #[error("database error: {0}")]
    Database(#[from] DbErr),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Unacceptable { .. }
            | StoreError::MissingUpdateId { .. }
            | StoreError::UnknownExitCode(_)
            | StoreError::NoJobsSelected
            | StoreError::InvalidOptions(_) => ErrorKind::Validation,
            StoreError::DuplicateJob { .. }
            | StoreError::JobVanished { .. }
            | StoreError::TooManyRows { .. }
            | StoreError::CorruptContent { .. }
            | StoreError::MissingInitiator => ErrorKind::Consistency,
            StoreError::CommandBuild(_) => ErrorKind::Execution,
            StoreError::Database(_) => ErrorKind::Storage,
        }
    }
}
