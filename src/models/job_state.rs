//! Job lifecycle states and execution exit codes.

use std::fmt;
use std::str::FromStr;

use sea_orm::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(
    Clone,
    Copy,
    Debug,
    DeriveActiveEnum,
    Deserialize,
    EnumIter,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
    ToSchema,
)]
#[sea_orm(rs_type = "i32", db_type = "Integer")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
/// State a job can be in
pub enum JobState {
    /// Failed
    ///
    /// The last execution exited with a failure code. Stays here until an
    /// operator or a redefinition moves it.
    Failed = -1,
    /// Succeeded
    ///
    /// The last execution completed. Consumers of this job's products may run.
    Succeeded = 0,
    /// Wait
    ///
    /// Published and eligible for execution once every producer has succeeded.
    Wait = 1,
    /// Running
    ///
    /// Claimed by a worker.
    Running = 2,
    /// Suspend
    Suspend = 3,
    /// Init
    ///
    /// Written by an in-progress registration batch and not yet published.
    Init = 4,
    /// Discarded
    Discarded = 5,
}

impl JobState {
    /// Numeric code persisted in the `state` column.
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Resolves a persisted numeric code.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            -1 => Some(Self::Failed),
            0 => Some(Self::Succeeded),
            1 => Some(Self::Wait),
            2 => Some(Self::Running),
            3 => Some(Self::Suspend),
            4 => Some(Self::Init),
            5 => Some(Self::Discarded),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Failed => "FAILED",
            Self::Succeeded => "SUCCEEDED",
            Self::Wait => "WAIT",
            Self::Running => "RUNNING",
            Self::Suspend => "SUSPEND",
            Self::Init => "INIT",
            Self::Discarded => "DISCARDED",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when a state name or code is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown job state '{0}'")]
pub struct UnknownJobState(pub String);

impl FromStr for JobState {
    type Err = UnknownJobState;

    /// Accepts either the state name (case-insensitive) or its numeric code.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if let Ok(code) = trimmed.parse::<i32>() {
            return Self::from_code(code).ok_or_else(|| UnknownJobState(value.to_string()));
        }
        match trimmed.to_ascii_uppercase().as_str() {
            "FAILED" => Ok(Self::Failed),
            "SUCCEEDED" => Ok(Self::Succeeded),
            "WAIT" => Ok(Self::Wait),
            "RUNNING" => Ok(Self::Running),
            "SUSPEND" => Ok(Self::Suspend),
            "INIT" => Ok(Self::Init),
            "DISCARDED" => Ok(Self::Discarded),
            _ => Err(UnknownJobState(value.to_string())),
        }
    }
}

/// Exit codes a worker reports when an execution finishes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitCode {
    Succeeded = 0,
    Failed = 1,
    /// The command failed but asked for the failure to be ignored.
    FailureSkipped = 2,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Succeeded),
            1 => Some(Self::Failed),
            2 => Some(Self::FailureSkipped),
            _ => None,
        }
    }

    /// Terminal job state recorded for this exit code.
    pub fn terminal_state(self) -> JobState {
        match self {
            Self::Succeeded | Self::FailureSkipped => JobState::Succeeded,
            Self::Failed => JobState::Failed,
        }
    }
}
