//! Execution units
//!
//! A claimed job is turned into an [`ExecutionUnit`] by the store's
//! [`CommandBuilder`]. The default builder runs the job's `commands`
//! attribute through `sh -c`.

use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::models::{ExitCode, Job};

/// Attribute holding the shell command lines of a job.
pub const COMMANDS_ATTR: &str = "commands";

/// Errors raised while building or running an execution unit.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("job '{job_id}' has no runnable command: {reason}")]
    NotRunnable { job_id: String, reason: String },
    #[error("failed to spawn command for job '{job_id}': {source}")]
    Spawn {
        job_id: String,
        #[source]
        source: std::io::Error,
    },
}

/// Something a worker can execute for a claimed job.
#[async_trait]
pub trait ExecutionUnit: Send + Sync {
    /// Runs the unit to completion and reports how it ended.
    async fn execute(&self) -> Result<ExecutionOutcome, CommandError>;

    /// Short human readable description for logs.
    fn describe(&self) -> String;
}

/// Exit code and description reported back to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub exit_code: ExitCode,
    pub description: Option<String>,
}

/// Builds execution units from job definitions.
pub trait CommandBuilder: Send + Sync {
    fn build(&self, job: &Job) -> Result<Box<dyn ExecutionUnit>, CommandError>;
}

/// Builds [`ShellCommand`] units from the `commands` attribute.
#[derive(Debug, Default, Clone)]
pub struct ShellCommandBuilder;

impl CommandBuilder for ShellCommandBuilder {
    fn build(&self, job: &Job) -> Result<Box<dyn ExecutionUnit>, CommandError> {
        let not_runnable = |reason: &str| CommandError::NotRunnable {
            job_id: job.job_id.clone(),
            reason: reason.to_string(),
        };

        let commands = match job.attr(COMMANDS_ATTR) {
            Some(serde_json::Value::String(line)) => vec![line.clone()],
            Some(serde_json::Value::Array(lines)) => lines
                .iter()
                .map(|line| {
                    line.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| not_runnable("commands must be strings"))
                })
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => return Err(not_runnable("commands must be a string or a list")),
            None => return Err(not_runnable("missing 'commands' attribute")),
        };

        if commands.is_empty() || commands.iter().any(|line| line.trim().is_empty()) {
            return Err(not_runnable("empty command line"));
        }

        Ok(Box::new(ShellCommand {
            job_id: job.job_id.clone(),
            commands,
        }))
    }
}

/// Runs command lines sequentially, stopping at the first failure.
#[derive(Debug, Clone)]
pub struct ShellCommand {
    job_id: String,
    commands: Vec<String>,
}

impl ShellCommand {
    pub fn commands(&self) -> &[String] {
        &self.commands
    }
}

#[async_trait]
impl ExecutionUnit for ShellCommand {
    async fn execute(&self) -> Result<ExecutionOutcome, CommandError> {
        for line in &self.commands {
            debug!(job_id = %self.job_id, command = %line, "Running command");
            let status = Command::new("sh")
                .arg("-c")
                .arg(line)
                .stdin(Stdio::null())
                .status()
                .await
                .map_err(|source| CommandError::Spawn {
                    job_id: self.job_id.clone(),
                    source,
                })?;

            if !status.success() {
                warn!(job_id = %self.job_id, command = %line, %status, "Command failed");
                return Ok(ExecutionOutcome {
                    exit_code: ExitCode::Failed,
                    description: Some(format!("'{}' exited with {}", line, status)),
                });
            }
        }

        info!(job_id = %self.job_id, commands = self.commands.len(), "Commands finished");
        Ok(ExecutionOutcome {
            exit_code: ExitCode::Succeeded,
            description: None,
        })
    }

    fn describe(&self) -> String {
        format!("sh -c {:?}", self.commands)
    }
}
