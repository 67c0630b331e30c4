//! State transitions.
//!
//! Workers only ever move a job with a compare-and-set keyed by
//! `(job_id, expected state, update_id)`. Losing a race is an expected
//! outcome and reported as `None` / `false`, never as an error.

use std::fmt;

use sea_orm::prelude::Expr;
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set, TransactionTrait};
use tracing::{debug, error, info, instrument, warn};

use super::query::load_job;
use super::{JobStore, JobTicket, StoreError, db_now, find_job_row};
use crate::command::ExecutionUnit;
use crate::models::{ExitCode, Job, JobHistories, JobState, Jobs, job, job_history};

/// A successfully claimed job ready to be executed.
pub struct Offer {
    /// Id of the execution history row opened by the claim
    pub execution_id: i32,
    pub job: Job,
    pub unit: Box<dyn ExecutionUnit>,
}

impl fmt::Debug for Offer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Offer")
            .field("execution_id", &self.execution_id)
            .field("job_id", &self.job.job_id)
            .field("unit", &self.unit.describe())
            .finish()
    }
}

/// Outcome of an execution as reported by the worker that claimed it.
#[derive(Debug, Clone)]
pub struct Completion {
    pub ticket: JobTicket,
    pub execution_id: i32,
    /// Raw exit code; must be one of the known [`ExitCode`] values
    pub exit_code: i32,
    pub description: Option<String>,
}

/// Moves `job_id` from `prev` to `post` if it is still at `prev` under
/// `update_id`. Returns whether the row advanced.
pub(crate) async fn check_and_set_state<C: ConnectionTrait>(
    conn: &C,
    job_id: &str,
    update_id: i64,
    prev: JobState,
    post: JobState,
) -> Result<bool, StoreError> {
    let result = Jobs::update_many()
        .col_expr(job::Column::State, Expr::value(post))
        .filter(job::Column::JobId.eq(job_id))
        .filter(job::Column::State.eq(prev))
        .filter(job::Column::UpdateId.eq(update_id))
        .exec(conn)
        .await?;

    match result.rows_affected {
        0 => {
            info!(job_id, update_id, %prev, %post, "State already changed by another actor");
            Ok(false)
        }
        1 => Ok(true),
        rows => Err(StoreError::TooManyRows {
            job_id: job_id.to_string(),
            rows,
        }),
    }
}

impl JobStore {
    /// Claims a ticket for execution.
    ///
    /// Returns `None` when the job is no longer WAIT under the ticket's
    /// `update_id`. On success an execution history row is opened and the
    /// job's execution unit is built; if building fails the job is moved to
    /// FAILED (best effort) and the build error is returned.
    #[instrument(skip_all, fields(job_id = %ticket.job_id, update_id = ticket.update_id))]
    pub async fn offer_to_execute(&self, ticket: &JobTicket) -> Result<Option<Offer>, StoreError> {
        let txn = self.db.begin().await?;

        if !check_and_set_state(
            &txn,
            &ticket.job_id,
            ticket.update_id,
            JobState::Wait,
            JobState::Running,
        )
        .await?
        {
            debug!("Ticket lost to another worker or a redefinition");
            return Ok(None);
        }

        let history = job_history::ActiveModel {
            job_id: Set(ticket.job_id.clone()),
            node: Set(ticket.assignment.node.clone()),
            host: Set(ticket.assignment.host.clone()),
            thread: Set(ticket.assignment.thread.clone()),
            begin_at: Set(db_now()),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        let row = find_job_row(&txn, &ticket.job_id)
            .await?
            .ok_or_else(|| StoreError::JobVanished {
                job_id: ticket.job_id.clone(),
            })?;
        let job = load_job(&txn, row).await?;

        txn.commit().await?;

        match self.command_builder.build(&job) {
            Ok(unit) => {
                info!(execution_id = history.id, unit = %unit.describe(), "Claimed job");
                Ok(Some(Offer {
                    execution_id: history.id,
                    job,
                    unit,
                }))
            }
            Err(build_error) => {
                error!(error = %build_error, "Failed to build execution unit");
                match check_and_set_state(
                    self.db(),
                    &ticket.job_id,
                    ticket.update_id,
                    JobState::Running,
                    JobState::Failed,
                )
                .await
                {
                    Ok(true) => info!("Marked unbuildable job as FAILED"),
                    Ok(false) => warn!("Unbuildable job was moved by someone else"),
                    Err(revert_error) => {
                        error!(error = %revert_error, "Failed to mark unbuildable job as FAILED")
                    }
                }
                Err(StoreError::CommandBuild(build_error))
            }
        }
    }

    /// Records the end of an execution and moves the job to its terminal state.
    ///
    /// Unknown exit codes are rejected before anything is written. When the
    /// job is no longer RUNNING under the ticket's `update_id` nothing is
    /// changed and `false` is returned.
    #[instrument(
        skip_all,
        fields(
            job_id = %completion.ticket.job_id,
            execution_id = completion.execution_id,
            exit_code = completion.exit_code
        )
    )]
    pub async fn report_completion_status(
        &self,
        completion: &Completion,
    ) -> Result<bool, StoreError> {
        let exit_code = ExitCode::from_code(completion.exit_code)
            .ok_or(StoreError::UnknownExitCode(completion.exit_code))?;
        let post = exit_code.terminal_state();
        let ticket = &completion.ticket;

        let txn = self.db.begin().await?;

        let updated = JobHistories::update_many()
            .col_expr(job_history::Column::EndAt, Expr::value(db_now()))
            .col_expr(job_history::Column::ExitCode, Expr::value(exit_code.code()))
            .col_expr(
                job_history::Column::Description,
                Expr::value(completion.description.clone()),
            )
            .filter(job_history::Column::Id.eq(completion.execution_id))
            .filter(job_history::Column::JobId.eq(ticket.job_id.as_str()))
            .exec(&txn)
            .await?;
        if updated.rows_affected != 1 {
            warn!(
                rows = updated.rows_affected,
                "Completion matched an unexpected number of history rows"
            );
        }

        let advanced = check_and_set_state(
            &txn,
            &ticket.job_id,
            ticket.update_id,
            JobState::Running,
            post,
        )
        .await?;

        if advanced {
            txn.commit().await?;
            info!(state = %post, "Recorded job completion");
        } else {
            txn.rollback().await?;
            warn!("Completion arrived for a job that is no longer running under this ticket");
        }
        Ok(advanced)
    }

    /// Unconditionally sets `state` on the listed jobs.
    ///
    /// Administrative override without compare-and-set. The given `update_id`
    /// is stamped onto every listed job, which invalidates any ticket already
    /// handed out for it: such tickets can neither claim nor complete. The
    /// Initiator is never touched. Returns the number of rows changed.
    #[instrument(skip(self, job_ids), fields(jobs = job_ids.len()))]
    pub async fn set_state(
        &self,
        update_id: i64,
        job_ids: &[String],
        state: JobState,
    ) -> Result<u64, StoreError> {
        if job_ids.is_empty() {
            return Err(StoreError::NoJobsSelected);
        }

        let result = Jobs::update_many()
            .col_expr(job::Column::State, Expr::value(state))
            .col_expr(job::Column::UpdateId, Expr::value(update_id))
            .filter(job::Column::JobId.is_in(job_ids.iter().cloned()))
            .filter(job::Column::Id.ne(self.initiator_id))
            .exec(self.db())
            .await?;

        info!(rows = result.rows_affected, "Set job state");
        Ok(result.rows_affected)
    }
}
