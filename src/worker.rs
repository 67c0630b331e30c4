//! Worker
//!
//! Polls the readiness query, claims tickets, runs their execution units with
//! bounded concurrency and reports completion back to the store.

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use rand::{Rng, thread_rng};
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::command::ExecutionOutcome;
use crate::config::WorkerConfig;
use crate::models::ExitCode;
use crate::repositories::{Assignment, Completion, JobStore, JobTicket, StoreError, TicketOptions};

/// What happened to a single ticket during a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketOutcome {
    /// Executed and the completion was recorded
    Completed,
    /// Executed but the job was moved by someone else meanwhile
    Superseded,
    /// Another worker claimed it first
    Lost,
}

/// Polling worker bound to one host and a set of nodes
pub struct Worker {
    store: Arc<JobStore>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(store: Arc<JobStore>, config: WorkerConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Runs ticks until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            host = %self.config.host,
            nodes = ?self.config.nodes,
            tick_ms = self.config.tick_ms,
            concurrency = self.config.concurrency,
            "Starting worker"
        );

        loop {
            let start = Instant::now();

            match self.tick().await {
                Ok(0) => {}
                Ok(count) => debug!(count, "Processed tickets"),
                Err(e) => error!(error = %e, "Worker tick failed"),
            }

            let tick = Duration::from_millis(self.config.tick_ms);
            let jitter = Duration::from_millis(thread_rng().gen_range(0..=self.config.jitter_ms));
            let delay = tick.saturating_sub(start.elapsed()) + jitter;

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Worker shutting down");
                    break;
                }
                _ = sleep(delay) => {}
            }
        }
    }

    /// Fetches ready tickets once and processes them.
    ///
    /// Returns how many tickets were claimed and executed by this worker.
    #[instrument(skip(self), fields(host = %self.config.host))]
    pub async fn tick(&self) -> Result<usize, StoreError> {
        let tickets = self
            .store
            .get_job_tickets(
                &self.config.host,
                &self.config.nodes,
                &TicketOptions {
                    fetch_limit: Some(self.config.fetch_limit),
                },
            )
            .await?;

        if tickets.is_empty() {
            debug!("No ready jobs");
            return Ok(0);
        }

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut handles = Vec::with_capacity(tickets.len());

        for (slot, ticket) in tickets.into_iter().enumerate() {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                warn!("Worker semaphore closed");
                break;
            };
            let assignment = Assignment {
                node: ticket
                    .node
                    .clone()
                    .or_else(|| self.config.nodes.first().cloned()),
                host: Some(self.config.host.clone()),
                thread: Some(format!("worker-{}", slot)),
            };
            let store = self.store.clone();
            let ticket = ticket.assigned(assignment);

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let job_id = ticket.job_id.clone();
                match process_ticket(&store, ticket).await {
                    Ok(outcome) => Some(outcome),
                    Err(e) => {
                        error!(job_id = %job_id, error = %e, "Failed to process ticket");
                        None
                    }
                }
            }));
        }

        let mut executed = 0;
        for handle in handles {
            match handle.await {
                Ok(Some(TicketOutcome::Completed | TicketOutcome::Superseded)) => executed += 1,
                Ok(_) => {}
                Err(e) => error!(error = %e, "Ticket task panicked"),
            }
        }

        Ok(executed)
    }
}

/// Claims, executes and reports one ticket.
#[instrument(skip_all, fields(job_id = %ticket.job_id, update_id = ticket.update_id))]
pub async fn process_ticket(store: &JobStore, ticket: JobTicket) -> Result<TicketOutcome, StoreError> {
    let Some(offer) = store.offer_to_execute(&ticket).await? else {
        counter!("jobstore_claims_lost_total").increment(1);
        return Ok(TicketOutcome::Lost);
    };
    counter!("jobstore_jobs_claimed_total").increment(1);

    let started = Instant::now();
    let outcome = match offer.unit.execute().await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(error = %e, "Execution unit failed to run");
            ExecutionOutcome {
                exit_code: ExitCode::Failed,
                description: Some(e.to_string()),
            }
        }
    };
    histogram!("jobstore_job_duration_seconds").record(started.elapsed().as_secs_f64());

    let state = outcome.exit_code.terminal_state();
    let completion = Completion {
        ticket,
        execution_id: offer.execution_id,
        exit_code: outcome.exit_code.code(),
        description: outcome.description,
    };

    if store.report_completion_status(&completion).await? {
        counter!("jobstore_jobs_completed_total", "state" => state.name()).increment(1);
        Ok(TicketOutcome::Completed)
    } else {
        counter!("jobstore_completions_superseded_total").increment(1);
        Ok(TicketOutcome::Superseded)
    }
}
