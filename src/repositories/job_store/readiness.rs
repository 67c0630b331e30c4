//! Readiness selection.

use sea_orm::{ConnectionTrait, DbBackend, Statement, Value};
use tracing::{debug, instrument};

use super::{JobStore, JobTicket, StoreError, db_now};
use crate::models::JobState;

/// Options for [`JobStore::get_job_tickets`].
#[derive(Debug, Clone, Default)]
pub struct TicketOptions {
    /// Maximum number of tickets to return
    pub fetch_limit: Option<u64>,
}

/// Collects bind values and renders the placeholder syntax of the backend.
struct Binder {
    backend: DbBackend,
    values: Vec<Value>,
}

impl Binder {
    fn new(backend: DbBackend) -> Self {
        Self {
            backend,
            values: Vec::new(),
        }
    }

    fn bind(&mut self, value: impl Into<Value>) -> String {
        self.values.push(value.into());
        match self.backend {
            DbBackend::Postgres => format!("${}", self.values.len()),
            _ => "?".to_string(),
        }
    }
}

fn ticket_statement(
    backend: DbBackend,
    host: &str,
    nodes: &[String],
    options: &TicketOptions,
) -> Statement {
    let mut binder = Binder::new(backend);

    let wait = binder.bind(JobState::Wait.code());
    let node_clause = if nodes.is_empty() {
        "c.node IS NULL".to_string()
    } else {
        let placeholders: Vec<String> = nodes.iter().map(|node| binder.bind(node.clone())).collect();
        format!("(c.node IS NULL OR c.node IN ({}))", placeholders.join(", "))
    };
    let host_param = binder.bind(host.to_string());
    let now = binder.bind(db_now());
    let succeeded = binder.bind(JobState::Succeeded.code());

    let mut sql = format!(
        "SELECT c.job_id AS job_id, c.update_id AS update_id, c.node AS node \
         FROM flows f \
         JOIN jobs c ON c.id = f.consumer_id \
         JOIN jobs p ON p.id = f.producer_id \
         WHERE c.state = {wait} \
         AND {node_clause} \
         AND (c.host IS NULL OR c.host = {host_param}) \
         AND c.content IS NOT NULL \
         AND (c.start_after IS NULL OR c.start_after <= {now}) \
         GROUP BY c.id, c.job_id, c.update_id, c.node, c.priority \
         HAVING MIN(CASE WHEN p.state = {succeeded} THEN 1 ELSE 0 END) = 1 \
         ORDER BY c.priority ASC, c.id ASC"
    );
    if let Some(limit) = options.fetch_limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }

    Statement::from_sql_and_values(backend, sql, binder.values)
}

impl JobStore {
    /// Returns tickets for every job that may run now on `host` / `nodes`.
    ///
    /// A job is ready when it is WAIT, its affinity matches, it is fully
    /// defined, its start time has passed and every producer on its incoming
    /// flow edges has SUCCEEDED. Tickets come back by ascending priority.
    /// This is a read; claiming happens in [`JobStore::offer_to_execute`].
    #[instrument(skip(self, options), fields(fetch_limit = ?options.fetch_limit))]
    pub async fn get_job_tickets(
        &self,
        host: &str,
        nodes: &[String],
        options: &TicketOptions,
    ) -> Result<Vec<JobTicket>, StoreError> {
        let db = self.db();
        let statement = ticket_statement(db.get_database_backend(), host, nodes, options);

        let rows = db.query_all(statement).await?;
        let tickets = rows
            .into_iter()
            .map(|row| {
                Ok(JobTicket::new(
                    row.try_get::<String>("", "job_id")?,
                    row.try_get::<i64>("", "update_id")?,
                    row.try_get::<Option<String>>("", "node")?,
                ))
            })
            .collect::<Result<Vec<_>, sea_orm::DbErr>>()?;

        debug!(count = tickets.len(), "Selected ready jobs");
        Ok(tickets)
    }
}
