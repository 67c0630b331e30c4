//! Read-only queries plus job deletion.

use std::collections::BTreeMap;

use sea_orm::prelude::Expr;
use sea_orm::{
    ColumnTrait, ConnectionTrait, EntityTrait, Order, QueryFilter, QueryOrder, QuerySelect,
    QueryTrait, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

use super::{JobStore, StoreError, find_job_row};
use crate::models::definition::{
    EXEC_HOST_ATTR, EXEC_NODE_ATTR, PRIORITY_ATTR, PRODUCTS_ATTR, REQUISITES_ATTR,
    START_DATETIME_ATTR, STATE_ATTR,
};
use crate::models::{
    Consumers, Flows, Job, JobAttributes, JobHistories, JobState, Jobs, Producers, consumer, flow,
    job, job_history, producer,
};

/// Job attributes that can be projected by producer/consumer lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Projection {
    State,
    Priority,
    StartDatetime,
    ExecNode,
    ExecHost,
}

impl Projection {
    pub fn key(self) -> &'static str {
        match self {
            Projection::State => STATE_ATTR,
            Projection::Priority => PRIORITY_ATTR,
            Projection::StartDatetime => START_DATETIME_ATTR,
            Projection::ExecNode => EXEC_NODE_ATTR,
            Projection::ExecHost => EXEC_HOST_ATTR,
        }
    }

    fn value(self, row: &job::Model) -> JsonValue {
        match self {
            Projection::State => json!(row.state),
            Projection::Priority => json!(row.priority),
            Projection::StartDatetime => json!(row.start_after.map(|at| at.to_rfc3339())),
            Projection::ExecNode => json!(row.node),
            Projection::ExecHost => json!(row.host),
        }
    }
}

/// A job id with a projection of its column attributes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSummary {
    pub job_id: String,
    #[serde(flatten)]
    pub attributes: JobAttributes,
}

/// Options for [`JobStore::find_jobs_by_state`].
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    /// SQL `LIKE` pattern applied to `job_id`
    pub filter_exp: Option<String>,
    pub limit: Option<u64>,
    /// Only valid together with `limit`
    pub offset: Option<u64>,
}

/// Options for [`JobStore::get_job_size`].
#[derive(Debug, Clone, Default)]
pub struct SizeOptions {
    pub ignore_states: Vec<JobState>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HistoryOrder {
    Asc,
    #[default]
    Desc,
}

/// Options for [`JobStore::get_execution_history`].
#[derive(Debug, Clone)]
pub struct HistoryOptions {
    pub limit: u64,
    pub order: HistoryOrder,
}

impl Default for HistoryOptions {
    fn default() -> Self {
        Self {
            limit: 1,
            order: HistoryOrder::Desc,
        }
    }
}

/// Rebuilds a [`Job`] from its row, content and product associations.
pub(crate) async fn load_job<C: ConnectionTrait>(
    conn: &C,
    row: job::Model,
) -> Result<Job, StoreError> {
    let mut attributes = match row.content.as_deref() {
        None => JobAttributes::new(),
        Some(text) => match serde_json::from_str::<JsonValue>(text) {
            Ok(JsonValue::Object(map)) => map,
            Ok(other) => {
                return Err(StoreError::CorruptContent {
                    job_id: row.job_id.clone(),
                    reason: format!("expected an object, found {}", other),
                });
            }
            Err(err) => {
                return Err(StoreError::CorruptContent {
                    job_id: row.job_id.clone(),
                    reason: err.to_string(),
                });
            }
        },
    };

    for projection in [
        Projection::State,
        Projection::Priority,
        Projection::StartDatetime,
        Projection::ExecNode,
        Projection::ExecHost,
    ] {
        let value = projection.value(&row);
        if !value.is_null() {
            attributes.insert(projection.key().to_string(), value);
        }
    }

    let products = Producers::find()
        .select_only()
        .column(producer::Column::Product)
        .filter(producer::Column::JobId.eq(row.id))
        .order_by_asc(producer::Column::Product)
        .into_tuple::<String>()
        .all(conn)
        .await?;
    let requisites = Consumers::find()
        .select_only()
        .column(consumer::Column::Product)
        .filter(consumer::Column::JobId.eq(row.id))
        .order_by_asc(consumer::Column::Product)
        .into_tuple::<String>()
        .all(conn)
        .await?;
    attributes.insert(PRODUCTS_ATTR.to_string(), json!(products));
    attributes.insert(REQUISITES_ATTR.to_string(), json!(requisites));

    Ok(Job {
        job_id: row.job_id,
        update_id: Some(row.update_id),
        attributes,
    })
}

fn summarize(row: &job::Model, projection: &[Projection]) -> JobSummary {
    let attributes = projection
        .iter()
        .map(|column| (column.key().to_string(), column.value(row)))
        .collect();
    JobSummary {
        job_id: row.job_id.clone(),
        attributes,
    }
}

impl JobStore {
    /// Loads a job with its attributes, products and requisites.
    pub async fn get_job(&self, job_id: &str) -> Result<Option<Job>, StoreError> {
        match find_job_row(self.db(), job_id).await? {
            Some(row) => Ok(Some(load_job(self.db(), row).await?)),
            None => Ok(None),
        }
    }

    /// Jobs producing any of `products`, each listed once.
    pub async fn get_producers(
        &self,
        products: &[String],
        projection: &[Projection],
    ) -> Result<Vec<JobSummary>, StoreError> {
        if products.is_empty() {
            return Ok(Vec::new());
        }
        let producer_ids = Producers::find()
            .select_only()
            .column(producer::Column::JobId)
            .filter(producer::Column::Product.is_in(products.iter().cloned()))
            .into_query();
        self.summaries(job::Column::Id.in_subquery(producer_ids), projection)
            .await
    }

    /// Jobs requiring any of `products`, each listed once.
    pub async fn get_consumers(
        &self,
        products: &[String],
        projection: &[Projection],
    ) -> Result<Vec<JobSummary>, StoreError> {
        if products.is_empty() {
            return Ok(Vec::new());
        }
        let consumer_ids = Consumers::find()
            .select_only()
            .column(consumer::Column::JobId)
            .filter(consumer::Column::Product.is_in(products.iter().cloned()))
            .into_query();
        self.summaries(job::Column::Id.in_subquery(consumer_ids), projection)
            .await
    }

    async fn summaries(
        &self,
        condition: sea_orm::sea_query::SimpleExpr,
        projection: &[Projection],
    ) -> Result<Vec<JobSummary>, StoreError> {
        let rows = Jobs::find()
            .filter(condition)
            .order_by_asc(job::Column::JobId)
            .all(self.db())
            .await?;
        Ok(rows.iter().map(|row| summarize(row, projection)).collect())
    }

    /// Ids of jobs in `state`, newest id first, never including the Initiator.
    ///
    /// # Errors
    ///
    /// `offset` without `limit` is rejected.
    pub async fn find_jobs_by_state(
        &self,
        state: JobState,
        options: &FindOptions,
    ) -> Result<Vec<String>, StoreError> {
        if options.offset.is_some() && options.limit.is_none() {
            return Err(StoreError::InvalidOptions(
                "offset requires a limit".to_string(),
            ));
        }

        let mut query = Jobs::find()
            .select_only()
            .column(job::Column::JobId)
            .filter(job::Column::State.eq(state))
            .filter(job::Column::Id.ne(self.initiator_id));
        if let Some(pattern) = &options.filter_exp {
            query = query.filter(job::Column::JobId.like(pattern.as_str()));
        }
        query = query.order_by_desc(job::Column::JobId);
        if let Some(limit) = options.limit {
            query = query.limit(limit);
        }
        if let Some(offset) = options.offset {
            query = query.offset(offset);
        }

        Ok(query.into_tuple::<String>().all(self.db()).await?)
    }

    /// Number of jobs per state, excluding the Initiator.
    pub async fn get_job_size(
        &self,
        options: &SizeOptions,
    ) -> Result<BTreeMap<JobState, u64>, StoreError> {
        let mut query = Jobs::find()
            .select_only()
            .column(job::Column::State)
            .column_as(Expr::col(job::Column::Id).count(), "size")
            .filter(job::Column::Id.ne(self.initiator_id));
        if !options.ignore_states.is_empty() {
            query = query.filter(job::Column::State.is_not_in(options.ignore_states.iter().copied()));
        }

        let counts = query
            .group_by(job::Column::State)
            .into_tuple::<(JobState, i64)>()
            .all(self.db())
            .await?;

        Ok(counts
            .into_iter()
            .map(|(state, size)| (state, u64::try_from(size).unwrap_or_default()))
            .collect())
    }

    /// Execution history of a job, most recent first by default.
    pub async fn get_execution_history(
        &self,
        job_id: &str,
        options: &HistoryOptions,
    ) -> Result<Vec<job_history::Model>, StoreError> {
        let order = match options.order {
            HistoryOrder::Asc => Order::Asc,
            HistoryOrder::Desc => Order::Desc,
        };
        Ok(JobHistories::find()
            .filter(job_history::Column::JobId.eq(job_id))
            .order_by(job_history::Column::Id, order)
            .limit(options.limit)
            .all(self.db())
            .await?)
    }

    /// Deletes a job together with its associations and every incident edge.
    ///
    /// Jobs depending on the deleted one are left as they are. The Initiator
    /// is never deleted. Returns whether a job was deleted.
    #[instrument(skip(self))]
    pub async fn delete_job(&self, job_id: &str) -> Result<bool, StoreError> {
        let txn = self.db.begin().await?;

        let Some(row) = find_job_row(&txn, job_id).await? else {
            return Ok(false);
        };
        if row.id == self.initiator_id {
            warn!("Refusing to delete the initiator job");
            return Ok(false);
        }

        Consumers::delete_many()
            .filter(consumer::Column::JobId.eq(row.id))
            .exec(&txn)
            .await?;
        Producers::delete_many()
            .filter(producer::Column::JobId.eq(row.id))
            .exec(&txn)
            .await?;
        Flows::delete_many()
            .filter(
                flow::Column::ProducerId
                    .eq(row.id)
                    .or(flow::Column::ConsumerId.eq(row.id)),
            )
            .exec(&txn)
            .await?;
        Jobs::delete_by_id(row.id).exec(&txn).await?;

        txn.commit().await?;
        info!(serial_id = row.id, "Deleted job");
        Ok(true)
    }
}
