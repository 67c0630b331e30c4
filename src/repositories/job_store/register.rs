//! Registration and dependency maintenance.
//!
//! A registration batch upserts every job, reconciles its product
//! associations, recomputes the flow edges those associations imply and then
//! publishes the batch by moving its INIT rows to WAIT. Everything happens in
//! one transaction so a batch is either fully visible or not at all.

use chrono::{DateTime, NaiveDateTime, Utc};
use sea_orm::prelude::{DateTimeWithTimeZone, Expr};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QuerySelect,
    Set, TransactionTrait,
};
use serde_json::Value as JsonValue;
use tracing::{debug, info, instrument};

use super::{JobStore, StoreError, find_job_row, to_db_time};
use crate::models::definition::{
    DEFAULT_PRIORITY, EXEC_HOST_ATTR, EXEC_NODE_ATTR, PRIORITY_ATTR, PRODUCTS_ATTR,
    REQUISITES_ATTR, START_DATETIME_ATTR, STATE_ATTR, state_from_json,
};
use crate::models::{
    Consumers, Flows, INITIATOR_JOB_ID, Job, JobState, Jobs, Producers, consumer, flow, job,
    producer,
};

/// Which end of a flow edge a job's products put it on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    /// The job requires the products (its requisites).
    Consumer,
    /// The job produces the products.
    Producer,
}

/// Column values and associations extracted from a job definition.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct StoredForm {
    pub job_id: String,
    pub update_id: Option<i64>,
    pub state: Option<JobState>,
    pub priority: i32,
    pub start_after: Option<DateTimeWithTimeZone>,
    pub node: Option<String>,
    pub host: Option<String>,
    pub content: String,
    pub products: Vec<String>,
    pub requisites: Vec<String>,
}

impl StoredForm {
    /// Splits a job into column values, associations and serialized content.
    ///
    /// Fails without side effects when any attribute cannot be stored.
    pub(crate) fn from_job(job: &Job) -> Result<Self, StoreError> {
        let unacceptable = |reason: String| StoreError::Unacceptable {
            job_id: job.job_id.clone(),
            reason,
        };

        if job.job_id.trim().is_empty() {
            return Err(unacceptable("job_id must not be empty".to_string()));
        }
        if job.job_id == INITIATOR_JOB_ID {
            return Err(unacceptable(format!("{} is reserved", INITIATOR_JOB_ID)));
        }

        let mut content = job.attributes.clone();

        let state = match present(content.remove(STATE_ATTR)) {
            None => None,
            Some(value) => Some(
                state_from_json(&value)
                    .ok_or_else(|| unacceptable(format!("unknown state {}", value)))?,
            ),
        };

        let priority = match present(content.remove(PRIORITY_ATTR)) {
            None => DEFAULT_PRIORITY,
            Some(value) => value
                .as_i64()
                .and_then(|priority| i32::try_from(priority).ok())
                .ok_or_else(|| unacceptable(format!("priority {} is not an integer", value)))?,
        };

        let start_after = match present(content.remove(START_DATETIME_ATTR)) {
            None => None,
            Some(JsonValue::String(text)) => Some(
                parse_start_datetime(&text)
                    .map(to_db_time)
                    .ok_or_else(|| unacceptable(format!("unparseable start_datetime '{}'", text)))?,
            ),
            Some(other) => {
                return Err(unacceptable(format!(
                    "start_datetime {} is not a string",
                    other
                )));
            }
        };

        let node = optional_string(content.remove(EXEC_NODE_ATTR), EXEC_NODE_ATTR)
            .map_err(unacceptable)?;
        let host = optional_string(content.remove(EXEC_HOST_ATTR), EXEC_HOST_ATTR)
            .map_err(unacceptable)?;
        let products =
            product_list(content.remove(PRODUCTS_ATTR), PRODUCTS_ATTR).map_err(unacceptable)?;
        let requisites = product_list(content.remove(REQUISITES_ATTR), REQUISITES_ATTR)
            .map_err(unacceptable)?;

        let content = serde_json::to_string(&content)
            .map_err(|err| unacceptable(format!("attributes are not serializable: {}", err)))?;

        Ok(Self {
            job_id: job.job_id.clone(),
            update_id: job.update_id,
            state,
            priority,
            start_after,
            node,
            host,
            content,
            products,
            requisites,
        })
    }
}

fn present(value: Option<JsonValue>) -> Option<JsonValue> {
    value.filter(|value| !value.is_null())
}

/// Accepts RFC 3339 or `%Y-%m-%d %H:%M:%S` (read as UTC).
fn parse_start_datetime(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

fn optional_string(value: Option<JsonValue>, key: &str) -> Result<Option<String>, String> {
    match present(value) {
        None => Ok(None),
        Some(JsonValue::String(text)) => Ok(Some(text)),
        Some(other) => Err(format!("{} {} is not a string", key, other)),
    }
}

/// Reads a product list, accepting a bare string as a single product.
fn product_list(value: Option<JsonValue>, key: &str) -> Result<Vec<String>, String> {
    let names = match present(value) {
        None => Vec::new(),
        Some(JsonValue::String(name)) => vec![name],
        Some(JsonValue::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                JsonValue::String(name) => Ok(name),
                other => Err(format!("{} entry {} is not a string", key, other)),
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(other) => Err(format!("{} {} is not a list", key, other))?,
    };

    let mut unique = Vec::with_capacity(names.len());
    for name in names {
        if name.is_empty() {
            return Err(format!("{} contains an empty product name", key));
        }
        if !unique.contains(&name) {
            unique.push(name);
        }
    }
    Ok(unique)
}

impl JobStore {
    /// Registers (inserts or redefines) a batch of jobs.
    ///
    /// Every job is validated before anything is written. The batch is then
    /// written and published in a single transaction: rows written under
    /// `update_id` that are still INIT become WAIT at the end.
    ///
    /// # Arguments
    ///
    /// * `update_id` - Batch token; required when the batch creates new jobs.
    ///   When absent each job's own `update_id` is used.
    /// * `jobs` - Job definitions
    #[instrument(skip_all, fields(update_id = ?update_id, batch = jobs.len()))]
    pub async fn register(&self, update_id: Option<i64>, jobs: &[Job]) -> Result<(), StoreError> {
        let forms = jobs
            .iter()
            .map(StoredForm::from_job)
            .collect::<Result<Vec<_>, _>>()?;

        info!("Registering job batch");

        let txn = self.db.begin().await?;

        for form in &forms {
            let serial_id = upsert_job(&txn, form, update_id.or(form.update_id)).await?;
            self.reconcile_dependencies(&txn, serial_id, form).await?;
        }

        let mut publish = Jobs::update_many()
            .col_expr(job::Column::State, Expr::value(JobState::Wait))
            .filter(job::Column::State.eq(JobState::Init));
        publish = match update_id {
            Some(update_id) => publish.filter(job::Column::UpdateId.eq(update_id)),
            None => publish.filter(
                job::Column::JobId.is_in(forms.iter().map(|form| form.job_id.clone())),
            ),
        };
        let published = publish.exec(&txn).await?;

        txn.commit().await?;

        info!(
            published = published.rows_affected,
            "Registered job batch"
        );
        Ok(())
    }

    /// Brings associations and flow edges of one job in line with its
    /// requisites and products.
    async fn reconcile_dependencies<C: ConnectionTrait>(
        &self,
        conn: &C,
        serial_id: i32,
        form: &StoredForm,
    ) -> Result<(), StoreError> {
        reconcile_role(conn, serial_id, Role::Consumer, &form.requisites).await?;
        reconcile_role(conn, serial_id, Role::Producer, &form.products).await?;

        if form.requisites.is_empty() {
            insert_edge(conn, self.initiator_id, serial_id).await?;
        } else {
            Flows::delete_many()
                .filter(flow::Column::ProducerId.eq(self.initiator_id))
                .filter(flow::Column::ConsumerId.eq(serial_id))
                .exec(conn)
                .await?;
        }
        Ok(())
    }
}

/// Inserts or redefines the row for `form`, returning its internal id.
async fn upsert_job<C: ConnectionTrait>(
    conn: &C,
    form: &StoredForm,
    update_id: Option<i64>,
) -> Result<i32, StoreError> {
    let state = form.state.unwrap_or(JobState::Init);

    match find_job_row(conn, &form.job_id).await? {
        None => {
            let update_id = update_id.ok_or_else(|| StoreError::MissingUpdateId {
                job_id: form.job_id.clone(),
            })?;
            let inserted = job::ActiveModel {
                job_id: Set(form.job_id.clone()),
                update_id: Set(update_id),
                state: Set(state),
                content: Set(Some(form.content.clone())),
                start_after: Set(form.start_after),
                node: Set(form.node.clone()),
                host: Set(form.host.clone()),
                priority: Set(form.priority),
                ..Default::default()
            }
            .insert(conn)
            .await?;
            debug!(job_id = %form.job_id, serial_id = inserted.id, "Inserted job");
            Ok(inserted.id)
        }
        Some(existing) => {
            let serial_id = existing.id;
            let mut active: job::ActiveModel = existing.into();
            if let Some(update_id) = update_id {
                active.update_id = Set(update_id);
            }
            active.state = Set(state);
            active.content = Set(Some(form.content.clone()));
            active.start_after = Set(form.start_after);
            active.node = Set(form.node.clone());
            active.host = Set(form.host.clone());
            active.priority = Set(form.priority);
            active.update(conn).await?;
            debug!(job_id = %form.job_id, serial_id, "Redefined job");
            Ok(serial_id)
        }
    }
}

async fn reconcile_role<C: ConnectionTrait>(
    conn: &C,
    serial_id: i32,
    role: Role,
    wanted: &[String],
) -> Result<(), StoreError> {
    let current = associated_products(conn, role, serial_id).await?;
    let stale: Vec<String> = current
        .into_iter()
        .filter(|product| !wanted.contains(product))
        .collect();

    if !stale.is_empty() {
        debug!(serial_id, ?role, ?stale, "Removing stale products");
        delete_associations(conn, role, serial_id, stale).await?;
        let column = match role {
            Role::Consumer => flow::Column::ConsumerId,
            Role::Producer => flow::Column::ProducerId,
        };
        Flows::delete_many()
            .filter(column.eq(serial_id))
            .exec(conn)
            .await?;
    }

    for product in wanted {
        insert_association(conn, role, serial_id, product).await?;
        for other_id in opposite_jobs(conn, role, product).await? {
            match role {
                Role::Consumer => insert_edge(conn, other_id, serial_id).await?,
                Role::Producer => insert_edge(conn, serial_id, other_id).await?,
            };
        }
    }
    Ok(())
}

async fn associated_products<C: ConnectionTrait>(
    conn: &C,
    role: Role,
    serial_id: i32,
) -> Result<Vec<String>, DbErr> {
    match role {
        Role::Consumer => {
            Consumers::find()
                .select_only()
                .column(consumer::Column::Product)
                .filter(consumer::Column::JobId.eq(serial_id))
                .into_tuple::<String>()
                .all(conn)
                .await
        }
        Role::Producer => {
            Producers::find()
                .select_only()
                .column(producer::Column::Product)
                .filter(producer::Column::JobId.eq(serial_id))
                .into_tuple::<String>()
                .all(conn)
                .await
        }
    }
}

async fn delete_associations<C: ConnectionTrait>(
    conn: &C,
    role: Role,
    serial_id: i32,
    products: Vec<String>,
) -> Result<u64, DbErr> {
    let result = match role {
        Role::Consumer => {
            Consumers::delete_many()
                .filter(consumer::Column::JobId.eq(serial_id))
                .filter(consumer::Column::Product.is_in(products))
                .exec(conn)
                .await?
        }
        Role::Producer => {
            Producers::delete_many()
                .filter(producer::Column::JobId.eq(serial_id))
                .filter(producer::Column::Product.is_in(products))
                .exec(conn)
                .await?
        }
    };
    Ok(result.rows_affected)
}

async fn insert_association<C: ConnectionTrait>(
    conn: &C,
    role: Role,
    serial_id: i32,
    product: &str,
) -> Result<u64, DbErr> {
    match role {
        Role::Consumer => {
            Consumers::insert(consumer::ActiveModel {
                job_id: Set(serial_id),
                product: Set(product.to_string()),
            })
            .on_conflict(
                OnConflict::columns([consumer::Column::JobId, consumer::Column::Product])
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(conn)
            .await
        }
        Role::Producer => {
            Producers::insert(producer::ActiveModel {
                job_id: Set(serial_id),
                product: Set(product.to_string()),
            })
            .on_conflict(
                OnConflict::columns([producer::Column::JobId, producer::Column::Product])
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(conn)
            .await
        }
    }
}

/// Internal ids of the jobs on the other side of `product`.
async fn opposite_jobs<C: ConnectionTrait>(
    conn: &C,
    role: Role,
    product: &str,
) -> Result<Vec<i32>, DbErr> {
    match role {
        Role::Consumer => {
            Producers::find()
                .select_only()
                .column(producer::Column::JobId)
                .filter(producer::Column::Product.eq(product))
                .into_tuple::<i32>()
                .all(conn)
                .await
        }
        Role::Producer => {
            Consumers::find()
                .select_only()
                .column(consumer::Column::JobId)
                .filter(consumer::Column::Product.eq(product))
                .into_tuple::<i32>()
                .all(conn)
                .await
        }
    }
}

/// Inserts a flow edge unless it already exists.
async fn insert_edge<C: ConnectionTrait>(
    conn: &C,
    producer_id: i32,
    consumer_id: i32,
) -> Result<u64, DbErr> {
    Flows::insert(flow::ActiveModel {
        producer_id: Set(producer_id),
        consumer_id: Set(consumer_id),
    })
    .on_conflict(
        OnConflict::columns([flow::Column::ProducerId, flow::Column::ConsumerId])
            .do_nothing()
            .to_owned(),
    )
    .exec_without_returning(conn)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::COMMANDS_ATTR;
    use serde_json::json;

    #[test]
    fn splits_columns_from_content() {
        let job = Job::new("load_sales")
            .with_attr(COMMANDS_ATTR, json!(["load.sh"]))
            .with_attr(PRIORITY_ATTR, 5)
            .with_attr(EXEC_NODE_ATTR, "batch")
            .with_attr(START_DATETIME_ATTR, "2025-04-01 06:00:00")
            .with_requisites(["raw_sales", "raw_sales"])
            .with_products(["sales"]);

        let form = StoredForm::from_job(&job).unwrap();

        assert_eq!(form.priority, 5);
        assert_eq!(form.node.as_deref(), Some("batch"));
        assert_eq!(form.host, None);
        assert_eq!(form.state, None);
        assert_eq!(
            form.start_after.unwrap().to_rfc3339(),
            "2025-04-01T06:00:00+00:00"
        );
        assert_eq!(form.requisites, vec!["raw_sales".to_string()]);
        assert_eq!(form.products, vec!["sales".to_string()]);

        let content: JsonValue = serde_json::from_str(&form.content).unwrap();
        assert_eq!(content, json!({ "commands": ["load.sh"] }));
    }

    #[test]
    fn defaults_priority_and_accepts_explicit_state() {
        let form = StoredForm::from_job(&Job::new("a").with_attr(STATE_ATTR, "SUSPEND")).unwrap();
        assert_eq!(form.priority, DEFAULT_PRIORITY);
        assert_eq!(form.state, Some(JobState::Suspend));
        assert_eq!(form.content, "{}");
    }

    #[test]
    fn rejects_unstorable_attributes() {
        let cases = [
            Job::new(""),
            Job::new(INITIATOR_JOB_ID),
            Job::new("a").with_attr(STATE_ATTR, 42),
            Job::new("a").with_attr(PRIORITY_ATTR, "high"),
            Job::new("a").with_attr(START_DATETIME_ATTR, "tomorrow"),
            Job::new("a").with_attr(EXEC_HOST_ATTR, 7),
            Job::new("a").with_attr(PRODUCTS_ATTR, json!([1])),
            Job::new("a").with_attr(REQUISITES_ATTR, json!({ "p": 1 })),
        ];

        for job in cases {
            let err = StoredForm::from_job(&job).unwrap_err();
            assert!(
                matches!(err, StoreError::Unacceptable { .. }),
                "expected rejection for {:?}",
                job
            );
        }
    }

    #[test]
    fn parses_rfc3339_start_datetime() {
        let parsed = parse_start_datetime("2025-04-01T08:00:00+02:00").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2025-04-01T06:00:00+00:00");
    }
}
