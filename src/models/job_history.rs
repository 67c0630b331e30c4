//! Execution history entity model
//!
//! One row per successful claim. `end_at`, `exit_code` and `description` stay
//! NULL until the execution reports completion.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A single execution attempt of a job
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, ToSchema)]
#[sea_orm(table_name = "job_histories")]
#[schema(as = JobHistory)]
pub struct Model {
    /// Execution id handed to the worker on claim
    #[sea_orm(primary_key)]
    pub id: i32,

    /// External job identity
    pub job_id: String,

    /// Node that claimed the job
    pub node: Option<String>,

    /// Host that claimed the job
    pub host: Option<String>,

    /// Worker thread or task label
    pub thread: Option<String>,

    /// Time the claim succeeded
    #[schema(value_type = String, format = DateTime)]
    pub begin_at: DateTimeWithTimeZone,

    /// Time completion was reported
    #[schema(value_type = Option<String>, format = DateTime)]
    pub end_at: Option<DateTimeWithTimeZone>,

    /// Reported exit code
    pub exit_code: Option<i32>,

    /// Free-form completion description
    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
