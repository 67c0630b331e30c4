//! Job entity model
//!
//! SeaORM entity for the `jobs` table. Attributes that are not promoted to a
//! column live in `content` as a JSON object.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

use super::job_state::JobState;

/// Persisted job definition
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "jobs")]
pub struct Model {
    /// Internal identity, stable across redefinitions (primary key)
    #[sea_orm(primary_key)]
    pub id: i32,

    /// External identity supplied by the registering client
    #[sea_orm(unique)]
    pub job_id: String,

    /// Registration batch token; doubles as the optimistic-lock token
    pub update_id: i64,

    /// Current lifecycle state
    pub state: JobState,

    /// JSON object with the non-column attributes; NULL for placeholders
    #[sea_orm(column_type = "Text", nullable)]
    pub content: Option<String>,

    /// Earliest time the job may be handed out
    pub start_after: Option<DateTimeWithTimeZone>,

    /// Node affinity; NULL means any node
    pub node: Option<String>,

    /// Host affinity; NULL means any host
    pub host: Option<String>,

    /// Lower values are served first
    pub priority: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::producer::Entity")]
    Producer,
    #[sea_orm(has_many = "super::consumer::Entity")]
    Consumer,
}

impl Related<super::producer::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Producer.def()
    }
}

impl Related<super::consumer::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Consumer.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
