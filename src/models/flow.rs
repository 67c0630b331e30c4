//! Flow edge entity
//!
//! A derived dependency edge: the consumer job may only run once the
//! producer job has succeeded.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "flows")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub producer_id: i32,
    #[sea_orm(primary_key, auto_increment = false)]
    pub consumer_id: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::job::Entity",
        from = "Column::ProducerId",
        to = "super::job::Column::Id"
    )]
    Producer,
    #[sea_orm(
        belongs_to = "super::job::Entity",
        from = "Column::ConsumerId",
        to = "super::job::Column::Id"
    )]
    Consumer,
}

impl ActiveModelBehavior for ActiveModel {}
