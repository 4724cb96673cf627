//! Failure ledger entry, written once per unexpected failure

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "unexpected_events")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub operation: String,

    pub user_id: i64,

    #[sea_orm(column_type = "Text")]
    pub username: String,

    #[sea_orm(column_type = "Text")]
    pub collection: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub pid: Option<String>,

    /// Override flags in effect
    #[sea_orm(column_type = "JsonBinary")]
    pub flags: Json,

    #[sea_orm(column_type = "Text")]
    pub exception_type: String,

    #[sea_orm(column_type = "Text")]
    pub exception_summary: String,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
