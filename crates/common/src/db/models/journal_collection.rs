//! Journal x collection linkage with the collection-local acronym

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "journal_collections")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub journal_id: Uuid,

    /// Collection acronym
    #[sea_orm(column_type = "Text")]
    pub collection: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub journal_acron: Option<String>,

    /// `C` current, `D` ceased, `S` suspended
    #[sea_orm(column_type = "Text", nullable)]
    pub availability_status: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::journal::Entity",
        from = "Column::JournalId",
        to = "super::journal::Column::Id",
        on_delete = "Cascade"
    )]
    Journal,

    #[sea_orm(has_many = "super::journal_history::Entity")]
    History,
}

impl Related<super::journal::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Journal.def()
    }
}

impl Related<super::journal_history::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::History.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
