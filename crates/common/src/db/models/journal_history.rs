//! Append-only journal history events per journal x collection
//!
//! Date parts are stored as text with `""` for an absent part so the
//! uniqueness index covers every event column.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "journal_history")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub journal_collection_id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub event_type: String,

    #[sea_orm(column_type = "Text")]
    pub year: String,

    #[sea_orm(column_type = "Text")]
    pub month: String,

    #[sea_orm(column_type = "Text")]
    pub day: String,

    #[sea_orm(column_type = "Text")]
    pub interruption_reason: String,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::journal_collection::Entity",
        from = "Column::JournalCollectionId",
        to = "super::journal_collection::Column::Id",
        on_delete = "Cascade"
    )]
    JournalCollection,
}

impl Related<super::journal_collection::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::JournalCollection.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
