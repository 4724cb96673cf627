//! Issue entity
//!
//! Natural key parts (volume, number, supplement) are stored as text with
//! `""` for an absent part so the uniqueness index treats them as equal.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "issues")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub journal_id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub volume: String,

    #[sea_orm(column_type = "Text")]
    pub number: String,

    #[sea_orm(column_type = "Text")]
    pub supplement: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub publication_year: Option<String>,

    /// 1-based creation order within the journal
    pub sequence: i32,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    /// Legacy folder name, e.g. `v12n3s1`
    pub fn issue_folder(&self) -> String {
        let mut folder = String::new();
        if !self.volume.is_empty() {
            folder.push('v');
            folder.push_str(&self.volume);
        }
        if !self.number.is_empty() {
            folder.push('n');
            folder.push_str(&self.number);
        }
        if !self.supplement.is_empty() {
            folder.push('s');
            folder.push_str(&self.supplement);
        }
        folder
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::journal::Entity",
        from = "Column::JournalId",
        to = "super::journal::Column::Id"
    )]
    Journal,

    #[sea_orm(has_many = "super::article::Entity")]
    Articles,
}

impl Related<super::journal::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Journal.def()
    }
}

impl Related<super::article::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Articles.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
