//! Journal entity
//!
//! Carries both the official (ISSN registry) data and the editorial data
//! delivered by the remote metadata API.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "journals")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(column_type = "Text", nullable)]
    pub title: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub short_title: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub official_title: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub iso_short_title: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub issn_print: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub issn_electronic: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub issnl: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub foundation_year: Option<String>,

    /// Title of the journal this one continues
    #[sea_orm(column_type = "Text", nullable)]
    pub previous_title: Option<String>,

    /// Title of the journal that continues this one
    #[sea_orm(column_type = "Text", nullable)]
    pub next_title: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub license_code: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub nlm_title: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub doi_prefix: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::journal_subject::Entity")]
    Subjects,

    #[sea_orm(has_many = "super::journal_institution::Entity")]
    Institutions,

    #[sea_orm(has_many = "super::journal_collection::Entity")]
    Collections,

    #[sea_orm(has_many = "super::issue::Entity")]
    Issues,
}

impl Related<super::journal_subject::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Subjects.def()
    }
}

impl Related<super::journal_institution::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Institutions.def()
    }
}

impl Related<super::journal_collection::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Collections.def()
    }
}

impl Related<super::issue::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Issues.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
