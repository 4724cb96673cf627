//! Processing record entity
//!
//! One record per (collection, kind, pid). Tracks migration and
//! publication progress on independent axes; never deleted.

use super::enums::{EntityKind, ProgressStatus, WebsiteKind};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "proc_records")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub kind: EntityKind,

    /// Collection acronym
    #[sea_orm(column_type = "Text")]
    pub collection: String,

    #[sea_orm(column_type = "Text")]
    pub pid: String,

    /// Canonical entity once migrated
    pub entity_id: Option<Uuid>,

    /// Parent processing record (journal for issues, issue for articles)
    pub parent_id: Option<Uuid>,

    #[sea_orm(column_type = "Text", nullable)]
    pub journal_acron: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub issue_folder: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub publication_year: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub title: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub availability_status: Option<String>,

    /// Last registered legacy record
    #[sea_orm(column_type = "JsonBinary")]
    pub legacy_data: Json,

    pub migration_status: ProgressStatus,

    pub docs_status: ProgressStatus,

    pub files_status: ProgressStatus,

    pub qa_ws_status: ProgressStatus,

    pub public_ws_status: ProgressStatus,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    /// Fresh record for a first encounter of a legacy PID
    pub fn new(kind: EntityKind, collection: &str, pid: &str) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind,
            collection: collection.to_string(),
            pid: pid.to_string(),
            entity_id: None,
            parent_id: None,
            journal_acron: None,
            issue_folder: None,
            publication_year: None,
            title: None,
            availability_status: None,
            legacy_data: Json::Null,
            migration_status: ProgressStatus::NotStarted,
            docs_status: ProgressStatus::NotStarted,
            files_status: ProgressStatus::NotStarted,
            qa_ws_status: ProgressStatus::NotStarted,
            public_ws_status: ProgressStatus::NotStarted,
            created_at: now.into(),
            updated_at: now.into(),
        }
    }

    /// Publication status for one website
    pub fn publication_status(&self, website: WebsiteKind) -> ProgressStatus {
        match website {
            WebsiteKind::Qa => self.qa_ws_status,
            WebsiteKind::Public => self.public_ws_status,
        }
    }

    pub(crate) fn set_publication_status(&mut self, website: WebsiteKind, status: ProgressStatus) {
        match website {
            WebsiteKind::Qa => self.qa_ws_status = status,
            WebsiteKind::Public => self.public_ws_status = status,
        }
    }

    /// Column holding the publication status for a website
    pub fn publication_column(website: WebsiteKind) -> Column {
        match website {
            WebsiteKind::Qa => Column::QaWsStatus,
            WebsiteKind::Public => Column::PublicWsStatus,
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
