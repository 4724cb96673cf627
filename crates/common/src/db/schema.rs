//! Table and uniqueness-index bootstrap
//!
//! Creates every entity table that is missing, then the unique indexes
//! backing each natural key. Get-or-create and idempotent nested inserts
//! (`ON CONFLICT DO NOTHING`) depend on these indexes.

use crate::db::models::*;
use crate::errors::Result;
use sea_orm::sea_query::{Index, IndexCreateStatement};
use sea_orm::{ConnectionTrait, DatabaseConnection, EntityTrait, Schema};
use tracing::info;

/// Create missing tables and unique indexes
pub async fn ensure_schema(db: &DatabaseConnection) -> Result<()> {
    create_table(db, CollectionEntity).await?;
    create_table(db, JournalEntity).await?;
    create_table(db, JournalSubjectEntity).await?;
    create_table(db, JournalInstitutionEntity).await?;
    create_table(db, JournalCollectionEntity).await?;
    create_table(db, JournalHistoryEntity).await?;
    create_table(db, IssueEntity).await?;
    create_table(db, ArticleEntity).await?;
    create_table(db, ProcRecordEntity).await?;
    create_table(db, UnexpectedEventEntity).await?;

    let backend = db.get_database_backend();
    for index in unique_indexes() {
        db.execute(backend.build(&index)).await?;
    }

    info!("Database schema ensured");
    Ok(())
}

async fn create_table<E: EntityTrait>(db: &DatabaseConnection, entity: E) -> Result<()> {
    let backend = db.get_database_backend();
    let mut stmt = Schema::new(backend).create_table_from_entity(entity);
    stmt.if_not_exists();
    db.execute(backend.build(&stmt)).await?;
    Ok(())
}

/// Unique indexes for every natural key
pub fn unique_indexes() -> Vec<IndexCreateStatement> {
    vec![
        Index::create()
            .name("uq_proc_records_key")
            .table(ProcRecordEntity)
            .col(ProcRecordColumn::Collection)
            .col(ProcRecordColumn::Kind)
            .col(ProcRecordColumn::Pid)
            .unique()
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("uq_journal_subjects_key")
            .table(JournalSubjectEntity)
            .col(JournalSubjectColumn::JournalId)
            .col(JournalSubjectColumn::Code)
            .unique()
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("uq_journal_institutions_key")
            .table(JournalInstitutionEntity)
            .col(JournalInstitutionColumn::JournalId)
            .col(JournalInstitutionColumn::Role)
            .col(JournalInstitutionColumn::Name)
            .unique()
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("uq_journal_collections_key")
            .table(JournalCollectionEntity)
            .col(JournalCollectionColumn::JournalId)
            .col(JournalCollectionColumn::Collection)
            .unique()
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("uq_journal_history_event")
            .table(JournalHistoryEntity)
            .col(JournalHistoryColumn::JournalCollectionId)
            .col(JournalHistoryColumn::EventType)
            .col(JournalHistoryColumn::Year)
            .col(JournalHistoryColumn::Month)
            .col(JournalHistoryColumn::Day)
            .col(JournalHistoryColumn::InterruptionReason)
            .unique()
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("uq_issues_key")
            .table(IssueEntity)
            .col(IssueColumn::JournalId)
            .col(IssueColumn::Volume)
            .col(IssueColumn::Number)
            .col(IssueColumn::Supplement)
            .unique()
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("uq_articles_key")
            .table(ArticleEntity)
            .col(ArticleColumn::IssueId)
            .col(ArticleColumn::PidV2)
            .unique()
            .if_not_exists()
            .to_owned(),
    ]
}
