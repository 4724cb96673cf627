//! Repository pattern for database operations
//!
//! Implements the entity, processing-record and failure-ledger stores on
//! SeaORM. Every get-or-create inserts with `ON CONFLICT DO NOTHING`
//! against the natural-key index and then selects, so concurrent callers
//! converge on one row.

use crate::db::models::*;
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use crate::ledger::{trace_entry, FailureEntry, FailureLedger};
use crate::store::{
    non_blank, ArticleData, EntityStore, HistoryEvent, IssueKey, JournalData, JournalKey, ProcQuery,
    ProcStore, StatusCounts,
};
use async_trait::async_trait;
use sea_orm::sea_query::{Condition, Expr, Func, OnConflict};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Select, Set,
};
use std::collections::BTreeMap;
use tracing::{debug, error};
use uuid::Uuid;

fn now() -> sea_orm::prelude::DateTimeWithTimeZone {
    chrono::Utc::now().into()
}

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Connection for reporting reads
    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    /// Connection for writes and read-your-writes lookups
    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }

    /// Ping the database
    pub async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }

    /// Create missing tables and natural-key indexes
    pub async fn ensure_schema(&self) -> Result<()> {
        super::schema::ensure_schema(self.write_conn()).await
    }

    fn scoped(query: &ProcQuery) -> Select<ProcRecordEntity> {
        let filter = &query.filter;
        let mut select = ProcRecordEntity::find()
            .filter(ProcRecordColumn::Collection.eq(query.collection.as_str()))
            .filter(ProcRecordColumn::Kind.eq(query.kind));

        if let Some(parent_id) = filter.parent_id {
            select = select.filter(ProcRecordColumn::ParentId.eq(parent_id));
        }
        if let Some(ref pid) = filter.pid {
            select = select.filter(ProcRecordColumn::Pid.eq(pid.as_str()));
        }
        if let Some(ref acron) = filter.journal_acron {
            select = select.filter(ProcRecordColumn::JournalAcron.eq(acron.as_str()));
        }
        if let Some(ref year) = filter.publication_year {
            select = select.filter(ProcRecordColumn::PublicationYear.eq(year.as_str()));
        }
        select
    }

    async fn count_by(
        &self,
        collection: &str,
        kind: EntityKind,
        column: ProcRecordColumn,
    ) -> Result<BTreeMap<String, u64>> {
        let rows: Vec<(ProgressStatus, i64)> = ProcRecordEntity::find()
            .select_only()
            .column(column)
            .column_as(Expr::col(ProcRecordColumn::Id).count(), "count")
            .filter(ProcRecordColumn::Collection.eq(collection))
            .filter(ProcRecordColumn::Kind.eq(kind))
            .group_by(column)
            .into_tuple()
            .all(self.read_conn())
            .await?;

        Ok(rows
            .into_iter()
            .map(|(status, count)| (status.to_string(), count.max(0) as u64))
            .collect())
    }
}

// ============================================================================
// Canonical entities
// ============================================================================

#[async_trait]
impl EntityStore for Repository {
    async fn get_or_create_collection(&self, acron: &str) -> Result<Collection> {
        let collection = CollectionActiveModel {
            id: Set(Uuid::new_v4()),
            acron: Set(acron.to_string()),
            name: Set(None),
            created_at: Set(now()),
        };
        CollectionEntity::insert(collection)
            .on_conflict(OnConflict::column(CollectionColumn::Acron).do_nothing().to_owned())
            .exec_without_returning(self.write_conn())
            .await?;

        CollectionEntity::find()
            .filter(CollectionColumn::Acron.eq(acron))
            .one(self.write_conn())
            .await?
            .ok_or_else(|| AppError::CollectionNotFound {
                acron: acron.to_string(),
            })
    }

    async fn find_collection(&self, acron: &str) -> Result<Option<Collection>> {
        CollectionEntity::find()
            .filter(CollectionColumn::Acron.eq(acron))
            .one(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn find_journal(&self, key: &JournalKey) -> Result<Option<Journal>> {
        if key.is_empty() {
            return Ok(None);
        }

        let mut condition = Condition::any();
        if let Some(ref issn) = key.issn_electronic {
            condition = condition.add(JournalColumn::IssnElectronic.eq(issn.as_str()));
        }
        if let Some(ref issn) = key.issn_print {
            condition = condition.add(JournalColumn::IssnPrint.eq(issn.as_str()));
        }
        if let Some(title) = key.folded_title() {
            condition = condition.add(Expr::expr(Func::lower(Expr::col(JournalColumn::Title))).eq(title));
        }

        let candidates = JournalEntity::find()
            .filter(condition)
            .order_by_asc(JournalColumn::CreatedAt)
            .all(self.write_conn())
            .await?;

        Ok(key.best_match(&candidates).cloned())
    }

    async fn find_journal_by_id(&self, id: Uuid) -> Result<Option<Journal>> {
        JournalEntity::find_by_id(id)
            .one(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn upsert_journal(&self, data: &JournalData) -> Result<Journal> {
        let key = data.key();
        if key.is_empty() {
            return Err(AppError::MissingField {
                field: "journal title or ISSN".to_string(),
            });
        }

        match self.find_journal(&key).await? {
            Some(mut journal) => {
                data.apply_to(&mut journal);
                journal.updated_at = now();
                let updated = journal.into_active_model().reset_all().update(self.write_conn()).await?;
                debug!(journal_id = %updated.id, "Journal updated");
                Ok(updated)
            }
            None => {
                let created = data
                    .to_journal()
                    .into_active_model()
                    .reset_all()
                    .insert(self.write_conn())
                    .await?;
                debug!(journal_id = %created.id, "Journal created");
                Ok(created)
            }
        }
    }

    async fn journal_subjects(&self, journal_id: Uuid) -> Result<Vec<JournalSubject>> {
        JournalSubjectEntity::find()
            .filter(JournalSubjectColumn::JournalId.eq(journal_id))
            .all(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn add_subject(&self, journal_id: Uuid, code: &str) -> Result<bool> {
        let subject = JournalSubjectActiveModel {
            id: Set(Uuid::new_v4()),
            journal_id: Set(journal_id),
            code: Set(code.to_string()),
            created_at: Set(now()),
        };
        let inserted = JournalSubjectEntity::insert(subject)
            .on_conflict(
                OnConflict::columns([JournalSubjectColumn::JournalId, JournalSubjectColumn::Code])
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(self.write_conn())
            .await?;
        Ok(inserted > 0)
    }

    async fn journal_institutions(&self, journal_id: Uuid) -> Result<Vec<JournalInstitution>> {
        JournalInstitutionEntity::find()
            .filter(JournalInstitutionColumn::JournalId.eq(journal_id))
            .all(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn add_institution(&self, journal_id: Uuid, role: InstitutionRole, name: &str) -> Result<bool> {
        let institution = JournalInstitutionActiveModel {
            id: Set(Uuid::new_v4()),
            journal_id: Set(journal_id),
            role: Set(role),
            name: Set(name.to_string()),
            created_at: Set(now()),
        };
        let inserted = JournalInstitutionEntity::insert(institution)
            .on_conflict(
                OnConflict::columns([
                    JournalInstitutionColumn::JournalId,
                    JournalInstitutionColumn::Role,
                    JournalInstitutionColumn::Name,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(self.write_conn())
            .await?;
        Ok(inserted > 0)
    }

    async fn upsert_journal_collection(
        &self,
        journal_id: Uuid,
        collection: &str,
        journal_acron: Option<&str>,
        availability_status: Option<&str>,
    ) -> Result<JournalCollection> {
        let linkage = JournalCollectionActiveModel {
            id: Set(Uuid::new_v4()),
            journal_id: Set(journal_id),
            collection: Set(collection.to_string()),
            journal_acron: Set(journal_acron.map(str::to_string)),
            availability_status: Set(availability_status.map(str::to_string)),
            created_at: Set(now()),
            updated_at: Set(now()),
        };
        JournalCollectionEntity::insert(linkage)
            .on_conflict(
                OnConflict::columns([JournalCollectionColumn::JournalId, JournalCollectionColumn::Collection])
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(self.write_conn())
            .await?;

        let mut found = JournalCollectionEntity::find()
            .filter(JournalCollectionColumn::JournalId.eq(journal_id))
            .filter(JournalCollectionColumn::Collection.eq(collection))
            .one(self.write_conn())
            .await?
            .ok_or_else(|| AppError::NotFound {
                resource_type: "journal_collection".to_string(),
                id: format!("{}/{}", journal_id, collection),
            })?;

        let acron = non_blank(journal_acron).or(found.journal_acron.clone());
        let status = non_blank(availability_status).or(found.availability_status.clone());
        if acron == found.journal_acron && status == found.availability_status {
            return Ok(found);
        }
        found.journal_acron = acron;
        found.availability_status = status;
        found.updated_at = now();
        found
            .into_active_model()
            .reset_all()
            .update(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn journal_history(&self, journal_collection_id: Uuid) -> Result<Vec<JournalHistory>> {
        JournalHistoryEntity::find()
            .filter(JournalHistoryColumn::JournalCollectionId.eq(journal_collection_id))
            .order_by_asc(JournalHistoryColumn::CreatedAt)
            .all(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn add_history_event(&self, journal_collection_id: Uuid, event: &HistoryEvent) -> Result<bool> {
        let history = JournalHistoryActiveModel {
            id: Set(Uuid::new_v4()),
            journal_collection_id: Set(journal_collection_id),
            event_type: Set(event.event_type.clone()),
            year: Set(event.year.clone()),
            month: Set(event.month.clone()),
            day: Set(event.day.clone()),
            interruption_reason: Set(event.interruption_reason.clone()),
            created_at: Set(now()),
        };
        let inserted = JournalHistoryEntity::insert(history)
            .on_conflict(
                OnConflict::columns([
                    JournalHistoryColumn::JournalCollectionId,
                    JournalHistoryColumn::EventType,
                    JournalHistoryColumn::Year,
                    JournalHistoryColumn::Month,
                    JournalHistoryColumn::Day,
                    JournalHistoryColumn::InterruptionReason,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(self.write_conn())
            .await?;
        Ok(inserted > 0)
    }

    async fn find_issue(&self, key: &IssueKey) -> Result<Option<Issue>> {
        IssueEntity::find()
            .filter(IssueColumn::JournalId.eq(key.journal_id))
            .filter(IssueColumn::Volume.eq(key.volume.as_str()))
            .filter(IssueColumn::Number.eq(key.number.as_str()))
            .filter(IssueColumn::Supplement.eq(key.supplement.as_str()))
            .one(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn find_issue_by_id(&self, id: Uuid) -> Result<Option<Issue>> {
        IssueEntity::find_by_id(id)
            .one(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn get_or_create_issue(&self, key: &IssueKey, publication_year: Option<&str>) -> Result<Issue> {
        if let Some(found) = self.find_issue(key).await? {
            return Ok(found);
        }

        let existing = IssueEntity::find()
            .filter(IssueColumn::JournalId.eq(key.journal_id))
            .count(self.write_conn())
            .await?;

        let issue = IssueActiveModel {
            id: Set(Uuid::new_v4()),
            journal_id: Set(key.journal_id),
            volume: Set(key.volume.clone()),
            number: Set(key.number.clone()),
            supplement: Set(key.supplement.clone()),
            publication_year: Set(non_blank(publication_year)),
            sequence: Set(existing as i32 + 1),
            created_at: Set(now()),
            updated_at: Set(now()),
        };
        IssueEntity::insert(issue)
            .on_conflict(
                OnConflict::columns([
                    IssueColumn::JournalId,
                    IssueColumn::Volume,
                    IssueColumn::Number,
                    IssueColumn::Supplement,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(self.write_conn())
            .await?;

        self.find_issue(key).await?.ok_or_else(|| AppError::NotFound {
            resource_type: "issue".to_string(),
            id: format!("{}/v{}n{}s{}", key.journal_id, key.volume, key.number, key.supplement),
        })
    }

    async fn upsert_article(&self, data: &ArticleData) -> Result<Article> {
        let existing = ArticleEntity::find()
            .filter(ArticleColumn::IssueId.eq(data.issue_id))
            .filter(ArticleColumn::PidV2.eq(data.pid_v2.as_str()))
            .one(self.write_conn())
            .await?;

        let article = match existing {
            Some(mut article) => {
                data.apply_to(&mut article);
                article.updated_at = now();
                article.into_active_model().reset_all().update(self.write_conn()).await?
            }
            None => {
                data.to_article()
                    .into_active_model()
                    .reset_all()
                    .insert(self.write_conn())
                    .await?
            }
        };
        Ok(article)
    }

    async fn find_article_by_id(&self, id: Uuid) -> Result<Option<Article>> {
        ArticleEntity::find_by_id(id)
            .one(self.write_conn())
            .await
            .map_err(Into::into)
    }
}

// ============================================================================
// Processing records
// ============================================================================

#[async_trait]
impl ProcStore for Repository {
    async fn get_or_create_proc(&self, collection: &str, kind: EntityKind, pid: &str) -> Result<ProcRecord> {
        let record = ProcRecord::new(kind, collection, pid).into_active_model().reset_all();
        ProcRecordEntity::insert(record)
            .on_conflict(
                OnConflict::columns([
                    ProcRecordColumn::Collection,
                    ProcRecordColumn::Kind,
                    ProcRecordColumn::Pid,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(self.write_conn())
            .await?;

        self.find_proc(collection, kind, pid)
            .await?
            .ok_or_else(|| AppError::NotFound {
                resource_type: "proc_record".to_string(),
                id: format!("{}/{}/{}", collection, kind, pid),
            })
    }

    async fn find_proc(&self, collection: &str, kind: EntityKind, pid: &str) -> Result<Option<ProcRecord>> {
        ProcRecordEntity::find()
            .filter(ProcRecordColumn::Collection.eq(collection))
            .filter(ProcRecordColumn::Kind.eq(kind))
            .filter(ProcRecordColumn::Pid.eq(pid))
            .one(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn find_proc_by_id(&self, id: Uuid) -> Result<Option<ProcRecord>> {
        ProcRecordEntity::find_by_id(id)
            .one(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn find_proc_by_entity(
        &self,
        collection: &str,
        kind: EntityKind,
        entity_id: Uuid,
    ) -> Result<Option<ProcRecord>> {
        ProcRecordEntity::find()
            .filter(ProcRecordColumn::Collection.eq(collection))
            .filter(ProcRecordColumn::Kind.eq(kind))
            .filter(ProcRecordColumn::EntityId.eq(entity_id))
            .order_by_asc(ProcRecordColumn::CreatedAt)
            .one(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn procs_for_entity(&self, kind: EntityKind, entity_id: Uuid) -> Result<Vec<ProcRecord>> {
        ProcRecordEntity::find()
            .filter(ProcRecordColumn::Kind.eq(kind))
            .filter(ProcRecordColumn::EntityId.eq(entity_id))
            .order_by_asc(ProcRecordColumn::Collection)
            .all(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn save_proc(&self, record: &ProcRecord) -> Result<ProcRecord> {
        let mut record = record.clone();
        record.updated_at = now();
        record
            .into_active_model()
            .reset_all()
            .update(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn items_to_process(&self, query: &ProcQuery) -> Result<Vec<ProcRecord>> {
        let mut select = Self::scoped(query);
        if !query.force_update {
            select = select.filter(ProcRecordColumn::MigrationStatus.ne(ProgressStatus::Done));
        }
        select
            .order_by_asc(ProcRecordColumn::Pid)
            .all(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn items_to_publish(&self, query: &ProcQuery, website: WebsiteKind) -> Result<Vec<ProcRecord>> {
        let mut select = Self::scoped(query).filter(ProcRecordColumn::EntityId.is_not_null());
        if !query.force_update {
            select = select.filter(ProcRecord::publication_column(website).ne(ProgressStatus::Done));
        }
        select
            .order_by_asc(ProcRecordColumn::Pid)
            .all(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn status_counts(&self, collection: &str, kind: EntityKind) -> Result<StatusCounts> {
        let migration = self.count_by(collection, kind, ProcRecordColumn::MigrationStatus).await?;
        let qa_publication = self.count_by(collection, kind, ProcRecordColumn::QaWsStatus).await?;
        let public_publication = self.count_by(collection, kind, ProcRecordColumn::PublicWsStatus).await?;
        Ok(StatusCounts {
            total: migration.values().sum(),
            migration,
            qa_publication,
            public_publication,
        })
    }
}

// ============================================================================
// Failure ledger
// ============================================================================

#[async_trait]
impl FailureLedger for Repository {
    async fn record(&self, entry: FailureEntry) {
        trace_entry(&entry);

        let event = UnexpectedEventActiveModel {
            id: Set(Uuid::new_v4()),
            operation: Set(entry.operation.clone()),
            user_id: Set(entry.user_id),
            username: Set(entry.username.clone()),
            collection: Set(entry.collection.clone()),
            pid: Set(entry.pid.clone()),
            flags: Set(serde_json::Value::Object(entry.flags.clone())),
            exception_type: Set(entry.exception_type.clone()),
            exception_summary: Set(entry.exception_summary.clone()),
            created_at: Set(now()),
        };
        if let Err(e) = event.insert(self.write_conn()).await {
            error!(
                error = %e,
                operation = %entry.operation,
                collection = %entry.collection,
                "Failed to persist failure ledger entry"
            );
        }
    }
}
