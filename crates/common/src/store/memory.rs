//! In-process store for tests and dry runs
//!
//! All state sits behind one mutex, so every get-or-create is atomic.

use super::*;
use crate::errors::AppError;
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct State {
    collections: Vec<Collection>,
    journals: Vec<Journal>,
    subjects: Vec<JournalSubject>,
    institutions: Vec<JournalInstitution>,
    journal_collections: Vec<JournalCollection>,
    history: Vec<JournalHistory>,
    issues: Vec<Issue>,
    articles: Vec<Article>,
    procs: Vec<ProcRecord>,
}

/// Mutex-guarded implementation of [`EntityStore`] and [`ProcStore`]
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

fn now() -> sea_orm::prelude::DateTimeWithTimeZone {
    chrono::Utc::now().into()
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state.lock().map_err(|_| AppError::Internal {
            message: "memory store lock poisoned".to_string(),
        })
    }

    /// Snapshot of every canonical journal
    pub fn journals(&self) -> Vec<Journal> {
        self.lock().map(|s| s.journals.clone()).unwrap_or_default()
    }

    /// Snapshot of every issue
    pub fn issues(&self) -> Vec<Issue> {
        self.lock().map(|s| s.issues.clone()).unwrap_or_default()
    }

    /// Snapshot of every article
    pub fn articles(&self) -> Vec<Article> {
        self.lock().map(|s| s.articles.clone()).unwrap_or_default()
    }

    /// Snapshot of every processing record
    pub fn procs(&self) -> Vec<ProcRecord> {
        self.lock().map(|s| s.procs.clone()).unwrap_or_default()
    }

    /// Insert or replace a processing record as-is
    pub fn put_proc(&self, record: ProcRecord) -> Result<()> {
        let mut state = self.lock()?;
        state.procs.retain(|p| p.id != record.id);
        state.procs.push(record);
        Ok(())
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn get_or_create_collection(&self, acron: &str) -> Result<Collection> {
        let mut state = self.lock()?;
        if let Some(found) = state.collections.iter().find(|c| c.acron == acron) {
            return Ok(found.clone());
        }
        let collection = Collection {
            id: Uuid::new_v4(),
            acron: acron.to_string(),
            name: None,
            created_at: now(),
        };
        state.collections.push(collection.clone());
        Ok(collection)
    }

    async fn find_collection(&self, acron: &str) -> Result<Option<Collection>> {
        Ok(self.lock()?.collections.iter().find(|c| c.acron == acron).cloned())
    }

    async fn find_journal(&self, key: &JournalKey) -> Result<Option<Journal>> {
        Ok(key.best_match(&self.lock()?.journals).cloned())
    }

    async fn find_journal_by_id(&self, id: Uuid) -> Result<Option<Journal>> {
        Ok(self.lock()?.journals.iter().find(|j| j.id == id).cloned())
    }

    async fn upsert_journal(&self, data: &JournalData) -> Result<Journal> {
        let key = data.key();
        if key.is_empty() {
            return Err(AppError::MissingField {
                field: "journal title or ISSN".to_string(),
            });
        }
        let mut state = self.lock()?;
        let existing = key.best_match(&state.journals).map(|j| j.id);
        if let Some(journal) = existing.and_then(|id| state.journals.iter_mut().find(|j| j.id == id)) {
            data.apply_to(journal);
            journal.updated_at = now();
            return Ok(journal.clone());
        }
        let journal = data.to_journal();
        state.journals.push(journal.clone());
        Ok(journal)
    }

    async fn journal_subjects(&self, journal_id: Uuid) -> Result<Vec<JournalSubject>> {
        Ok(self
            .lock()?
            .subjects
            .iter()
            .filter(|s| s.journal_id == journal_id)
            .cloned()
            .collect())
    }

    async fn add_subject(&self, journal_id: Uuid, code: &str) -> Result<bool> {
        let mut state = self.lock()?;
        if state.subjects.iter().any(|s| s.journal_id == journal_id && s.code == code) {
            return Ok(false);
        }
        state.subjects.push(JournalSubject {
            id: Uuid::new_v4(),
            journal_id,
            code: code.to_string(),
            created_at: now(),
        });
        Ok(true)
    }

    async fn journal_institutions(&self, journal_id: Uuid) -> Result<Vec<JournalInstitution>> {
        Ok(self
            .lock()?
            .institutions
            .iter()
            .filter(|i| i.journal_id == journal_id)
            .cloned()
            .collect())
    }

    async fn add_institution(&self, journal_id: Uuid, role: InstitutionRole, name: &str) -> Result<bool> {
        let mut state = self.lock()?;
        if state
            .institutions
            .iter()
            .any(|i| i.journal_id == journal_id && i.role == role && i.name == name)
        {
            return Ok(false);
        }
        state.institutions.push(JournalInstitution {
            id: Uuid::new_v4(),
            journal_id,
            role,
            name: name.to_string(),
            created_at: now(),
        });
        Ok(true)
    }

    async fn upsert_journal_collection(
        &self,
        journal_id: Uuid,
        collection: &str,
        journal_acron: Option<&str>,
        availability_status: Option<&str>,
    ) -> Result<JournalCollection> {
        let mut state = self.lock()?;
        if let Some(found) = state
            .journal_collections
            .iter_mut()
            .find(|jc| jc.journal_id == journal_id && jc.collection == collection)
        {
            if let Some(acron) = journal_acron {
                found.journal_acron = Some(acron.to_string());
            }
            if let Some(status) = availability_status {
                found.availability_status = Some(status.to_string());
            }
            found.updated_at = now();
            return Ok(found.clone());
        }
        let linkage = JournalCollection {
            id: Uuid::new_v4(),
            journal_id,
            collection: collection.to_string(),
            journal_acron: journal_acron.map(str::to_string),
            availability_status: availability_status.map(str::to_string),
            created_at: now(),
            updated_at: now(),
        };
        state.journal_collections.push(linkage.clone());
        Ok(linkage)
    }

    async fn journal_history(&self, journal_collection_id: Uuid) -> Result<Vec<JournalHistory>> {
        Ok(self
            .lock()?
            .history
            .iter()
            .filter(|h| h.journal_collection_id == journal_collection_id)
            .cloned()
            .collect())
    }

    async fn add_history_event(&self, journal_collection_id: Uuid, event: &HistoryEvent) -> Result<bool> {
        let mut state = self.lock()?;
        if state
            .history
            .iter()
            .any(|h| h.journal_collection_id == journal_collection_id && event.matches(h))
        {
            return Ok(false);
        }
        state.history.push(JournalHistory {
            id: Uuid::new_v4(),
            journal_collection_id,
            event_type: event.event_type.clone(),
            year: event.year.clone(),
            month: event.month.clone(),
            day: event.day.clone(),
            interruption_reason: event.interruption_reason.clone(),
            created_at: now(),
        });
        Ok(true)
    }

    async fn find_issue(&self, key: &IssueKey) -> Result<Option<Issue>> {
        Ok(self.lock()?.issues.iter().find(|i| key.matches(i)).cloned())
    }

    async fn find_issue_by_id(&self, id: Uuid) -> Result<Option<Issue>> {
        Ok(self.lock()?.issues.iter().find(|i| i.id == id).cloned())
    }

    async fn get_or_create_issue(&self, key: &IssueKey, publication_year: Option<&str>) -> Result<Issue> {
        let mut state = self.lock()?;
        if let Some(found) = state.issues.iter().find(|i| key.matches(i)) {
            return Ok(found.clone());
        }
        let sequence = state.issues.iter().filter(|i| i.journal_id == key.journal_id).count() as i32 + 1;
        let issue = Issue {
            id: Uuid::new_v4(),
            journal_id: key.journal_id,
            volume: key.volume.clone(),
            number: key.number.clone(),
            supplement: key.supplement.clone(),
            publication_year: non_blank(publication_year),
            sequence,
            created_at: now(),
            updated_at: now(),
        };
        state.issues.push(issue.clone());
        Ok(issue)
    }

    async fn upsert_article(&self, data: &ArticleData) -> Result<Article> {
        let mut state = self.lock()?;
        if let Some(found) = state
            .articles
            .iter_mut()
            .find(|a| a.issue_id == data.issue_id && a.pid_v2 == data.pid_v2)
        {
            data.apply_to(found);
            found.updated_at = now();
            return Ok(found.clone());
        }
        let article = data.to_article();
        state.articles.push(article.clone());
        Ok(article)
    }

    async fn find_article_by_id(&self, id: Uuid) -> Result<Option<Article>> {
        Ok(self.lock()?.articles.iter().find(|a| a.id == id).cloned())
    }
}

#[async_trait]
impl ProcStore for MemoryStore {
    async fn get_or_create_proc(&self, collection: &str, kind: EntityKind, pid: &str) -> Result<ProcRecord> {
        let mut state = self.lock()?;
        if let Some(found) = state
            .procs
            .iter()
            .find(|p| p.collection == collection && p.kind == kind && p.pid == pid)
        {
            return Ok(found.clone());
        }
        let record = ProcRecord::new(kind, collection, pid);
        state.procs.push(record.clone());
        Ok(record)
    }

    async fn find_proc(&self, collection: &str, kind: EntityKind, pid: &str) -> Result<Option<ProcRecord>> {
        Ok(self
            .lock()?
            .procs
            .iter()
            .find(|p| p.collection == collection && p.kind == kind && p.pid == pid)
            .cloned())
    }

    async fn find_proc_by_id(&self, id: Uuid) -> Result<Option<ProcRecord>> {
        Ok(self.lock()?.procs.iter().find(|p| p.id == id).cloned())
    }

    async fn find_proc_by_entity(
        &self,
        collection: &str,
        kind: EntityKind,
        entity_id: Uuid,
    ) -> Result<Option<ProcRecord>> {
        Ok(self
            .lock()?
            .procs
            .iter()
            .find(|p| p.collection == collection && p.kind == kind && p.entity_id == Some(entity_id))
            .cloned())
    }

    async fn procs_for_entity(&self, kind: EntityKind, entity_id: Uuid) -> Result<Vec<ProcRecord>> {
        Ok(self
            .lock()?
            .procs
            .iter()
            .filter(|p| p.kind == kind && p.entity_id == Some(entity_id))
            .cloned()
            .collect())
    }

    async fn save_proc(&self, record: &ProcRecord) -> Result<ProcRecord> {
        let mut state = self.lock()?;
        let slot = state
            .procs
            .iter_mut()
            .find(|p| p.id == record.id)
            .ok_or_else(|| AppError::NotFound {
                resource_type: "proc_record".to_string(),
                id: record.id.to_string(),
            })?;
        *slot = record.clone();
        slot.updated_at = now();
        Ok(slot.clone())
    }

    async fn items_to_process(&self, query: &ProcQuery) -> Result<Vec<ProcRecord>> {
        let state = self.lock()?;
        let mut items: Vec<ProcRecord> = state
            .procs
            .iter()
            .filter(|p| query.scopes(p))
            .filter(|p| query.force_update || p.migration_status != ProgressStatus::Done)
            .cloned()
            .collect();
        items.sort_by(|a, b| a.pid.cmp(&b.pid));
        Ok(items)
    }

    async fn items_to_publish(&self, query: &ProcQuery, website: WebsiteKind) -> Result<Vec<ProcRecord>> {
        let state = self.lock()?;
        let mut items: Vec<ProcRecord> = state
            .procs
            .iter()
            .filter(|p| query.scopes(p) && p.entity_id.is_some())
            .filter(|p| query.force_update || p.publication_status(website) != ProgressStatus::Done)
            .cloned()
            .collect();
        items.sort_by(|a, b| a.pid.cmp(&b.pid));
        Ok(items)
    }

    async fn status_counts(&self, collection: &str, kind: EntityKind) -> Result<StatusCounts> {
        let state = self.lock()?;
        Ok(StatusCounts::from_records(
            state.procs.iter().filter(|p| p.collection == collection && p.kind == kind),
        ))
    }
}
