//! Store abstractions
//!
//! `EntityStore` holds the canonical entities and their nested sets,
//! `ProcStore` holds processing records. Both are implemented by the
//! database `Repository` and by the in-process `MemoryStore`.

mod memory;

pub use memory::MemoryStore;

use crate::db::models::*;
use crate::errors::Result;
use async_trait::async_trait;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::OnceLock;
use uuid::Uuid;

const ISSN_PATTERN: &str = r"^\d{4}-\d{3}[\dXx]$";

fn issn_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(ISSN_PATTERN).ok()).as_ref()
}

/// Trim a value, mapping blank to `None`
pub fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Normalize an ISSN (`1234-567x` becomes `1234-567X`); invalid values are dropped
pub fn normalize_issn(value: Option<&str>) -> Option<String> {
    let issn = non_blank(value)?;
    if issn_pattern().is_some_and(|re| re.is_match(&issn)) {
        Some(issn.to_ascii_uppercase())
    } else {
        tracing::warn!(issn = %issn, "Ignoring malformed ISSN");
        None
    }
}

/// Journal natural key: ISSN pair, title as fallback
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalKey {
    pub title: Option<String>,
    pub issn_electronic: Option<String>,
    pub issn_print: Option<String>,
}

impl JournalKey {
    pub fn new(title: Option<&str>, issn_electronic: Option<&str>, issn_print: Option<&str>) -> Self {
        Self {
            title: non_blank(title),
            issn_electronic: normalize_issn(issn_electronic),
            issn_print: normalize_issn(issn_print),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.issn_electronic.is_none() && self.issn_print.is_none()
    }

    fn has_issn(&self) -> bool {
        self.issn_electronic.is_some() || self.issn_print.is_some()
    }

    /// Title as compared against stored titles: case is ignored
    pub fn folded_title(&self) -> Option<String> {
        self.title.as_deref().map(|t| t.trim().to_lowercase())
    }

    /// Match strength against a stored journal, `None` when it does not match.
    ///
    /// Any requested ISSN equal to the stored ISSN of the same kind matches;
    /// without ISSNs the title must match.
    pub fn score(&self, journal: &Journal) -> Option<u8> {
        let electronic = self.issn_electronic.is_some() && self.issn_electronic == journal.issn_electronic;
        let print = self.issn_print.is_some() && self.issn_print == journal.issn_print;
        let title = match (self.folded_title(), &journal.title) {
            (Some(wanted), Some(stored)) => wanted == stored.trim().to_lowercase(),
            _ => false,
        };

        let matched = if self.has_issn() { electronic || print } else { title };
        matched.then_some(electronic as u8 + print as u8 + title as u8)
    }

    /// Best candidate: highest score, then oldest
    pub fn best_match<'a, I>(&self, journals: I) -> Option<&'a Journal>
    where
        I: IntoIterator<Item = &'a Journal>,
    {
        journals
            .into_iter()
            .filter_map(|j| self.score(j).map(|s| (s, j)))
            .max_by(|(sa, a), (sb, b)| sa.cmp(sb).then(b.created_at.cmp(&a.created_at)))
            .map(|(_, j)| j)
    }

    /// Query parameters for the remote journal endpoint
    pub fn params(&self) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        params.insert("title".to_string(), self.title.clone().unwrap_or_default());
        params.insert("issn_print".to_string(), self.issn_print.clone().unwrap_or_default());
        params.insert(
            "issn_electronic".to_string(),
            self.issn_electronic.clone().unwrap_or_default(),
        );
        params
    }
}

impl std::fmt::Display for JournalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "title={} issn_electronic={} issn_print={}",
            self.title.as_deref().unwrap_or(""),
            self.issn_electronic.as_deref().unwrap_or(""),
            self.issn_print.as_deref().unwrap_or("")
        )
    }
}

/// Journal scalar fields delivered by the remote source
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalData {
    pub title: Option<String>,
    pub short_title: Option<String>,
    pub official_title: Option<String>,
    pub iso_short_title: Option<String>,
    pub issn_print: Option<String>,
    pub issn_electronic: Option<String>,
    pub issnl: Option<String>,
    pub foundation_year: Option<String>,
    pub previous_title: Option<String>,
    pub next_title: Option<String>,
    pub license_code: Option<String>,
    pub nlm_title: Option<String>,
    pub doi_prefix: Option<String>,
}

impl JournalData {
    pub fn key(&self) -> JournalKey {
        JournalKey::new(
            self.title.as_deref().or(self.official_title.as_deref()),
            self.issn_electronic.as_deref(),
            self.issn_print.as_deref(),
        )
    }

    /// Overwrite stored scalars with every present value
    pub fn apply_to(&self, journal: &mut Journal) {
        fn merge(slot: &mut Option<String>, value: &Option<String>) {
            if value.is_some() {
                slot.clone_from(value);
            }
        }
        let key = self.key();
        merge(&mut journal.title, &self.title);
        merge(&mut journal.short_title, &self.short_title);
        merge(&mut journal.official_title, &self.official_title);
        merge(&mut journal.iso_short_title, &self.iso_short_title);
        merge(&mut journal.issn_print, &key.issn_print);
        merge(&mut journal.issn_electronic, &key.issn_electronic);
        merge(&mut journal.issnl, &self.issnl);
        merge(&mut journal.foundation_year, &self.foundation_year);
        merge(&mut journal.previous_title, &self.previous_title);
        merge(&mut journal.next_title, &self.next_title);
        merge(&mut journal.license_code, &self.license_code);
        merge(&mut journal.nlm_title, &self.nlm_title);
        merge(&mut journal.doi_prefix, &self.doi_prefix);
    }

    /// Fresh journal built from these scalars
    pub fn to_journal(&self) -> Journal {
        let now = chrono::Utc::now();
        let mut journal = Journal {
            id: Uuid::new_v4(),
            title: None,
            short_title: None,
            official_title: None,
            iso_short_title: None,
            issn_print: None,
            issn_electronic: None,
            issnl: None,
            foundation_year: None,
            previous_title: None,
            next_title: None,
            license_code: None,
            nlm_title: None,
            doi_prefix: None,
            created_at: now.into(),
            updated_at: now.into(),
        };
        self.apply_to(&mut journal);
        journal
    }
}

/// Issue natural key; absent parts are `""`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IssueKey {
    pub journal_id: Uuid,
    pub volume: String,
    pub number: String,
    pub supplement: String,
}

impl IssueKey {
    pub fn new(journal_id: Uuid, volume: Option<&str>, number: Option<&str>, supplement: Option<&str>) -> Self {
        Self {
            journal_id,
            volume: non_blank(volume).unwrap_or_default(),
            number: non_blank(number).unwrap_or_default(),
            supplement: non_blank(supplement).unwrap_or_default(),
        }
    }

    pub fn matches(&self, issue: &Issue) -> bool {
        issue.journal_id == self.journal_id
            && issue.volume == self.volume
            && issue.number == self.number
            && issue.supplement == self.supplement
    }
}

/// Article fields built from a legacy document record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleData {
    pub journal_id: Uuid,
    pub issue_id: Uuid,
    pub pid_v2: String,
    pub pid_v3: Option<String>,
    pub doi: Option<String>,
    pub title: Option<String>,
    pub first_page: Option<String>,
    pub last_page: Option<String>,
    pub publication_year: Option<String>,
}

impl ArticleData {
    pub fn apply_to(&self, article: &mut Article) {
        article.journal_id = self.journal_id;
        article.pid_v3.clone_from(&self.pid_v3);
        article.doi.clone_from(&self.doi);
        article.title.clone_from(&self.title);
        article.first_page.clone_from(&self.first_page);
        article.last_page.clone_from(&self.last_page);
        article.publication_year.clone_from(&self.publication_year);
    }

    pub fn to_article(&self) -> Article {
        let now = chrono::Utc::now();
        let mut article = Article {
            id: Uuid::new_v4(),
            journal_id: self.journal_id,
            issue_id: self.issue_id,
            pid_v2: self.pid_v2.clone(),
            pid_v3: None,
            doi: None,
            title: None,
            first_page: None,
            last_page: None,
            publication_year: None,
            created_at: now.into(),
            updated_at: now.into(),
        };
        self.apply_to(&mut article);
        article
    }
}

/// One journal history event; absent parts are `""`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub event_type: String,
    pub year: String,
    pub month: String,
    pub day: String,
    pub interruption_reason: String,
}

impl HistoryEvent {
    pub fn matches(&self, stored: &JournalHistory) -> bool {
        stored.event_type == self.event_type
            && stored.year == self.year
            && stored.month == self.month
            && stored.day == self.day
            && stored.interruption_reason == self.interruption_reason
    }
}

/// Key-value filter over processing records
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcFilter {
    /// Parent processing record (journal record for issues, issue record for articles)
    pub parent_id: Option<Uuid>,
    pub pid: Option<String>,
    pub journal_acron: Option<String>,
    pub publication_year: Option<String>,
}

impl ProcFilter {
    pub fn parent(parent_id: Uuid) -> Self {
        Self {
            parent_id: Some(parent_id),
            ..Default::default()
        }
    }

    pub fn matches(&self, record: &ProcRecord) -> bool {
        self.parent_id.map_or(true, |id| record.parent_id == Some(id))
            && self.pid.as_ref().map_or(true, |pid| &record.pid == pid)
            && self
                .journal_acron
                .as_ref()
                .map_or(true, |acron| record.journal_acron.as_ref() == Some(acron))
            && self
                .publication_year
                .as_ref()
                .map_or(true, |year| record.publication_year.as_ref() == Some(year))
    }
}

/// Eligibility query: collection, kind, filter and force flag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcQuery {
    pub collection: String,
    pub kind: EntityKind,
    pub filter: ProcFilter,
    pub force_update: bool,
}

impl ProcQuery {
    pub fn new(collection: &str, kind: EntityKind) -> Self {
        Self {
            collection: collection.to_string(),
            kind,
            filter: ProcFilter::default(),
            force_update: false,
        }
    }

    pub fn filter(mut self, filter: ProcFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn force(mut self, force_update: bool) -> Self {
        self.force_update = force_update;
        self
    }

    /// Record belongs to the queried collection, kind and filter
    pub fn scopes(&self, record: &ProcRecord) -> bool {
        record.collection == self.collection && record.kind == self.kind && self.filter.matches(record)
    }
}

/// Processing record counts per status axis
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub total: u64,
    pub migration: BTreeMap<String, u64>,
    pub qa_publication: BTreeMap<String, u64>,
    pub public_publication: BTreeMap<String, u64>,
}

impl StatusCounts {
    pub fn from_records<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a ProcRecord>,
    {
        let mut counts = Self::default();
        for record in records {
            counts.total += 1;
            *counts.migration.entry(record.migration_status.to_string()).or_default() += 1;
            *counts.qa_publication.entry(record.qa_ws_status.to_string()).or_default() += 1;
            *counts
                .public_publication
                .entry(record.public_ws_status.to_string())
                .or_default() += 1;
        }
        counts
    }

    pub fn migrated(&self, status: ProgressStatus) -> u64 {
        self.migration.get(status.as_str()).copied().unwrap_or(0)
    }
}

/// Canonical entity store
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn get_or_create_collection(&self, acron: &str) -> Result<Collection>;

    async fn find_collection(&self, acron: &str) -> Result<Option<Collection>>;

    /// Keyed lookup; best candidate per [`JournalKey::best_match`]
    async fn find_journal(&self, key: &JournalKey) -> Result<Option<Journal>>;

    async fn find_journal_by_id(&self, id: Uuid) -> Result<Option<Journal>>;

    /// Create or update the journal matching `data.key()`
    async fn upsert_journal(&self, data: &JournalData) -> Result<Journal>;

    async fn journal_subjects(&self, journal_id: Uuid) -> Result<Vec<JournalSubject>>;

    /// Returns whether a row was inserted
    async fn add_subject(&self, journal_id: Uuid, code: &str) -> Result<bool>;

    async fn journal_institutions(&self, journal_id: Uuid) -> Result<Vec<JournalInstitution>>;

    async fn add_institution(&self, journal_id: Uuid, role: InstitutionRole, name: &str) -> Result<bool>;

    async fn upsert_journal_collection(
        &self,
        journal_id: Uuid,
        collection: &str,
        journal_acron: Option<&str>,
        availability_status: Option<&str>,
    ) -> Result<JournalCollection>;

    async fn journal_history(&self, journal_collection_id: Uuid) -> Result<Vec<JournalHistory>>;

    async fn add_history_event(&self, journal_collection_id: Uuid, event: &HistoryEvent) -> Result<bool>;

    async fn find_issue(&self, key: &IssueKey) -> Result<Option<Issue>>;

    async fn find_issue_by_id(&self, id: Uuid) -> Result<Option<Issue>>;

    /// Get or create; a new issue gets the next sequence within its journal
    async fn get_or_create_issue(&self, key: &IssueKey, publication_year: Option<&str>) -> Result<Issue>;

    async fn upsert_article(&self, data: &ArticleData) -> Result<Article>;

    async fn find_article_by_id(&self, id: Uuid) -> Result<Option<Article>>;
}

/// Processing record store
#[async_trait]
pub trait ProcStore: Send + Sync {
    /// Atomic get-or-create by `(collection, kind, pid)`
    async fn get_or_create_proc(&self, collection: &str, kind: EntityKind, pid: &str) -> Result<ProcRecord>;

    async fn find_proc(&self, collection: &str, kind: EntityKind, pid: &str) -> Result<Option<ProcRecord>>;

    async fn find_proc_by_id(&self, id: Uuid) -> Result<Option<ProcRecord>>;

    /// Record of `kind` in `collection` linked to an entity
    async fn find_proc_by_entity(
        &self,
        collection: &str,
        kind: EntityKind,
        entity_id: Uuid,
    ) -> Result<Option<ProcRecord>>;

    /// Every record of `kind` linked to an entity, across collections
    async fn procs_for_entity(&self, kind: EntityKind, entity_id: Uuid) -> Result<Vec<ProcRecord>>;

    /// Persist a record, bumping `updated_at`
    async fn save_proc(&self, record: &ProcRecord) -> Result<ProcRecord>;

    /// Records in scope where `force_update` or migration is not DONE, ordered by pid
    async fn items_to_process(&self, query: &ProcQuery) -> Result<Vec<ProcRecord>>;

    /// Records in scope with an entity, where `force_update` or the
    /// website's publication is not DONE, ordered by pid
    async fn items_to_publish(&self, query: &ProcQuery, website: WebsiteKind) -> Result<Vec<ProcRecord>>;

    async fn status_counts(&self, collection: &str, kind: EntityKind) -> Result<StatusCounts>;
}

/// Desired members absent from `existing`, deduplicated, in desired order
pub(crate) fn missing<'a, T, K, F>(desired: &'a [K], existing: &[T], key_of: F) -> Vec<&'a K>
where
    K: Eq + std::hash::Hash,
    F: Fn(&T) -> K,
{
    let present: HashSet<K> = existing.iter().map(key_of).collect();
    let mut seen = HashSet::new();
    desired
        .iter()
        .filter(|k| !present.contains(*k) && seen.insert(*k))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn journal(title: &str, issn_e: Option<&str>, issn_p: Option<&str>) -> Journal {
        JournalData {
            title: Some(title.to_string()),
            issn_electronic: issn_e.map(str::to_string),
            issn_print: issn_p.map(str::to_string),
            ..Default::default()
        }
        .to_journal()
    }

    #[test]
    fn test_normalize_issn() {
        assert_eq!(normalize_issn(Some(" 1234-567x ")), Some("1234-567X".to_string()));
        assert_eq!(normalize_issn(Some("12345678")), None);
        assert_eq!(normalize_issn(Some("")), None);
        assert_eq!(normalize_issn(None), None);
    }

    #[test]
    fn test_journal_key_issn_match() {
        let stored = journal("Revista", Some("1234-5678"), Some("8765-4321"));
        let by_print = JournalKey::new(None, None, Some("8765-4321"));
        assert_eq!(by_print.score(&stored), Some(1));

        let full = JournalKey::new(Some("revista"), Some("1234-5678"), Some("8765-4321"));
        assert_eq!(full.score(&stored), Some(3));

        let other = JournalKey::new(Some("Revista"), Some("1111-1111"), None);
        assert_eq!(other.score(&stored), None);
    }

    #[test]
    fn test_journal_key_title_fallback() {
        let stored = journal("Revista", None, None);
        assert!(JournalKey::new(Some("Revista"), None, None).score(&stored).is_some());
        assert!(JournalKey::new(Some("Outra"), None, None).score(&stored).is_none());
    }

    #[test]
    fn test_title_match_ignores_case() {
        let stored = journal("Ciência Rural", None, None);
        let key = JournalKey::new(Some("CIÊNCIA RURAL"), None, None);
        assert_eq!(key.folded_title().as_deref(), Some("ciência rural"));
        assert!(key.score(&stored).is_some());
    }

    #[test]
    fn test_best_match_prefers_full_key() {
        let partial = journal("Antiga", None, Some("8765-4321"));
        let full = journal("Revista", Some("1234-5678"), Some("8765-4321"));
        let key = JournalKey::new(Some("Revista"), Some("1234-5678"), Some("8765-4321"));
        let journals = vec![partial, full.clone()];
        assert_eq!(key.best_match(&journals).map(|j| j.id), Some(full.id));
    }

    #[test]
    fn test_proc_filter() {
        let parent = Uuid::new_v4();
        let mut record = ProcRecord::new(EntityKind::Issue, "scl", "0001-000120230001");
        record.parent_id = Some(parent);
        record.publication_year = Some("2023".to_string());

        assert!(ProcFilter::parent(parent).matches(&record));
        assert!(!ProcFilter::parent(Uuid::new_v4()).matches(&record));

        let by_year = ProcFilter {
            publication_year: Some("2022".to_string()),
            ..Default::default()
        };
        assert!(!by_year.matches(&record));
    }

    #[test]
    fn test_missing_members() {
        let desired = vec!["A".to_string(), "B".to_string(), "B".to_string(), "C".to_string()];
        let existing = vec!["B".to_string()];
        let missing: Vec<String> = missing(&desired, &existing, |e| e.clone())
            .into_iter()
            .cloned()
            .collect();
        assert_eq!(missing, vec!["A".to_string(), "C".to_string()]);
    }
}
