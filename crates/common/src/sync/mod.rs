//! Create-or-update synchronization against the remote metadata source
//!
//! A keyed lookup comes first; only a miss (or `force_update`) calls the
//! remote source. Every result row is applied by natural key and its nested
//! sets are reconciled (insert what is missing, leave the rest), so repeated
//! runs converge instead of appending duplicates.

use crate::auth::Actor;
use crate::config::RemoteConfig;
use crate::db::models::{EntityKind, InstitutionRole, Issue, Journal};
use crate::errors::Result;
use crate::ledger::{FailureEntry, FailureLedger};
use crate::metrics;
use crate::proc::derive_issue_pid;
use crate::remote::{parse_results, CollectionRow, IssueRow, JournalRow, MetadataSource};
use crate::store::{missing, EntityStore, HistoryEvent, IssueKey, JournalKey, ProcStore};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Availability recorded for a journal found in a collection
const AVAILABILITY_CURRENT: &str = "C";

/// Caller context stamped on ledger entries written during a sync
#[derive(Debug, Clone, Copy)]
pub struct SyncContext<'a> {
    pub actor: &'a Actor,
    pub collection: &'a str,
    pub pid: Option<&'a str>,
}

impl<'a> SyncContext<'a> {
    pub fn new(actor: &'a Actor, collection: &'a str, pid: Option<&'a str>) -> Self {
        Self { actor, collection, pid }
    }
}

pub struct Synchronizer {
    entities: Arc<dyn EntityStore>,
    procs: Arc<dyn ProcStore>,
    source: Arc<dyn MetadataSource>,
    ledger: Arc<dyn FailureLedger>,
    journal_api_url: String,
    issue_api_url: String,
    timeout: Duration,
}

impl Synchronizer {
    pub fn new(
        entities: Arc<dyn EntityStore>,
        procs: Arc<dyn ProcStore>,
        source: Arc<dyn MetadataSource>,
        ledger: Arc<dyn FailureLedger>,
        config: &RemoteConfig,
    ) -> Self {
        Self {
            entities,
            procs,
            source,
            ledger,
            journal_api_url: config.journal_api_url.clone(),
            issue_api_url: config.issue_api_url.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Create or update the journal for `key`.
    ///
    /// `Ok(None)` means the journal could not be synchronized this cycle:
    /// the remote source failed (already in the ledger) or had no match.
    #[instrument(skip(self, ctx), fields(collection = %ctx.collection, key = %key))]
    pub async fn sync_journal(
        &self,
        ctx: &SyncContext<'_>,
        key: &JournalKey,
        force_update: bool,
    ) -> Result<Option<Journal>> {
        if !force_update {
            if let Some(journal) = self.entities.find_journal(key).await? {
                debug!(journal_id = %journal.id, "Journal already registered");
                return Ok(Some(journal));
            }
        }

        let url = self.journal_api_url.clone();
        let Some(rows) = self
            .fetch_rows::<JournalRow>(ctx, "sync_journal", &url, key.params(), force_update)
            .await
        else {
            return Ok(None);
        };

        if rows.is_empty() {
            info!("Remote source has no journal for key");
            return Ok(None);
        }
        if rows.len() > 1 {
            warn!(rows = rows.len(), "Ambiguous remote journal response; applying every row");
            metrics::record_ambiguous_response(&url);
        }

        // every row is applied; only a row matching the key is returned
        let mut chosen: Option<(u8, Journal)> = None;
        for row in &rows {
            let journal = self.apply_journal_row(row).await?;
            let Some(score) = key.score(&journal) else {
                continue;
            };
            if chosen.as_ref().map_or(true, |(best, _)| score > *best) {
                chosen = Some((score, journal));
            }
        }
        if chosen.is_none() {
            info!("No remote journal row matches the key");
        }
        Ok(chosen.map(|(_, journal)| journal))
    }

    async fn apply_journal_row(&self, row: &JournalRow) -> Result<Journal> {
        let journal = self.entities.upsert_journal(&row.journal_data()).await?;

        let subjects = self.entities.journal_subjects(journal.id).await?;
        for code in missing(&row.subject_codes(), &subjects, |s| s.code.clone()) {
            self.entities.add_subject(journal.id, code).await?;
        }

        let desired: Vec<(InstitutionRole, String)> = row
            .publisher_names()
            .into_iter()
            .map(|name| (InstitutionRole::Publisher, name))
            .chain(row.owner_names().into_iter().map(|name| (InstitutionRole::Owner, name)))
            .collect();
        let institutions = self.entities.journal_institutions(journal.id).await?;
        for (role, name) in missing(&desired, &institutions, |i| (i.role, i.name.clone())) {
            self.entities.add_institution(journal.id, *role, name).await?;
        }

        for item in row.collections() {
            self.apply_collection_row(&journal, item).await?;
        }

        Ok(journal)
    }

    /// Journal presence in one collection: its processing record, the
    /// collection linkage and the linkage's history
    async fn apply_collection_row(&self, journal: &Journal, item: &CollectionRow) -> Result<()> {
        let Some(ref acron) = item.collection_acron else {
            return Ok(());
        };
        if self.entities.find_collection(acron).await?.is_none() {
            debug!(collection = %acron, "Skipping unregistered collection");
            return Ok(());
        }

        let availability = item.availability_status.as_deref().unwrap_or(AVAILABILITY_CURRENT);

        if let Some(ref issn) = item.scielo_issn {
            let mut record = self.procs.get_or_create_proc(acron, EntityKind::Journal, issn).await?;
            if item.journal_acron.is_some() {
                record.journal_acron.clone_from(&item.journal_acron);
            }
            record.title.clone_from(&journal.title);
            record.availability_status = Some(availability.to_string());
            record.complete_migration(journal.id);
            self.procs.save_proc(&record).await?;
        }

        let linkage = self
            .entities
            .upsert_journal_collection(journal.id, acron, item.journal_acron.as_deref(), Some(availability))
            .await?;

        let desired: Vec<HistoryEvent> = item
            .journal_history
            .iter()
            .flatten()
            .filter_map(|h| h.to_event())
            .collect();
        let history = self.entities.journal_history(linkage.id).await?;
        for event in missing(&desired, &history, |h| HistoryEvent {
            event_type: h.event_type.clone(),
            year: h.year.clone(),
            month: h.month.clone(),
            day: h.day.clone(),
            interruption_reason: h.interruption_reason.clone(),
        }) {
            self.entities.add_history_event(linkage.id, event).await?;
        }
        Ok(())
    }

    /// Create or update the issue `(journal, volume, number, supplement)`
    /// and give every collection that holds the journal an issue record
    /// with a derived PID. When `ctx.pid` is set it is the legacy issue
    /// record being migrated; the caller links that record and no PID is
    /// derived for it in `ctx.collection`.
    #[instrument(skip(self, ctx, journal), fields(collection = %ctx.collection, journal_id = %journal.id))]
    pub async fn sync_issue(
        &self,
        ctx: &SyncContext<'_>,
        journal: &Journal,
        volume: Option<&str>,
        supplement: Option<&str>,
        number: Option<&str>,
        force_update: bool,
    ) -> Result<Option<Issue>> {
        let key = IssueKey::new(journal.id, volume, number, supplement);
        if !force_update {
            if let Some(issue) = self.entities.find_issue(&key).await? {
                debug!(issue_id = %issue.id, "Issue already registered");
                return Ok(Some(issue));
            }
        }
        if key.volume.is_empty() && key.number.is_empty() {
            info!("Issue has neither volume nor number; nothing to fetch");
            return Ok(None);
        }

        let mut params = BTreeMap::new();
        params.insert("issn_print".to_string(), journal.issn_print.clone().unwrap_or_default());
        params.insert(
            "issn_electronic".to_string(),
            journal.issn_electronic.clone().unwrap_or_default(),
        );
        params.insert("volume".to_string(), key.volume.clone());
        params.insert("number".to_string(), key.number.clone());
        params.insert("supplement".to_string(), key.supplement.clone());

        let url = self.issue_api_url.clone();
        let Some(rows) = self
            .fetch_rows::<IssueRow>(ctx, "sync_issue", &url, params, force_update)
            .await
        else {
            return Ok(None);
        };

        if rows.is_empty() {
            info!("Remote source has no issue for key");
            return Ok(None);
        }
        if rows.len() > 1 {
            warn!(rows = rows.len(), "Ambiguous remote issue response; applying every row");
            metrics::record_ambiguous_response(&url);
        }

        // every row is applied; only the row with the requested key is returned
        let mut chosen: Option<Issue> = None;
        for row in &rows {
            let row_key = IssueKey::new(
                journal.id,
                row.volume.as_deref(),
                row.number.as_deref(),
                row.supplement.as_deref(),
            );
            let issue = self.entities.get_or_create_issue(&row_key, row.year.as_deref()).await?;
            let exact = row_key == key;
            let migrating = if exact { ctx.pid } else { None };
            self.link_issue_records(ctx.collection, migrating, journal, &issue).await?;

            if exact && chosen.is_none() {
                chosen = Some(issue);
            }
        }
        if chosen.is_none() {
            info!("No remote issue row matches the key");
        }
        Ok(chosen)
    }

    /// Issue records for `issue` in every collection holding `journal`.
    /// `migrating` is the legacy PID already standing for it in `collection`.
    async fn link_issue_records(
        &self,
        collection: &str,
        migrating: Option<&str>,
        journal: &Journal,
        issue: &Issue,
    ) -> Result<()> {
        let journal_records = self.procs.procs_for_entity(EntityKind::Journal, journal.id).await?;
        for journal_record in journal_records {
            if self
                .procs
                .find_proc_by_entity(&journal_record.collection, EntityKind::Issue, issue.id)
                .await?
                .is_some()
            {
                continue;
            }
            let Some(ref year) = issue.publication_year else {
                warn!(issue_id = %issue.id, "Issue has no publication year; PID cannot be derived");
                continue;
            };

            let pid = derive_issue_pid(&journal_record.pid, year, issue.sequence)?;
            if let Some(legacy_pid) = migrating.filter(|_| journal_record.collection == collection) {
                if legacy_pid != pid {
                    warn!(
                        collection = %collection,
                        legacy_pid = %legacy_pid,
                        derived_pid = %pid,
                        "Derived issue PID differs from the legacy PID; keeping the legacy record"
                    );
                }
                continue;
            }
            let mut record = self
                .procs
                .get_or_create_proc(&journal_record.collection, EntityKind::Issue, &pid)
                .await?;
            record.parent_id = Some(journal_record.id);
            record.journal_acron.clone_from(&journal_record.journal_acron);
            record.issue_folder = Some(issue.issue_folder());
            record.publication_year.clone_from(&issue.publication_year);
            record.complete_migration(issue.id);
            self.procs.save_proc(&record).await?;
            debug!(collection = %record.collection, pid = %record.pid, "Issue record linked");
        }
        Ok(())
    }

    /// Fetch and parse rows. A failure goes to the ledger and yields `None`.
    async fn fetch_rows<T: DeserializeOwned>(
        &self,
        ctx: &SyncContext<'_>,
        operation: &str,
        url: &str,
        params: BTreeMap<String, String>,
        force_update: bool,
    ) -> Option<Vec<T>> {
        let fetched = self
            .source
            .fetch(url, &params, self.timeout)
            .await
            .and_then(|body| parse_results::<T>(url, body));

        match fetched {
            Ok(rows) => Some(rows),
            Err(err) => {
                warn!(error = %err, url = %url, "Remote metadata fetch failed");
                let mut entry = FailureEntry::new(operation, ctx.actor, ctx.collection)
                    .flag("url", url)
                    .flag("params", json!(params))
                    .flag("force_update", force_update)
                    .error(&err);
                if let Some(pid) = ctx.pid {
                    entry = entry.pid(pid);
                }
                self.ledger.record(entry).await;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::ProgressStatus;
    use crate::ledger::MemoryLedger;
    use crate::remote::MockMetadataSource;
    use crate::store::MemoryStore;
    use serde_json::Value;

    const JOURNAL_URL: &str = "http://core.test/api/v2/pid/journal/";
    const ISSUE_URL: &str = "http://core.test/api/v2/pid/issue/";

    struct Harness {
        store: Arc<MemoryStore>,
        source: Arc<MockMetadataSource>,
        ledger: Arc<MemoryLedger>,
        sync: Synchronizer,
        actor: Actor,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let source = Arc::new(MockMetadataSource::new());
        let ledger = Arc::new(MemoryLedger::new());
        let config = RemoteConfig {
            journal_api_url: JOURNAL_URL.to_string(),
            issue_api_url: ISSUE_URL.to_string(),
            timeout_secs: 5,
        };
        let sync = Synchronizer::new(store.clone(), store.clone(), source.clone(), ledger.clone(), &config);
        Harness {
            store,
            source,
            ledger,
            sync,
            actor: Actor::new(1, "admin"),
        }
    }

    fn journal_row(title: &str, issn_e: &str, issn_p: &str, collection: &str, scielo_issn: &str) -> Value {
        json!({
            "official": {
                "title": title,
                "iso_short_title": "Rev. Teste",
                "issn_print": issn_p,
                "issn_electronic": issn_e,
                "issnl": issn_p,
            },
            "title": title,
            "journal_use_license": "CC-BY",
            "Subject": [{"value": "Health Sciences"}, {"value": "Health Sciences"}],
            "publisher": [{"name": "Universidade de Sao Paulo"}],
            "owner": [{"name": "Universidade de Sao Paulo"}],
            "scielo_journal": [
                {
                    "collection_acron": collection,
                    "scielo_issn": scielo_issn,
                    "journal_acron": "rt",
                    "journal_history": [
                        {"event_type": "ADMITTED", "year": "2001", "month": "03", "day": "", "interruption_reason": ""}
                    ]
                },
                {"collection_acron": "xyz", "scielo_issn": "9999-9999", "journal_acron": "rt"}
            ]
        })
    }

    fn key() -> JournalKey {
        JournalKey::new(Some("Revista Teste"), Some("1234-5678"), Some("8765-4321"))
    }

    #[tokio::test]
    async fn test_sync_journal_is_idempotent() {
        let h = harness();
        h.store.get_or_create_collection("scl").await.unwrap();
        h.source.respond(
            JOURNAL_URL,
            vec![journal_row("Revista Teste", "1234-5678", "8765-4321", "scl", "0001-0001")],
        );
        let ctx = SyncContext::new(&h.actor, "scl", Some("0001-0001"));

        let first = h.sync.sync_journal(&ctx, &key(), false).await.unwrap().unwrap();
        let second = h.sync.sync_journal(&ctx, &key(), false).await.unwrap().unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(h.source.call_count(), 1);

        let forced = h.sync.sync_journal(&ctx, &key(), true).await.unwrap().unwrap();
        assert_eq!(forced.id, first.id);
        assert_eq!(h.source.call_count(), 2);

        assert_eq!(h.store.journals().len(), 1);
        assert_eq!(h.store.journal_subjects(first.id).await.unwrap().len(), 1);
        assert_eq!(h.store.journal_institutions(first.id).await.unwrap().len(), 2);

        let linkage = h
            .store
            .upsert_journal_collection(first.id, "scl", None, None)
            .await
            .unwrap();
        assert_eq!(linkage.journal_acron.as_deref(), Some("rt"));
        assert_eq!(h.store.journal_history(linkage.id).await.unwrap().len(), 1);
        assert!(h.ledger.is_empty());
    }

    #[tokio::test]
    async fn test_collection_rows_link_journal_records() {
        let h = harness();
        h.store.get_or_create_collection("scl").await.unwrap();
        h.source.respond(
            JOURNAL_URL,
            vec![journal_row("Revista Teste", "1234-5678", "8765-4321", "scl", "0001-0001")],
        );
        let ctx = SyncContext::new(&h.actor, "scl", None);
        let journal = h.sync.sync_journal(&ctx, &key(), false).await.unwrap().unwrap();

        let record = h
            .store
            .find_proc("scl", EntityKind::Journal, "0001-0001")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.entity_id, Some(journal.id));
        assert_eq!(record.migration_status, ProgressStatus::Done);
        assert_eq!(record.journal_acron.as_deref(), Some("rt"));
        assert_eq!(record.availability_status.as_deref(), Some("C"));

        // "xyz" is not a registered collection
        assert!(h
            .store
            .find_proc("xyz", EntityKind::Journal, "9999-9999")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_fetch_failure_is_recorded_once() {
        let h = harness();
        h.source.set_failing(true);
        let ctx = SyncContext::new(&h.actor, "scl", Some("0001-0001"));

        let result = h.sync.sync_journal(&ctx, &key(), false).await.unwrap();
        assert!(result.is_none());

        let entries = h.ledger.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].operation, "sync_journal");
        assert_eq!(entries[0].collection, "scl");
        assert_eq!(entries[0].pid.as_deref(), Some("0001-0001"));
        assert_eq!(entries[0].flags["force_update"], Value::Bool(false));
    }

    #[tokio::test]
    async fn test_remote_miss_is_not_a_failure() {
        let h = harness();
        let ctx = SyncContext::new(&h.actor, "scl", None);
        assert!(h.sync.sync_journal(&ctx, &key(), false).await.unwrap().is_none());
        assert!(h.ledger.is_empty());
        assert_eq!(h.source.call_count(), 1);
    }

    #[tokio::test]
    async fn test_multi_row_response_returns_matching_row() {
        let h = harness();
        h.store.get_or_create_collection("scl").await.unwrap();
        h.source.respond(
            JOURNAL_URL,
            vec![
                journal_row("Outra Revista", "1111-1111", "2222-2222", "scl", "0001-0002"),
                journal_row("Revista Teste", "1234-5678", "8765-4321", "scl", "0001-0001"),
            ],
        );
        let ctx = SyncContext::new(&h.actor, "scl", None);

        let journal = h.sync.sync_journal(&ctx, &key(), false).await.unwrap().unwrap();
        assert_eq!(journal.issn_electronic.as_deref(), Some("1234-5678"));
        assert_eq!(h.store.journals().len(), 2);

        let other = h
            .store
            .find_proc("scl", EntityKind::Journal, "0001-0002")
            .await
            .unwrap()
            .unwrap();
        assert_ne!(other.entity_id, Some(journal.id));
    }

    #[tokio::test]
    async fn test_sync_issue_derives_issue_pid() {
        let h = harness();
        h.store.get_or_create_collection("scl").await.unwrap();
        h.source.respond(
            JOURNAL_URL,
            vec![journal_row("Revista Teste", "1234-5678", "8765-4321", "scl", "0001-0001")],
        );
        h.source.respond(
            ISSUE_URL,
            vec![json!({"volume": "12", "number": "3", "supplement": null, "year": 2023})],
        );
        let ctx = SyncContext::new(&h.actor, "scl", None);
        let journal = h.sync.sync_journal(&ctx, &key(), false).await.unwrap().unwrap();

        let issue = h
            .sync
            .sync_issue(&ctx, &journal, Some("12"), None, Some("3"), false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(issue.sequence, 1);
        assert_eq!(issue.issue_folder(), "v12n3");

        let params = h.source.last_params().unwrap();
        assert_eq!(params["issn_electronic"], "1234-5678");
        assert_eq!(params["volume"], "12");

        let record = h
            .store
            .find_proc("scl", EntityKind::Issue, "0001-000120230001")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.entity_id, Some(issue.id));
        assert_eq!(record.migration_status, ProgressStatus::Done);
        assert_eq!(record.issue_folder.as_deref(), Some("v12n3"));

        let calls = h.source.call_count();
        let again = h
            .sync
            .sync_issue(&ctx, &journal, Some("12"), None, Some("3"), false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again.id, issue.id);
        assert_eq!(h.source.call_count(), calls);
    }

    #[tokio::test]
    async fn test_non_matching_rows_are_a_miss() {
        let h = harness();
        h.store.get_or_create_collection("scl").await.unwrap();
        h.source.respond(
            JOURNAL_URL,
            vec![journal_row("Outra Revista", "1111-1111", "2222-2222", "scl", "0001-0002")],
        );
        let ctx = SyncContext::new(&h.actor, "scl", Some("0001-0001"));
        assert!(h.sync.sync_journal(&ctx, &key(), false).await.unwrap().is_none());
        // the row itself is still applied
        assert_eq!(h.store.journals().len(), 1);

        let journal = h.store.journals()[0].clone();
        h.source.respond(ISSUE_URL, vec![json!({"volume": "99", "number": "9", "year": "2023"})]);
        let issue = h
            .sync
            .sync_issue(&ctx, &journal, Some("12"), None, Some("1"), false)
            .await
            .unwrap();
        assert!(issue.is_none());
        assert!(h.ledger.is_empty());
    }

    #[tokio::test]
    async fn test_migrating_issue_keeps_its_legacy_pid() {
        let h = harness();
        h.store.get_or_create_collection("scl").await.unwrap();
        h.source.respond(
            JOURNAL_URL,
            vec![journal_row("Revista Teste", "1234-5678", "8765-4321", "scl", "0001-0001")],
        );
        let ctx = SyncContext::new(&h.actor, "scl", None);
        let journal = h.sync.sync_journal(&ctx, &key(), false).await.unwrap().unwrap();

        // an earlier issue takes sequence 1
        h.source.respond(ISSUE_URL, vec![json!({"volume": "11", "number": "1", "year": "2022"})]);
        h.sync
            .sync_issue(&ctx, &journal, Some("11"), None, Some("1"), false)
            .await
            .unwrap()
            .unwrap();

        h.source.respond(ISSUE_URL, vec![json!({"volume": "12", "number": "1", "year": "2023"})]);
        let legacy_ctx = SyncContext::new(&h.actor, "scl", Some("0001-000120230001"));
        let issue = h
            .sync
            .sync_issue(&legacy_ctx, &journal, Some("12"), None, Some("1"), false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(issue.sequence, 2);

        assert!(h
            .store
            .find_proc("scl", EntityKind::Issue, "0001-000120230002")
            .await
            .unwrap()
            .is_none());
        assert!(h
            .store
            .find_proc_by_entity("scl", EntityKind::Issue, issue.id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_issue_without_volume_or_number_is_skipped() {
        let h = harness();
        let journal = h
            .store
            .upsert_journal(&crate::store::JournalData {
                title: Some("Revista Teste".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        let ctx = SyncContext::new(&h.actor, "scl", None);
        let issue = h.sync.sync_issue(&ctx, &journal, None, Some("1"), None, false).await.unwrap();
        assert!(issue.is_none());
        assert_eq!(h.source.call_count(), 0);
    }
}
