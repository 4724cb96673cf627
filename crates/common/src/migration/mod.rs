//! Migration orchestrator
//!
//! Drives the journal → issue → article cascade for one collection. Every
//! step returns a `Result`; the orchestrator decides per item whether the
//! record ends DONE or ERROR and writes unexpected failures to the ledger.
//! Nothing here returns an error to its caller: reports are returned instead.
//!
//! Re-running is safe. Eligibility is `force_update || status != DONE` on
//! every axis (migration, document records, files), so a second run only
//! touches what failed or never ran.

use crate::auth::Actor;
use crate::db::models::{EntityKind, ProcRecord, ProgressStatus};
use crate::errors::{AppError, Result};
use crate::ledger::{FailureEntry, FailureLedger};
use crate::legacy::{view, LegacyArticle, LegacyFileImporter, LegacyIssue, LegacyJournal, LegacyRecord, LegacySource};
use crate::metrics::{self, StageTimer};
use crate::store::{ArticleData, EntityStore, JournalKey, ProcFilter, ProcQuery, ProcStore};
use crate::sync::{SyncContext, Synchronizer};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, instrument, warn};

/// Override flags for one migration run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationOptions {
    /// Re-enter DONE records
    pub force_update: bool,
    /// Re-read journal `acron.id` files
    pub force_import_acron_id_file: bool,
    /// Re-register article records from the legacy document database
    pub force_migrate_document_records: bool,
    /// Re-import issue files
    pub force_import_issue_files: bool,
    pub migrate_issues: bool,
    pub migrate_articles: bool,
    /// Restricts which journal records are migrated
    pub journal_filter: ProcFilter,
    /// Restricts cascaded issues to one publication year
    pub publication_year: Option<String>,
}

impl MigrationOptions {
    /// Flags as stamped on ledger entries
    pub fn flags(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

/// Result of one item-level step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Migrated,
    /// Nothing to do (DONE and not forced)
    Skipped,
    Failed,
}

/// Per-stage tally
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
}

impl StageReport {
    pub fn tally(&mut self, outcome: StepOutcome) {
        self.processed += 1;
        match outcome {
            StepOutcome::Migrated => self.succeeded += 1,
            StepOutcome::Skipped => self.skipped += 1,
            StepOutcome::Failed => self.failed += 1,
        }
    }

    pub fn merge(&mut self, other: StageReport) {
        self.processed += other.processed;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }
}

/// Outcome of a full collection run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationReport {
    pub registered_journals: StageReport,
    pub registered_issues: StageReport,
    pub journals: StageReport,
    pub issues: StageReport,
    pub articles: StageReport,
}

/// Legacy documents of one collection grouped by issue PID
type DocumentIndex = HashMap<String, Vec<LegacyRecord>>;

pub struct MigrationOrchestrator {
    entities: Arc<dyn EntityStore>,
    procs: Arc<dyn ProcStore>,
    sync: Arc<Synchronizer>,
    legacy: Arc<dyn LegacySource>,
    files: Arc<dyn LegacyFileImporter>,
    ledger: Arc<dyn FailureLedger>,
    /// Read once per run, per collection
    documents: Mutex<HashMap<String, Arc<DocumentIndex>>>,
}

impl MigrationOrchestrator {
    pub fn new(
        entities: Arc<dyn EntityStore>,
        procs: Arc<dyn ProcStore>,
        sync: Arc<Synchronizer>,
        legacy: Arc<dyn LegacySource>,
        files: Arc<dyn LegacyFileImporter>,
        ledger: Arc<dyn FailureLedger>,
    ) -> Self {
        Self {
            entities,
            procs,
            sync,
            legacy,
            files,
            ledger,
            documents: Mutex::new(HashMap::new()),
        }
    }

    /// Register legacy records, then run the migration cascade
    #[instrument(skip(self, actor, options), fields(user = %actor.username))]
    pub async fn run(&self, actor: &Actor, collection: &str, options: &MigrationOptions) -> MigrationReport {
        let registered_journals = self.register_journals(actor, collection, options.force_update).await;
        let registered_issues = if options.migrate_issues {
            self.register_issues(actor, collection, options.force_update).await
        } else {
            StageReport::default()
        };

        let mut report = self.migrate_journals(actor, collection, options).await;
        report.registered_journals = registered_journals;
        report.registered_issues = registered_issues;
        info!(
            journals = report.journals.succeeded,
            issues = report.issues.succeeded,
            articles = report.articles.succeeded,
            failed = report.journals.failed + report.issues.failed + report.articles.failed,
            "Migration run finished"
        );
        report
    }

    // ========================================================================
    // Legacy registration
    // ========================================================================

    /// Register every legacy journal record of `collection`
    #[instrument(skip(self, actor))]
    pub async fn register_journals(&self, actor: &Actor, collection: &str, force_update: bool) -> StageReport {
        self.register_all(actor, collection, EntityKind::Journal, force_update).await
    }

    /// Register every legacy issue record of `collection`, linked to its journal record
    #[instrument(skip(self, actor))]
    pub async fn register_issues(&self, actor: &Actor, collection: &str, force_update: bool) -> StageReport {
        self.register_all(actor, collection, EntityKind::Issue, force_update).await
    }

    async fn register_all(
        &self,
        actor: &Actor,
        collection: &str,
        kind: EntityKind,
        force_update: bool,
    ) -> StageReport {
        let operation = match kind {
            EntityKind::Journal => "register_journals",
            EntityKind::Issue => "register_issues",
            EntityKind::Article => "register_articles",
        };
        let mut report = StageReport::default();

        if let Err(err) = self.entities.get_or_create_collection(collection).await {
            self.ledger
                .record(
                    FailureEntry::new(operation, actor, collection)
                        .flag("force_update", force_update)
                        .error(&err),
                )
                .await;
            return report;
        }

        let mut records = self.legacy.records(collection, kind);
        while let Some(item) = records.next().await {
            let (pid, registered) = match item {
                Ok(record) => {
                    let registered = self.register_record(collection, kind, &record, force_update).await;
                    (Some(record.pid), registered)
                }
                Err(err) => (None, Err(err)),
            };

            match registered {
                Ok(true) => report.tally(StepOutcome::Migrated),
                Ok(false) => report.tally(StepOutcome::Skipped),
                Err(err) => {
                    report.tally(StepOutcome::Failed);
                    let mut entry = FailureEntry::new(operation, actor, collection)
                        .flag("force_update", force_update)
                        .error(&err);
                    if let Some(pid) = pid {
                        entry = entry.pid(pid);
                    }
                    self.ledger.record(entry).await;
                }
            }
        }

        debug!(
            registered = report.succeeded,
            unchanged = report.skipped,
            failed = report.failed,
            "Registration finished"
        );
        report
    }

    /// Store one legacy record; `Ok(false)` when it was already registered unchanged
    async fn register_record(
        &self,
        collection: &str,
        kind: EntityKind,
        legacy: &LegacyRecord,
        force_update: bool,
    ) -> Result<bool> {
        let mut record = self.procs.get_or_create_proc(collection, kind, &legacy.pid).await?;
        if !record.register_legacy(&legacy.data, force_update) {
            return Ok(false);
        }

        match kind {
            EntityKind::Journal => {
                let journal: LegacyJournal = view(&legacy.pid, &legacy.data)?;
                record.journal_acron = journal.acron;
                record.title = journal.title;
                if journal.availability_status.is_some() {
                    record.availability_status = journal.availability_status;
                }
            }
            EntityKind::Issue => {
                let issue: LegacyIssue = view(&legacy.pid, &legacy.data)?;
                if let Some(journal_pid) = issue.journal_pid_of(&legacy.pid) {
                    match self.procs.find_proc(collection, EntityKind::Journal, &journal_pid).await? {
                        Some(parent) => {
                            record.parent_id = Some(parent.id);
                            record.journal_acron = parent.journal_acron;
                        }
                        None => debug!(pid = %legacy.pid, journal_pid = %journal_pid, "Journal record not registered yet"),
                    }
                }
                record.issue_folder = issue.issue_folder;
                record.publication_year = issue.publication_year;
            }
            EntityKind::Article => {}
        }

        self.procs.save_proc(&record).await?;
        Ok(true)
    }

    // ========================================================================
    // Journals
    // ========================================================================

    /// Migrate the eligible journal records of `collection`; with
    /// `migrate_issues`, cascade into the issues of every migrated journal
    #[instrument(skip(self, actor, options), fields(force_update = options.force_update))]
    pub async fn migrate_journals(&self, actor: &Actor, collection: &str, options: &MigrationOptions) -> MigrationReport {
        let timer = StageTimer::start("migrate_journals");
        let mut report = MigrationReport::default();
        self.forget_documents();

        // every journal in scope: DONE ones are skipped but still cascade
        let query = ProcQuery::new(collection, EntityKind::Journal)
            .filter(options.journal_filter.clone())
            .force(true);
        let records = match self.procs.items_to_process(&query).await {
            Ok(records) => records,
            Err(err) => {
                self.ledger
                    .record(
                        FailureEntry::new("migrate_journals", actor, collection)
                            .flags(options.flags())
                            .error(&err),
                    )
                    .await;
                timer.finish();
                return report;
            }
        };
        if records.is_empty() {
            info!("No journal records to migrate");
        }

        for mut record in records {
            let outcome = self.migrate_journal(actor, &mut record, options).await;
            report.journals.tally(outcome);

            if options.migrate_issues && record.migration_status == ProgressStatus::Done {
                let (issues, articles) = self.migrate_issues_of(actor, &record, options).await;
                report.issues.merge(issues);
                report.articles.merge(articles);
            }
        }

        timer.finish();
        report
    }

    /// Synchronize one journal record and import its `acron.id` file.
    /// `record` holds the final state on return.
    #[instrument(skip_all, fields(pid = %record.pid, collection = %record.collection))]
    pub async fn migrate_journal(
        &self,
        actor: &Actor,
        record: &mut ProcRecord,
        options: &MigrationOptions,
    ) -> StepOutcome {
        let outcome = match self.try_migrate_journal(actor, record, options).await {
            Ok(outcome) => outcome,
            Err(err) => return self.fail(actor, "migrate_journal", record, options, err).await,
        };

        if record.migration_status == ProgressStatus::Done
            && ProcRecord::aux_pending(record.files_status, options.force_import_acron_id_file)
        {
            let imported = self.files.import_journal_files(record).await;
            self.finish_aux(actor, "import_journal_files", record, options, imported, |r, s| {
                r.files_status = s
            })
            .await;
        }
        outcome
    }

    async fn try_migrate_journal(
        &self,
        actor: &Actor,
        record: &mut ProcRecord,
        options: &MigrationOptions,
    ) -> Result<StepOutcome> {
        if !record.begin_migration(options.force_update) {
            return Ok(StepOutcome::Skipped);
        }
        *record = self.procs.save_proc(record).await?;

        let legacy: LegacyJournal = view(&record.pid, &record.legacy_data)?;
        let key = JournalKey::new(
            legacy.title.as_deref(),
            legacy.issn_electronic.as_deref(),
            legacy.issn_print.as_deref(),
        );
        if key.is_empty() {
            return Err(AppError::MissingField {
                field: "title or issn".to_string(),
            });
        }

        let ctx = SyncContext::new(actor, &record.collection, Some(&record.pid));
        let journal = self
            .sync
            .sync_journal(&ctx, &key, options.force_update)
            .await?
            .ok_or_else(|| AppError::RemoteMiss { query: key.to_string() })?;

        // the synchronizer may already have linked this record
        if let Some(fresh) = self.procs.find_proc_by_id(record.id).await? {
            *record = fresh;
        }
        record.complete_migration(journal.id);
        if record.title.is_none() {
            record.title.clone_from(&journal.title);
        }
        *record = self.procs.save_proc(record).await?;

        metrics::record_migration(EntityKind::Journal.as_str(), true);
        info!(journal_id = %journal.id, "Journal migrated");
        Ok(StepOutcome::Migrated)
    }

    // ========================================================================
    // Issues
    // ========================================================================

    /// Migrate the eligible issue records of `collection`
    #[instrument(skip(self, actor, options))]
    pub async fn migrate_issues(
        &self,
        actor: &Actor,
        collection: &str,
        options: &MigrationOptions,
    ) -> (StageReport, StageReport) {
        self.forget_documents();
        let filter = ProcFilter {
            publication_year: options.publication_year.clone(),
            ..Default::default()
        };
        self.migrate_issue_scope(actor, collection, filter, options).await
    }

    async fn migrate_issues_of(
        &self,
        actor: &Actor,
        journal_record: &ProcRecord,
        options: &MigrationOptions,
    ) -> (StageReport, StageReport) {
        let filter = ProcFilter {
            publication_year: options.publication_year.clone(),
            ..ProcFilter::parent(journal_record.id)
        };
        self.migrate_issue_scope(actor, &journal_record.collection, filter, options)
            .await
    }

    async fn migrate_issue_scope(
        &self,
        actor: &Actor,
        collection: &str,
        filter: ProcFilter,
        options: &MigrationOptions,
    ) -> (StageReport, StageReport) {
        let mut issues = StageReport::default();
        let mut articles = StageReport::default();

        let query = ProcQuery::new(collection, EntityKind::Issue).filter(filter).force(true);
        let records = match self.procs.items_to_process(&query).await {
            Ok(records) => records,
            Err(err) => {
                self.ledger
                    .record(
                        FailureEntry::new("migrate_issues", actor, collection)
                            .flags(options.flags())
                            .error(&err),
                    )
                    .await;
                return (issues, articles);
            }
        };

        for mut record in records {
            issues.tally(self.migrate_issue(actor, &mut record, options).await);
            if options.migrate_articles && record.migration_status == ProgressStatus::Done {
                articles.merge(self.migrate_articles_of(actor, &record, options).await);
            }
        }
        (issues, articles)
    }

    /// Synchronize one issue record through its journal, then register its
    /// article records and import its files. Each auxiliary step is guarded
    /// by its own status and force flag.
    #[instrument(skip_all, fields(pid = %record.pid, collection = %record.collection))]
    pub async fn migrate_issue(
        &self,
        actor: &Actor,
        record: &mut ProcRecord,
        options: &MigrationOptions,
    ) -> StepOutcome {
        let outcome = match self.try_migrate_issue(actor, record, options).await {
            Ok(outcome) => outcome,
            Err(err) => return self.fail(actor, "migrate_issue", record, options, err).await,
        };
        if record.migration_status != ProgressStatus::Done {
            return outcome;
        }

        if ProcRecord::aux_pending(record.docs_status, options.force_migrate_document_records) {
            let failed = self.migrate_document_records(actor, record, options).await;
            record.docs_status = if failed == 0 {
                ProgressStatus::Done
            } else {
                ProgressStatus::Error
            };
            self.save_aux("migrate_document_records", record).await;
        }

        if ProcRecord::aux_pending(record.files_status, options.force_import_issue_files) {
            let imported = self.files.import_issue_files(record).await;
            self.finish_aux(actor, "import_issue_files", record, options, imported, |r, s| {
                r.files_status = s
            })
            .await;
        }
        outcome
    }

    async fn try_migrate_issue(
        &self,
        actor: &Actor,
        record: &mut ProcRecord,
        options: &MigrationOptions,
    ) -> Result<StepOutcome> {
        if !record.begin_migration(options.force_update) {
            return Ok(StepOutcome::Skipped);
        }
        *record = self.procs.save_proc(record).await?;

        let parent = self.parent_entity(record).await?;
        let journal = self
            .entities
            .find_journal_by_id(parent)
            .await?
            .ok_or_else(|| parent_missing(record, "canonical journal not found"))?;

        let legacy: LegacyIssue = view(&record.pid, &record.legacy_data)?;
        let ctx = SyncContext::new(actor, &record.collection, Some(&record.pid));
        let issue = self
            .sync
            .sync_issue(
                &ctx,
                &journal,
                legacy.volume.as_deref(),
                legacy.supplement.as_deref(),
                legacy.number.as_deref(),
                options.force_update,
            )
            .await?
            .ok_or_else(|| AppError::RemoteMiss {
                query: format!(
                    "journal={} volume={} number={} supplement={}",
                    journal.id,
                    legacy.volume.as_deref().unwrap_or(""),
                    legacy.number.as_deref().unwrap_or(""),
                    legacy.supplement.as_deref().unwrap_or(""),
                ),
            })?;

        if let Some(fresh) = self.procs.find_proc_by_id(record.id).await? {
            *record = fresh;
        }
        record.complete_migration(issue.id);
        record.issue_folder = legacy.issue_folder.or_else(|| Some(issue.issue_folder()));
        if record.publication_year.is_none() {
            record.publication_year.clone_from(&issue.publication_year);
        }
        *record = self.procs.save_proc(record).await?;

        metrics::record_migration(EntityKind::Issue.as_str(), true);
        info!(issue_id = %issue.id, "Issue migrated");
        Ok(StepOutcome::Migrated)
    }

    /// Register article records for the legacy documents of `issue_record`.
    /// Each document stands alone; returns how many failed, each with its
    /// own ledger entry.
    async fn migrate_document_records(
        &self,
        actor: &Actor,
        issue_record: &ProcRecord,
        options: &MigrationOptions,
    ) -> usize {
        let index = self.document_index(actor, &issue_record.collection, options).await;
        let mut registered = 0;
        let mut failed = 0;

        for document in index.get(&issue_record.pid).into_iter().flatten() {
            match self
                .register_document(issue_record, document, options.force_migrate_document_records)
                .await
            {
                Ok(true) => registered += 1,
                Ok(false) => {}
                Err(err) => {
                    failed += 1;
                    self.ledger
                        .record(
                            FailureEntry::new("migrate_document_records", actor, &issue_record.collection)
                                .pid(document.pid.clone())
                                .flags(options.flags())
                                .error(&err),
                        )
                        .await;
                }
            }
        }

        debug!(registered, failed, "Document records registered");
        failed
    }

    /// `Ok(false)` when the article record was already registered unchanged
    async fn register_document(
        &self,
        issue_record: &ProcRecord,
        document: &LegacyRecord,
        force_update: bool,
    ) -> Result<bool> {
        let legacy: LegacyArticle = view(&document.pid, &document.data)?;

        let mut record = self
            .procs
            .get_or_create_proc(&issue_record.collection, EntityKind::Article, &document.pid)
            .await?;
        let changed = record.register_legacy(&document.data, force_update);
        if !changed && record.parent_id == Some(issue_record.id) {
            return Ok(false);
        }
        record.parent_id = Some(issue_record.id);
        record.journal_acron.clone_from(&issue_record.journal_acron);
        record.issue_folder.clone_from(&issue_record.issue_folder);
        record.publication_year = legacy
            .publication_year
            .or_else(|| issue_record.publication_year.clone());
        record.title = legacy.title;
        self.procs.save_proc(&record).await?;
        Ok(true)
    }

    /// Legacy documents of `collection` by issue PID, read from the export
    /// on first use. Unreadable entries go to the ledger here, once.
    async fn document_index(
        &self,
        actor: &Actor,
        collection: &str,
        options: &MigrationOptions,
    ) -> Arc<DocumentIndex> {
        if let Some(index) = self
            .documents
            .lock()
            .ok()
            .and_then(|documents| documents.get(collection).cloned())
        {
            return index;
        }

        let mut index = DocumentIndex::new();
        let mut records = self.legacy.records(collection, EntityKind::Article);
        while let Some(item) = records.next().await {
            let document = match item {
                Ok(document) => document,
                Err(err) => {
                    self.ledger
                        .record(
                            FailureEntry::new("migrate_document_records", actor, collection)
                                .flags(options.flags())
                                .error(&err),
                        )
                        .await;
                    continue;
                }
            };
            match document.data.get("issue_pid").and_then(Value::as_str) {
                Some(issue_pid) => index.entry(issue_pid.to_string()).or_default().push(document),
                None => warn!(pid = %document.pid, "Legacy document has no issue_pid"),
            }
        }

        let index = Arc::new(index);
        if let Ok(mut documents) = self.documents.lock() {
            documents.insert(collection.to_string(), index.clone());
        }
        index
    }

    fn forget_documents(&self) {
        if let Ok(mut documents) = self.documents.lock() {
            documents.clear();
        }
    }

    // ========================================================================
    // Articles
    // ========================================================================

    async fn migrate_articles_of(
        &self,
        actor: &Actor,
        issue_record: &ProcRecord,
        options: &MigrationOptions,
    ) -> StageReport {
        let mut report = StageReport::default();
        let query = ProcQuery::new(&issue_record.collection, EntityKind::Article)
            .filter(ProcFilter::parent(issue_record.id))
            .force(options.force_update);
        let records = match self.procs.items_to_process(&query).await {
            Ok(records) => records,
            Err(err) => {
                self.ledger
                    .record(
                        FailureEntry::new("migrate_articles", actor, &issue_record.collection)
                            .pid(issue_record.pid.clone())
                            .flags(options.flags())
                            .error(&err),
                    )
                    .await;
                return report;
            }
        };

        for mut record in records {
            report.tally(self.migrate_article(actor, &mut record, options).await);
        }
        report
    }

    /// Build or update the canonical article of one article record
    #[instrument(skip_all, fields(pid = %record.pid, collection = %record.collection))]
    pub async fn migrate_article(
        &self,
        actor: &Actor,
        record: &mut ProcRecord,
        options: &MigrationOptions,
    ) -> StepOutcome {
        match self.try_migrate_article(record, options).await {
            Ok(outcome) => outcome,
            Err(err) => self.fail(actor, "migrate_article", record, options, err).await,
        }
    }

    async fn try_migrate_article(&self, record: &mut ProcRecord, options: &MigrationOptions) -> Result<StepOutcome> {
        if !record.begin_migration(options.force_update) {
            return Ok(StepOutcome::Skipped);
        }
        *record = self.procs.save_proc(record).await?;

        let parent = self.parent_entity(record).await?;
        let issue = self
            .entities
            .find_issue_by_id(parent)
            .await?
            .ok_or_else(|| parent_missing(record, "canonical issue not found"))?;

        let legacy: LegacyArticle = view(&record.pid, &record.legacy_data)?;
        let data = ArticleData {
            journal_id: issue.journal_id,
            issue_id: issue.id,
            pid_v2: record.pid.clone(),
            pid_v3: legacy.pid_v3,
            doi: legacy.doi,
            title: legacy.title,
            first_page: legacy.first_page,
            last_page: legacy.last_page,
            publication_year: legacy.publication_year.or_else(|| issue.publication_year.clone()),
        };
        let article = self.entities.upsert_article(&data).await?;

        record.complete_migration(article.id);
        *record = self.procs.save_proc(record).await?;
        metrics::record_migration(EntityKind::Article.as_str(), true);
        debug!(article_id = %article.id, "Article migrated");
        Ok(StepOutcome::Migrated)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Canonical entity of the parent record; children never migrate before it
    async fn parent_entity(&self, record: &ProcRecord) -> Result<uuid::Uuid> {
        let parent = match record.parent_id {
            Some(id) => self.procs.find_proc_by_id(id).await?,
            None => None,
        };
        match parent {
            None => Err(parent_missing(record, "no parent record")),
            Some(parent) => parent
                .entity_id
                .filter(|_| parent.migration_status == ProgressStatus::Done)
                .ok_or_else(|| parent_missing(record, &format!("parent {} is not migrated", parent.pid))),
        }
    }

    /// Mark the record ERROR. Unexpected failures go to the ledger; expected
    /// ones (remote miss) are only logged so the next run retries them.
    async fn fail(
        &self,
        actor: &Actor,
        operation: &str,
        record: &mut ProcRecord,
        options: &MigrationOptions,
        err: AppError,
    ) -> StepOutcome {
        record.fail_migration();
        match self.procs.save_proc(record).await {
            Ok(saved) => *record = saved,
            Err(save_err) => error!(error = %save_err, pid = %record.pid, "Failed to persist ERROR status"),
        }
        metrics::record_migration(record.kind.as_str(), false);

        if err.is_expected() {
            warn!(error = %err, pid = %record.pid, "Record could not be migrated this run");
        } else {
            self.ledger
                .record(
                    FailureEntry::new(operation, actor, &record.collection)
                        .pid(record.pid.clone())
                        .flags(options.flags())
                        .error(&err),
                )
                .await;
        }
        StepOutcome::Failed
    }

    /// Store the outcome of an auxiliary step on its own status axis
    async fn finish_aux<F>(
        &self,
        actor: &Actor,
        operation: &str,
        record: &mut ProcRecord,
        options: &MigrationOptions,
        result: Result<usize>,
        set_status: F,
    ) where
        F: Fn(&mut ProcRecord, ProgressStatus),
    {
        match result {
            Ok(count) => {
                debug!(operation, count, "Auxiliary step done");
                set_status(record, ProgressStatus::Done);
            }
            Err(err) => {
                set_status(record, ProgressStatus::Error);
                self.ledger
                    .record(
                        FailureEntry::new(operation, actor, &record.collection)
                            .pid(record.pid.clone())
                            .flags(options.flags())
                            .error(&err),
                    )
                    .await;
            }
        }
        self.save_aux(operation, record).await;
    }

    async fn save_aux(&self, operation: &str, record: &mut ProcRecord) {
        match self.procs.save_proc(record).await {
            Ok(saved) => *record = saved,
            Err(err) => error!(error = %err, pid = %record.pid, operation, "Failed to persist auxiliary status"),
        }
    }
}

fn parent_missing(record: &ProcRecord, message: &str) -> AppError {
    AppError::ParentMissing {
        kind: record.kind.to_string(),
        pid: record.pid.clone(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RemoteConfig;
    use crate::ledger::MemoryLedger;
    use crate::legacy::{FsLegacyFiles, NoopFileImporter, VecLegacySource};
    use crate::remote::MockMetadataSource;
    use crate::store::MemoryStore;
    use serde_json::json;
    use uuid::Uuid;

    const JOURNAL_URL: &str = "http://core.test/api/v2/pid/journal/";
    const ISSUE_URL: &str = "http://core.test/api/v2/pid/issue/";
    const ISSUE_PID: &str = "0001-000120230001";

    struct Harness {
        store: Arc<MemoryStore>,
        source: Arc<MockMetadataSource>,
        ledger: Arc<MemoryLedger>,
        orchestrator: MigrationOrchestrator,
        actor: Actor,
    }

    fn harness_with(legacy: VecLegacySource, files: Arc<dyn LegacyFileImporter>) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let source = Arc::new(MockMetadataSource::new());
        let ledger = Arc::new(MemoryLedger::new());
        let remote = RemoteConfig {
            journal_api_url: JOURNAL_URL.to_string(),
            issue_api_url: ISSUE_URL.to_string(),
            timeout_secs: 5,
        };
        let sync = Arc::new(Synchronizer::new(
            store.clone(),
            store.clone(),
            source.clone(),
            ledger.clone(),
            &remote,
        ));
        let orchestrator = MigrationOrchestrator::new(
            store.clone(),
            store.clone(),
            sync,
            Arc::new(legacy),
            files,
            ledger.clone(),
        );
        Harness {
            store,
            source,
            ledger,
            orchestrator,
            actor: Actor::new(7, "migrator"),
        }
    }

    fn harness(legacy: VecLegacySource) -> Harness {
        harness_with(legacy, Arc::new(NoopFileImporter))
    }

    fn legacy_journal() -> Value {
        json!({
            "pid": "0001-0001",
            "title": "Revista Teste",
            "acron": "rt",
            "issn_electronic": "1234-5678",
            "issn_print": "8765-4321",
        })
    }

    fn remote_journal() -> Value {
        json!({
            "official": {"title": "Revista Teste", "issn_print": "8765-4321", "issn_electronic": "1234-5678"},
            "title": "Revista Teste",
            "Subject": [{"value": "Health Sciences"}],
            "publisher": [{"name": "Editora Teste"}],
            "scielo_journal": [
                {"collection_acron": "scl", "scielo_issn": "0001-0001", "journal_acron": "rt"}
            ]
        })
    }

    fn full_collection() -> VecLegacySource {
        VecLegacySource::new()
            .with("scl", EntityKind::Journal, legacy_journal())
            .with(
                "scl",
                EntityKind::Issue,
                json!({
                    "pid": ISSUE_PID,
                    "volume": "12",
                    "number": "3",
                    "publication_year": "2023",
                    "issue_folder": "v12n3",
                }),
            )
            .with(
                "scl",
                EntityKind::Article,
                json!({
                    "pid": "S0001-00012023000300001",
                    "issue_pid": ISSUE_PID,
                    "title": "Primeiro artigo",
                    "doi": "10.1590/test.1",
                    "first_page": "1",
                    "last_page": "9",
                }),
            )
            .with(
                "scl",
                EntityKind::Article,
                json!({"pid": "S0001-00012023000300002", "issue_pid": "0001-000120220001"}),
            )
    }

    fn record_with(pid: &str, status: ProgressStatus) -> ProcRecord {
        let mut data = legacy_journal();
        data["pid"] = json!(pid);
        let mut record = ProcRecord::new(EntityKind::Journal, "scl", pid);
        record.legacy_data = data;
        record.migration_status = status;
        record
    }

    #[tokio::test]
    async fn test_migrate_journal_end_to_end() {
        let h = harness(VecLegacySource::new().with("scl", EntityKind::Journal, legacy_journal()));
        h.source.respond(JOURNAL_URL, vec![remote_journal()]);

        let report = h.orchestrator.run(&h.actor, "scl", &MigrationOptions::default()).await;
        assert_eq!(report.registered_journals.succeeded, 1);
        assert_eq!(report.journals.succeeded, 1);

        let journals = h.store.journals();
        assert_eq!(journals.len(), 1);
        assert_eq!(journals[0].issn_electronic.as_deref(), Some("1234-5678"));
        assert_eq!(journals[0].issn_print.as_deref(), Some("8765-4321"));

        let record = h
            .store
            .find_proc("scl", EntityKind::Journal, "0001-0001")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.migration_status, ProgressStatus::Done);
        assert_eq!(record.entity_id, Some(journals[0].id));
        assert_eq!(record.journal_acron.as_deref(), Some("rt"));
        assert_eq!(record.files_status, ProgressStatus::Done);
        assert!(h.ledger.is_empty());
    }

    #[tokio::test]
    async fn test_second_run_is_idle() {
        let h = harness(VecLegacySource::new().with("scl", EntityKind::Journal, legacy_journal()));
        h.source.respond(JOURNAL_URL, vec![remote_journal()]);
        let options = MigrationOptions::default();

        h.orchestrator.run(&h.actor, "scl", &options).await;
        let calls = h.source.call_count();
        let report = h.orchestrator.run(&h.actor, "scl", &options).await;

        assert_eq!(h.source.call_count(), calls);
        assert_eq!(report.registered_journals.skipped, 1);
        assert_eq!(report.journals.skipped, 1);
        assert_eq!(report.journals.succeeded, 0);
        assert_eq!(h.store.journals().len(), 1);
    }

    #[tokio::test]
    async fn test_only_unfinished_records_are_touched() {
        let h = harness(VecLegacySource::new());
        h.store.get_or_create_collection("scl").await.unwrap();
        h.source.respond(JOURNAL_URL, vec![remote_journal()]);

        let mut done = record_with("0003-0003", ProgressStatus::Done);
        done.entity_id = Some(Uuid::new_v4());
        done.files_status = ProgressStatus::Done;
        let done_before = done.clone();
        h.store.put_proc(done).unwrap();
        h.store.put_proc(record_with("0001-0001", ProgressStatus::Error)).unwrap();
        h.store.put_proc(record_with("0002-0002", ProgressStatus::NotStarted)).unwrap();

        let report = h
            .orchestrator
            .migrate_journals(&h.actor, "scl", &MigrationOptions::default())
            .await;
        assert_eq!(report.journals.succeeded, 2);
        assert_eq!(report.journals.skipped, 1);

        let untouched = h.store.find_proc_by_id(done_before.id).await.unwrap().unwrap();
        assert_eq!(untouched, done_before);
        for pid in ["0001-0001", "0002-0002"] {
            let record = h.store.find_proc("scl", EntityKind::Journal, pid).await.unwrap().unwrap();
            assert_eq!(record.migration_status, ProgressStatus::Done);
        }
    }

    #[tokio::test]
    async fn test_fetch_failure_marks_error_with_single_ledger_entry() {
        let h = harness(VecLegacySource::new().with("scl", EntityKind::Journal, legacy_journal()));
        h.source.set_failing(true);

        let report = h.orchestrator.run(&h.actor, "scl", &MigrationOptions::default()).await;
        assert_eq!(report.journals.failed, 1);

        let record = h
            .store
            .find_proc("scl", EntityKind::Journal, "0001-0001")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.migration_status, ProgressStatus::Error);

        let entries = h.ledger.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].operation, "sync_journal");
        assert_eq!(entries[0].pid.as_deref(), Some("0001-0001"));

        // next run retries the errored record
        h.source.set_failing(false);
        h.source.respond(JOURNAL_URL, vec![remote_journal()]);
        let report = h.orchestrator.run(&h.actor, "scl", &MigrationOptions::default()).await;
        assert_eq!(report.journals.succeeded, 1);
    }

    #[tokio::test]
    async fn test_invalid_legacy_record_is_recorded_with_flags() {
        let h = harness(VecLegacySource::new().with("scl", EntityKind::Journal, json!({"pid": "0009-0009"})));
        let options = MigrationOptions {
            force_update: true,
            ..Default::default()
        };

        let report = h.orchestrator.run(&h.actor, "scl", &options).await;
        assert_eq!(report.journals.failed, 1);
        assert_eq!(h.source.call_count(), 0);

        let entries = h.ledger.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].operation, "migrate_journal");
        assert_eq!(entries[0].collection, "scl");
        assert_eq!(entries[0].pid.as_deref(), Some("0009-0009"));
        assert_eq!(entries[0].user_id, 7);
        assert_eq!(entries[0].flags["force_update"], json!(true));
        assert_eq!(entries[0].exception_type, "MissingField");
    }

    #[tokio::test]
    async fn test_cascade_migrates_issue_and_articles() {
        let h = harness(full_collection());
        h.source.respond(JOURNAL_URL, vec![remote_journal()]);
        h.source.respond(
            ISSUE_URL,
            vec![json!({"volume": "12", "number": "3", "year": "2023"})],
        );
        let options = MigrationOptions {
            migrate_issues: true,
            migrate_articles: true,
            ..Default::default()
        };

        let report = h.orchestrator.run(&h.actor, "scl", &options).await;
        assert_eq!(report.registered_issues.succeeded, 1);
        assert_eq!(report.issues.succeeded, 1);
        assert_eq!(report.articles.succeeded, 1);
        assert!(h.ledger.is_empty());

        let issue_record = h
            .store
            .find_proc("scl", EntityKind::Issue, ISSUE_PID)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(issue_record.migration_status, ProgressStatus::Done);
        assert_eq!(issue_record.docs_status, ProgressStatus::Done);
        assert_eq!(issue_record.issue_folder.as_deref(), Some("v12n3"));
        assert_eq!(issue_record.journal_acron.as_deref(), Some("rt"));

        // one issue record: the legacy record itself is linked
        let issue_records: Vec<_> = h
            .store
            .procs()
            .into_iter()
            .filter(|p| p.kind == EntityKind::Issue)
            .collect();
        assert_eq!(issue_records.len(), 1);

        let articles = h.store.articles();
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].pid_v2, "S0001-00012023000300001");
        assert_eq!(articles[0].publication_year.as_deref(), Some("2023"));

        let article_record = h
            .store
            .find_proc("scl", EntityKind::Article, "S0001-00012023000300001")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(article_record.parent_id, Some(issue_record.id));
        assert_eq!(article_record.entity_id, Some(articles[0].id));

        // the document of another issue was not registered
        assert!(h
            .store
            .find_proc("scl", EntityKind::Article, "S0001-00012023000300002")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_issue_without_migrated_journal_fails() {
        let h = harness(full_collection());
        let options = MigrationOptions {
            migrate_issues: true,
            ..Default::default()
        };

        h.orchestrator.register_issues(&h.actor, "scl", false).await;
        let (issues, _) = h.orchestrator.migrate_issues(&h.actor, "scl", &options).await;
        assert_eq!(issues.failed, 1);

        let record = h
            .store
            .find_proc("scl", EntityKind::Issue, ISSUE_PID)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.migration_status, ProgressStatus::Error);

        let entries = h.ledger.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].operation, "migrate_issue");
        assert_eq!(entries[0].exception_type, "ParentMissing");
    }

    #[tokio::test]
    async fn test_file_import_failure_is_isolated() {
        let legacy = VecLegacySource::new().with(
            "scl",
            EntityKind::Journal,
            json!({"pid": "0001-0001", "issn_electronic": "1234-5678"}),
        );
        let h = harness_with(legacy, Arc::new(FsLegacyFiles::new("/nonexistent")));
        let mut row = remote_journal();
        row["scielo_journal"][0]["journal_acron"] = Value::Null;
        h.source.respond(JOURNAL_URL, vec![row]);

        let report = h.orchestrator.run(&h.actor, "scl", &MigrationOptions::default()).await;
        assert_eq!(report.journals.succeeded, 1);

        let record = h
            .store
            .find_proc("scl", EntityKind::Journal, "0001-0001")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.migration_status, ProgressStatus::Done);
        assert_eq!(record.files_status, ProgressStatus::Error);

        let entries = h.ledger.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].operation, "import_journal_files");
    }

    #[tokio::test]
    async fn test_changed_legacy_data_restarts_migration() {
        let h = harness(VecLegacySource::new().with("scl", EntityKind::Journal, legacy_journal()));
        h.source.respond(JOURNAL_URL, vec![remote_journal()]);
        h.orchestrator.run(&h.actor, "scl", &MigrationOptions::default()).await;

        let mut record = h
            .store
            .find_proc("scl", EntityKind::Journal, "0001-0001")
            .await
            .unwrap()
            .unwrap();
        let mut changed = legacy_journal();
        changed["title"] = json!("Revista Teste (nova fase)");
        assert!(record.register_legacy(&changed, false));
        assert_eq!(record.migration_status, ProgressStatus::NotStarted);
        assert!(!record.register_legacy(&changed, false));
    }

    fn cascade_options() -> MigrationOptions {
        MigrationOptions {
            migrate_issues: true,
            migrate_articles: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_bad_document_line_does_not_block_the_issue() {
        let legacy = VecLegacySource::new()
            .with("scl", EntityKind::Journal, legacy_journal())
            .with(
                "scl",
                EntityKind::Issue,
                json!({"pid": ISSUE_PID, "volume": "12", "number": "3", "publication_year": "2023"}),
            )
            .with("scl", EntityKind::Article, json!({"title": "no pid"}))
            .with(
                "scl",
                EntityKind::Article,
                json!({"pid": "S0001-00012023000300001", "issue_pid": ISSUE_PID}),
            )
            .with(
                "scl",
                EntityKind::Article,
                json!({"pid": "S0001-00012023000300002", "issue_pid": ISSUE_PID}),
            );
        let h = harness(legacy);
        h.source.respond(JOURNAL_URL, vec![remote_journal()]);
        h.source.respond(ISSUE_URL, vec![json!({"volume": "12", "number": "3", "year": "2023"})]);

        let report = h.orchestrator.run(&h.actor, "scl", &cascade_options()).await;
        assert_eq!(report.articles.succeeded, 2);
        assert_eq!(h.store.articles().len(), 2);

        let issue_record = h
            .store
            .find_proc("scl", EntityKind::Issue, ISSUE_PID)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(issue_record.docs_status, ProgressStatus::Done);

        let entries = h.ledger.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].operation, "migrate_document_records");
        assert_eq!(entries[0].exception_type, "InvalidLegacyRecord");
    }

    #[tokio::test]
    async fn test_later_issue_keeps_a_single_record() {
        const EARLIER_PID: &str = "0001-000120220001";
        let legacy = VecLegacySource::new()
            .with("scl", EntityKind::Journal, legacy_journal())
            .with(
                "scl",
                EntityKind::Issue,
                json!({"pid": EARLIER_PID, "volume": "11", "number": "1", "publication_year": "2022"}),
            )
            .with(
                "scl",
                EntityKind::Issue,
                json!({"pid": ISSUE_PID, "volume": "12", "number": "1", "publication_year": "2023"}),
            );
        let h = harness(legacy);
        h.source.respond(JOURNAL_URL, vec![remote_journal()]);
        let options = MigrationOptions {
            migrate_issues: true,
            ..Default::default()
        };

        // only the 2022 issue is known remotely; the 2023 one is a miss
        h.source.respond(ISSUE_URL, vec![json!({"volume": "11", "number": "1", "year": "2022"})]);
        let report = h.orchestrator.run(&h.actor, "scl", &options).await;
        assert_eq!(report.issues.succeeded, 1);
        assert_eq!(report.issues.failed, 1);

        h.source.respond(ISSUE_URL, vec![json!({"volume": "12", "number": "1", "year": "2023"})]);
        let report = h.orchestrator.run(&h.actor, "scl", &options).await;
        assert_eq!(report.issues.succeeded, 1);

        let mut pids: Vec<String> = h
            .store
            .procs()
            .into_iter()
            .filter(|p| p.kind == EntityKind::Issue)
            .map(|p| p.pid)
            .collect();
        pids.sort();
        assert_eq!(pids, vec![EARLIER_PID.to_string(), ISSUE_PID.to_string()]);

        let record = h
            .store
            .find_proc("scl", EntityKind::Issue, ISSUE_PID)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.migration_status, ProgressStatus::Done);
        assert_eq!(record.issue_folder.as_deref(), Some("v12n1"));
        assert!(h.ledger.is_empty());
    }

    struct CountingSource {
        inner: VecLegacySource,
        article_reads: std::sync::atomic::AtomicUsize,
    }

    impl LegacySource for CountingSource {
        fn records(
            &self,
            collection: &str,
            kind: EntityKind,
        ) -> futures::stream::BoxStream<'static, Result<LegacyRecord>> {
            if kind == EntityKind::Article {
                self.article_reads.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
            self.inner.records(collection, kind)
        }
    }

    #[tokio::test]
    async fn test_document_export_is_read_once_per_run() {
        let source = Arc::new(CountingSource {
            inner: full_collection(),
            article_reads: Default::default(),
        });
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(MemoryLedger::new());
        let remote = RemoteConfig {
            journal_api_url: JOURNAL_URL.to_string(),
            issue_api_url: ISSUE_URL.to_string(),
            timeout_secs: 5,
        };
        let sync = Arc::new(Synchronizer::new(
            store.clone(),
            store.clone(),
            Arc::new(MockMetadataSource::new()),
            ledger.clone(),
            &remote,
        ));
        let orchestrator = MigrationOrchestrator::new(
            store.clone(),
            store.clone(),
            sync,
            source.clone(),
            Arc::new(NoopFileImporter),
            ledger,
        );
        let actor = Actor::new(7, "migrator");
        let options = cascade_options();

        let first = ProcRecord::new(EntityKind::Issue, "scl", ISSUE_PID);
        let second = ProcRecord::new(EntityKind::Issue, "scl", "0001-000120220001");
        assert_eq!(orchestrator.migrate_document_records(&actor, &first, &options).await, 0);
        assert_eq!(orchestrator.migrate_document_records(&actor, &second, &options).await, 0);
        assert_eq!(source.article_reads.load(std::sync::atomic::Ordering::SeqCst), 1);

        let registered = store
            .find_proc("scl", EntityKind::Article, "S0001-00012023000300002")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(registered.parent_id, Some(second.id));

        // a new run reads the export again
        orchestrator.migrate_issues(&actor, "scl", &options).await;
        orchestrator.migrate_document_records(&actor, &first, &options).await;
        assert_eq!(source.article_reads.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[test]
    fn test_options_flags_carry_every_override() {
        let options = MigrationOptions {
            force_update: true,
            migrate_articles: true,
            ..Default::default()
        };
        let flags = options.flags();
        assert_eq!(flags["force_update"], json!(true));
        assert_eq!(flags["migrate_articles"], json!(true));
        assert_eq!(flags["force_import_acron_id_file"], json!(false));
        assert!(flags.contains_key("journal_filter"));
    }

    #[test]
    fn test_stage_report_tally() {
        let mut report = StageReport::default();
        report.tally(StepOutcome::Migrated);
        report.tally(StepOutcome::Failed);
        report.tally(StepOutcome::Skipped);
        let mut total = StageReport::default();
        total.merge(report);
        total.merge(report);
        assert_eq!(total.processed, 6);
        assert_eq!(total.succeeded, 2);
        assert_eq!(total.failed, 2);
    }
}
