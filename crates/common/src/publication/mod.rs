//! Publication orchestrator
//!
//! Journals and issues are published synchronously so the cascade can be
//! gated on each result. Articles fan out: one task per eligible article
//! record, handed to an [`ArticleTaskDispatcher`] and executed by an
//! [`ArticlePublisher`] on the other side.
//!
//! Delivery is at-least-once. A task that runs twice finds its record DONE
//! the second time and skips it; a task that never runs leaves the record
//! eligible for the next publish run.

mod payload;
mod worker;

pub use payload::{article_payload, build_payload, issue_payload, journal_payload};
pub use worker::LocalWorkerPool;

use crate::auth::Actor;
use crate::db::models::{EntityKind, ProcRecord, WebsiteKind};
use crate::errors::{AppError, Result};
use crate::ledger::{FailureEntry, FailureLedger};
use crate::metrics::{self, StageTimer};
use crate::publish::{PublishConfig, PublishTarget};
use crate::store::{EntityStore, ProcFilter, ProcQuery, ProcStore};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Flags for one publish run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishOptions {
    pub force_update: bool,
    pub journal_filter: ProcFilter,
    pub issue_filter: ProcFilter,
    pub cascade_issues: bool,
    pub cascade_articles: bool,
}

impl PublishOptions {
    fn flags(&self, website: WebsiteKind) -> Map<String, Value> {
        let mut flags = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        flags.insert("website".to_string(), Value::String(website.to_string()));
        flags
    }
}

/// Outcome of publishing one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Published,
    /// The website answered "not published"
    Rejected,
    Failed,
    /// Not eligible (DONE and not forced, or no entity)
    Skipped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishStageReport {
    pub published: u64,
    pub rejected: u64,
    pub failed: u64,
    pub skipped: u64,
    /// Article tasks handed to the dispatcher
    pub dispatched: u64,
    /// Stage runs stopped by a precondition failure
    pub aborted: u64,
}

impl PublishStageReport {
    pub fn tally(&mut self, outcome: PublishOutcome) {
        match outcome {
            PublishOutcome::Published => self.published += 1,
            PublishOutcome::Rejected => self.rejected += 1,
            PublishOutcome::Failed => self.failed += 1,
            PublishOutcome::Skipped => self.skipped += 1,
        }
    }

    pub fn merge(&mut self, other: PublishStageReport) {
        self.published += other.published;
        self.rejected += other.rejected;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.dispatched += other.dispatched;
        self.aborted += other.aborted;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicationReport {
    pub journals: PublishStageReport,
    pub issues: PublishStageReport,
    pub articles: PublishStageReport,
}

impl PublicationReport {
    fn merge(&mut self, other: PublicationReport) {
        self.journals.merge(other.journals);
        self.issues.merge(other.issues);
        self.articles.merge(other.articles);
    }
}

/// Message carried from the orchestrator to an article worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticlePublishTask {
    pub user_id: i64,
    pub username: String,
    pub website_kind: WebsiteKind,
    pub article_proc_id: Uuid,
    pub publish_config: PublishConfig,
    pub force_update: bool,
}

impl ArticlePublishTask {
    pub fn actor(&self) -> Actor {
        Actor::new(self.user_id, self.username.clone())
    }
}

/// Fire-and-forget hand-off of article tasks
#[async_trait]
pub trait ArticleTaskDispatcher: Send + Sync {
    async fn dispatch(&self, task: ArticlePublishTask) -> Result<()>;
}

/// Collects tasks instead of running them
#[derive(Default)]
pub struct RecordingDispatcher {
    tasks: Mutex<Vec<ArticlePublishTask>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tasks(&self) -> Vec<ArticlePublishTask> {
        self.tasks.lock().map(|t| t.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ArticleTaskDispatcher for RecordingDispatcher {
    async fn dispatch(&self, task: ArticlePublishTask) -> Result<()> {
        self.tasks
            .lock()
            .map_err(|e| AppError::Internal { message: e.to_string() })?
            .push(task);
        Ok(())
    }
}

/// Publish one record and store the result on its website axis
#[derive(Clone)]
struct RecordPublisher {
    entities: Arc<dyn EntityStore>,
    procs: Arc<dyn ProcStore>,
    target: Arc<dyn PublishTarget>,
    ledger: Arc<dyn FailureLedger>,
}

impl RecordPublisher {
    async fn publish(
        &self,
        actor: &Actor,
        record: &mut ProcRecord,
        config: &PublishConfig,
        force_update: bool,
        flags: Map<String, Value>,
    ) -> PublishOutcome {
        let website = config.website;
        if !record.begin_publication(website, force_update) {
            debug!(pid = %record.pid, "Record not eligible for publication");
            return PublishOutcome::Skipped;
        }

        let result = match self.procs.save_proc(record).await {
            Ok(saved) => {
                *record = saved;
                self.deliver(record, config).await
            }
            Err(err) => Err(err),
        };

        let outcome = match result {
            Ok(true) => {
                record.complete_publication(website, true);
                PublishOutcome::Published
            }
            Ok(false) => {
                warn!(pid = %record.pid, website = %website, "Website did not publish record");
                record.complete_publication(website, false);
                PublishOutcome::Rejected
            }
            Err(err) => {
                record.fail_publication(website);
                self.ledger
                    .record(
                        FailureEntry::new(publish_operation(record.kind), actor, &record.collection)
                            .pid(record.pid.clone())
                            .flags(flags)
                            .error(&err),
                    )
                    .await;
                PublishOutcome::Failed
            }
        };

        match self.procs.save_proc(record).await {
            Ok(saved) => *record = saved,
            Err(err) => error!(error = %err, pid = %record.pid, "Failed to persist publication status"),
        }
        metrics::record_publication(
            record.kind.as_str(),
            website.as_str(),
            record.publication_status(website).as_str(),
        );
        outcome
    }

    async fn deliver(&self, record: &ProcRecord, config: &PublishConfig) -> Result<bool> {
        let payload = build_payload(self.entities.as_ref(), record).await?;
        self.target.publish(&payload, config).await
    }
}

fn publish_operation(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Journal => "publish_journal",
        EntityKind::Issue => "publish_issue",
        EntityKind::Article => "publish_article",
    }
}

pub struct PublicationOrchestrator {
    publisher: RecordPublisher,
    dispatcher: Arc<dyn ArticleTaskDispatcher>,
}

impl PublicationOrchestrator {
    pub fn new(
        entities: Arc<dyn EntityStore>,
        procs: Arc<dyn ProcStore>,
        target: Arc<dyn PublishTarget>,
        dispatcher: Arc<dyn ArticleTaskDispatcher>,
        ledger: Arc<dyn FailureLedger>,
    ) -> Self {
        Self {
            publisher: RecordPublisher {
                entities,
                procs,
                target,
                ledger,
            },
            dispatcher,
        }
    }

    /// Resolve the stage target; `None` aborts the stage
    async fn capabilities(
        &self,
        actor: &Actor,
        collection: &str,
        kind: EntityKind,
        website: WebsiteKind,
        options: &PublishOptions,
    ) -> Option<PublishConfig> {
        match self.publisher.target.get_capabilities(collection, kind, website).await {
            Ok(config) => Some(config),
            Err(err) if err.is_expected() => {
                warn!(error = %err, collection, kind = %kind, website = %website, "Publish stage aborted");
                None
            }
            Err(err) => {
                self.publisher
                    .ledger
                    .record(
                        FailureEntry::new(publish_operation(kind), actor, collection)
                            .flags(options.flags(website))
                            .error(&err),
                    )
                    .await;
                None
            }
        }
    }

    async fn eligible(
        &self,
        actor: &Actor,
        query: &ProcQuery,
        website: WebsiteKind,
        options: &PublishOptions,
    ) -> Option<Vec<ProcRecord>> {
        match self.publisher.procs.items_to_publish(query, website).await {
            Ok(records) => {
                if records.is_empty() {
                    debug!(kind = %query.kind, "Nothing to publish");
                }
                Some(records)
            }
            Err(err) => {
                self.publisher
                    .ledger
                    .record(
                        FailureEntry::new(publish_operation(query.kind), actor, &query.collection)
                            .flags(options.flags(website))
                            .error(&err),
                    )
                    .await;
                None
            }
        }
    }

    /// Publish the eligible journals of `collection`, cascading into the
    /// issues of every journal the website accepted
    #[instrument(skip(self, actor, options), fields(user = %actor.username, force_update = options.force_update))]
    pub async fn publish_journals(
        &self,
        actor: &Actor,
        collection: &str,
        website: WebsiteKind,
        options: &PublishOptions,
    ) -> PublicationReport {
        let timer = StageTimer::start("publish_journals");
        let mut report = PublicationReport::default();

        let Some(config) = self
            .capabilities(actor, collection, EntityKind::Journal, website, options)
            .await
        else {
            report.journals.aborted += 1;
            timer.finish();
            return report;
        };

        let query = ProcQuery::new(collection, EntityKind::Journal)
            .filter(options.journal_filter.clone())
            .force(options.force_update);
        let Some(records) = self.eligible(actor, &query, website, options).await else {
            timer.finish();
            return report;
        };

        for mut record in records {
            let outcome = self
                .publisher
                .publish(actor, &mut record, &config, options.force_update, options.flags(website))
                .await;
            report.journals.tally(outcome);

            if outcome == PublishOutcome::Published && options.cascade_issues {
                let filter = ProcFilter {
                    parent_id: Some(record.id),
                    ..options.issue_filter.clone()
                };
                report.merge(self.publish_issues(actor, collection, website, filter, options).await);
            }
        }

        info!(
            published = report.journals.published,
            rejected = report.journals.rejected,
            failed = report.journals.failed,
            "Journal publication finished"
        );
        timer.finish();
        report
    }

    /// Publish the eligible issues matching `filter`, cascading into the
    /// articles of every issue the website accepted
    #[instrument(skip(self, actor, filter, options))]
    pub async fn publish_issues(
        &self,
        actor: &Actor,
        collection: &str,
        website: WebsiteKind,
        filter: ProcFilter,
        options: &PublishOptions,
    ) -> PublicationReport {
        let mut report = PublicationReport::default();

        let Some(config) = self
            .capabilities(actor, collection, EntityKind::Issue, website, options)
            .await
        else {
            report.issues.aborted += 1;
            return report;
        };

        let query = ProcQuery::new(collection, EntityKind::Issue)
            .filter(filter)
            .force(options.force_update);
        let Some(records) = self.eligible(actor, &query, website, options).await else {
            return report;
        };

        for mut record in records {
            let outcome = self
                .publisher
                .publish(actor, &mut record, &config, options.force_update, options.flags(website))
                .await;
            report.issues.tally(outcome);

            if outcome == PublishOutcome::Published && options.cascade_articles {
                report.articles.merge(
                    self.publish_articles(actor, collection, website, ProcFilter::parent(record.id), options)
                        .await,
                );
            }
        }
        report
    }

    /// Dispatch one publish task per eligible article matching `filter`
    #[instrument(skip(self, actor, filter, options))]
    pub async fn publish_articles(
        &self,
        actor: &Actor,
        collection: &str,
        website: WebsiteKind,
        filter: ProcFilter,
        options: &PublishOptions,
    ) -> PublishStageReport {
        let mut report = PublishStageReport::default();

        let Some(config) = self
            .capabilities(actor, collection, EntityKind::Article, website, options)
            .await
        else {
            report.aborted += 1;
            return report;
        };

        let query = ProcQuery::new(collection, EntityKind::Article)
            .filter(filter)
            .force(options.force_update);
        let Some(records) = self.eligible(actor, &query, website, options).await else {
            return report;
        };

        for record in records {
            let task = ArticlePublishTask {
                user_id: actor.user_id,
                username: actor.username.clone(),
                website_kind: website,
                article_proc_id: record.id,
                publish_config: config.clone(),
                force_update: options.force_update,
            };
            match self.dispatcher.dispatch(task).await {
                Ok(()) => {
                    report.dispatched += 1;
                    metrics::record_article_dispatch(website.as_str());
                }
                Err(err) => {
                    report.failed += 1;
                    self.publisher
                        .ledger
                        .record(
                            FailureEntry::new("dispatch_article", actor, collection)
                                .pid(record.pid.clone())
                                .flags(options.flags(website))
                                .error(&err),
                        )
                        .await;
                }
            }
        }
        debug!(dispatched = report.dispatched, "Article tasks dispatched");
        report
    }
}

/// Worker-side execution of [`ArticlePublishTask`]s
#[derive(Clone)]
pub struct ArticlePublisher {
    publisher: RecordPublisher,
}

impl ArticlePublisher {
    pub fn new(
        entities: Arc<dyn EntityStore>,
        procs: Arc<dyn ProcStore>,
        target: Arc<dyn PublishTarget>,
        ledger: Arc<dyn FailureLedger>,
    ) -> Self {
        Self {
            publisher: RecordPublisher {
                entities,
                procs,
                target,
                ledger,
            },
        }
    }

    /// Run one task. Failures end up on the record and in the ledger.
    #[instrument(skip_all, fields(article_proc_id = %task.article_proc_id, website = %task.website_kind))]
    pub async fn run(&self, task: &ArticlePublishTask) -> PublishOutcome {
        let actor = task.actor();
        let collection = &task.publish_config.collection;
        let mut flags = Map::new();
        flags.insert("website".to_string(), Value::String(task.website_kind.to_string()));
        flags.insert("force_update".to_string(), Value::Bool(task.force_update));

        let mut record = match self.publisher.procs.find_proc_by_id(task.article_proc_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!("Article record no longer exists");
                return PublishOutcome::Skipped;
            }
            Err(err) => {
                self.publisher
                    .ledger
                    .record(
                        FailureEntry::new("publish_article", &actor, collection)
                            .flag("article_proc_id", task.article_proc_id.to_string())
                            .flags(flags)
                            .error(&err),
                    )
                    .await;
                return PublishOutcome::Failed;
            }
        };

        let config = PublishConfig {
            website: task.website_kind,
            ..task.publish_config.clone()
        };
        self.publisher
            .publish(&actor, &mut record, &config, task.force_update, flags)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::ProgressStatus;
    use crate::ledger::MemoryLedger;
    use crate::publish::MockPublishTarget;
    use crate::store::{ArticleData, IssueKey, JournalData, MemoryStore};

    struct Seeded {
        journal: ProcRecord,
        issue: ProcRecord,
        articles: Vec<ProcRecord>,
    }

    async fn seed_journal(store: &MemoryStore, pid: &str, issn: &str) -> ProcRecord {
        let journal = store
            .upsert_journal(&JournalData {
                title: Some(format!("Revista {}", pid)),
                issn_electronic: Some(issn.to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        let mut record = ProcRecord::new(EntityKind::Journal, "scl", pid);
        record.complete_migration(journal.id);
        store.put_proc(record.clone()).unwrap();
        record
    }

    async fn seed(store: &MemoryStore) -> Seeded {
        let journal = seed_journal(store, "0001-0001", "1234-5678").await;
        let journal_id = journal.entity_id.unwrap();

        let issue = store
            .get_or_create_issue(&IssueKey::new(journal_id, Some("12"), Some("3"), None), Some("2023"))
            .await
            .unwrap();
        let mut issue_record = ProcRecord::new(EntityKind::Issue, "scl", "0001-000120230001");
        issue_record.parent_id = Some(journal.id);
        issue_record.complete_migration(issue.id);
        store.put_proc(issue_record.clone()).unwrap();

        let mut articles = Vec::new();
        for n in 1..=2 {
            let pid = format!("S0001-0001202300030000{}", n);
            let article = store
                .upsert_article(&ArticleData {
                    journal_id,
                    issue_id: issue.id,
                    pid_v2: pid.clone(),
                    pid_v3: None,
                    doi: None,
                    title: Some(format!("Artigo {}", n)),
                    first_page: None,
                    last_page: None,
                    publication_year: Some("2023".to_string()),
                })
                .await
                .unwrap();
            let mut record = ProcRecord::new(EntityKind::Article, "scl", &pid);
            record.parent_id = Some(issue_record.id);
            record.complete_migration(article.id);
            store.put_proc(record.clone()).unwrap();
            articles.push(record);
        }

        Seeded {
            journal,
            issue: issue_record,
            articles,
        }
    }

    fn orchestrator(
        store: &Arc<MemoryStore>,
        target: &Arc<MockPublishTarget>,
        dispatcher: Arc<dyn ArticleTaskDispatcher>,
        ledger: &Arc<MemoryLedger>,
    ) -> PublicationOrchestrator {
        PublicationOrchestrator::new(store.clone(), store.clone(), target.clone(), dispatcher, ledger.clone())
    }

    fn cascade() -> PublishOptions {
        PublishOptions {
            cascade_issues: true,
            cascade_articles: true,
            ..Default::default()
        }
    }

    async fn status(store: &MemoryStore, id: Uuid, website: WebsiteKind) -> ProgressStatus {
        store
            .find_proc_by_id(id)
            .await
            .unwrap()
            .unwrap()
            .publication_status(website)
    }

    #[tokio::test]
    async fn test_cascade_publishes_and_dispatches_articles() {
        let store = Arc::new(MemoryStore::new());
        let target = Arc::new(MockPublishTarget::new());
        let ledger = Arc::new(MemoryLedger::new());
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let seeded = seed(&store).await;
        let actor = Actor::new(3, "publisher");

        let report = orchestrator(&store, &target, dispatcher.clone(), &ledger)
            .publish_journals(&actor, "scl", WebsiteKind::Qa, &cascade())
            .await;

        assert_eq!(report.journals.published, 1);
        assert_eq!(report.issues.published, 1);
        assert_eq!(report.articles.dispatched, 2);
        assert_eq!(status(&store, seeded.journal.id, WebsiteKind::Qa).await, ProgressStatus::Done);
        assert_eq!(status(&store, seeded.issue.id, WebsiteKind::Qa).await, ProgressStatus::Done);
        assert_eq!(
            status(&store, seeded.journal.id, WebsiteKind::Public).await,
            ProgressStatus::NotStarted
        );

        let tasks = dispatcher.tasks();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].user_id, 3);
        assert_eq!(tasks[0].username, "publisher");
        assert_eq!(tasks[0].website_kind, WebsiteKind::Qa);
        assert_eq!(tasks[0].publish_config.kind, EntityKind::Article);
        assert_eq!(tasks[0].article_proc_id, seeded.articles[0].id);
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn test_rejected_journal_gates_issue_cascade() {
        let store = Arc::new(MemoryStore::new());
        let target = Arc::new(MockPublishTarget::new());
        let ledger = Arc::new(MemoryLedger::new());
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let seeded = seed(&store).await;
        target.reject("0001-0001");

        let report = orchestrator(&store, &target, dispatcher.clone(), &ledger)
            .publish_journals(&Actor::default(), "scl", WebsiteKind::Qa, &cascade())
            .await;

        assert_eq!(report.journals.rejected, 1);
        assert_eq!(report.issues, PublishStageReport::default());
        assert!(target.published(EntityKind::Issue).is_empty());
        assert!(dispatcher.tasks().is_empty());
        assert_eq!(status(&store, seeded.journal.id, WebsiteKind::Qa).await, ProgressStatus::Error);
        assert_eq!(
            status(&store, seeded.issue.id, WebsiteKind::Qa).await,
            ProgressStatus::NotStarted
        );
    }

    #[tokio::test]
    async fn test_precondition_failure_aborts_stage() {
        let store = Arc::new(MemoryStore::new());
        let target = Arc::new(MockPublishTarget::new());
        let ledger = Arc::new(MemoryLedger::new());
        let seeded = seed(&store).await;
        target.fail_precondition(true);

        let report = orchestrator(&store, &target, Arc::new(RecordingDispatcher::new()), &ledger)
            .publish_journals(&Actor::default(), "scl", WebsiteKind::Public, &cascade())
            .await;

        assert_eq!(report.journals.aborted, 1);
        assert_eq!(report.journals.published, 0);
        assert!(target.published(EntityKind::Journal).is_empty());
        assert_eq!(
            status(&store, seeded.journal.id, WebsiteKind::Public).await,
            ProgressStatus::NotStarted
        );
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn test_item_failure_does_not_stop_siblings() {
        let store = Arc::new(MemoryStore::new());
        let target = Arc::new(MockPublishTarget::new());
        let ledger = Arc::new(MemoryLedger::new());
        let first = seed_journal(&store, "0001-0001", "1111-1111").await;
        let second = seed_journal(&store, "0002-0002", "2222-2222").await;
        target.fail("0001-0001");

        let report = orchestrator(&store, &target, Arc::new(RecordingDispatcher::new()), &ledger)
            .publish_journals(&Actor::default(), "scl", WebsiteKind::Qa, &PublishOptions::default())
            .await;

        assert_eq!(report.journals.failed, 1);
        assert_eq!(report.journals.published, 1);
        assert_eq!(status(&store, first.id, WebsiteKind::Qa).await, ProgressStatus::Error);
        assert_eq!(status(&store, second.id, WebsiteKind::Qa).await, ProgressStatus::Done);

        let entries = ledger.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].operation, "publish_journal");
        assert_eq!(entries[0].pid.as_deref(), Some("0001-0001"));
        assert_eq!(entries[0].flags["website"], "QA");
    }

    #[tokio::test]
    async fn test_records_without_entity_are_not_published() {
        let store = Arc::new(MemoryStore::new());
        let target = Arc::new(MockPublishTarget::new());
        let ledger = Arc::new(MemoryLedger::new());
        store
            .put_proc(ProcRecord::new(EntityKind::Journal, "scl", "0005-0005"))
            .unwrap();

        let report = orchestrator(&store, &target, Arc::new(RecordingDispatcher::new()), &ledger)
            .publish_journals(&Actor::default(), "scl", WebsiteKind::Qa, &PublishOptions::default())
            .await;
        assert_eq!(report.journals, PublishStageReport::default());
        assert!(target.published(EntityKind::Journal).is_empty());
    }

    #[tokio::test]
    async fn test_worker_pool_isolates_article_failures() {
        let store = Arc::new(MemoryStore::new());
        let target = Arc::new(MockPublishTarget::new());
        let ledger = Arc::new(MemoryLedger::new());
        let seeded = seed(&store).await;
        target.fail(&seeded.articles[0].pid);

        let publisher = Arc::new(ArticlePublisher::new(
            store.clone(),
            store.clone(),
            target.clone(),
            ledger.clone(),
        ));
        let pool = Arc::new(LocalWorkerPool::start(publisher, 2, 4));
        let report = orchestrator(&store, &target, pool.clone(), &ledger)
            .publish_articles(
                &Actor::default(),
                "scl",
                WebsiteKind::Qa,
                ProcFilter::parent(seeded.issue.id),
                &PublishOptions::default(),
            )
            .await;
        assert_eq!(report.dispatched, 2);
        pool.shutdown().await;

        assert_eq!(
            status(&store, seeded.articles[0].id, WebsiteKind::Qa).await,
            ProgressStatus::Error
        );
        assert_eq!(
            status(&store, seeded.articles[1].id, WebsiteKind::Qa).await,
            ProgressStatus::Done
        );
        let entries = ledger.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].operation, "publish_article");

        // dispatching after shutdown is refused
        let task = ArticlePublishTask {
            user_id: 1,
            username: "admin".to_string(),
            website_kind: WebsiteKind::Qa,
            article_proc_id: seeded.articles[0].id,
            publish_config: target
                .get_capabilities("scl", EntityKind::Article, WebsiteKind::Qa)
                .await
                .unwrap(),
            force_update: false,
        };
        assert!(pool.dispatch(task).await.is_err());
    }

    #[tokio::test]
    async fn test_duplicate_task_delivery_publishes_once() {
        let store = Arc::new(MemoryStore::new());
        let target = Arc::new(MockPublishTarget::new());
        let ledger = Arc::new(MemoryLedger::new());
        let seeded = seed(&store).await;
        let publisher = ArticlePublisher::new(store.clone(), store.clone(), target.clone(), ledger.clone());

        let task = ArticlePublishTask {
            user_id: 1,
            username: "admin".to_string(),
            website_kind: WebsiteKind::Public,
            article_proc_id: seeded.articles[1].id,
            publish_config: target
                .get_capabilities("scl", EntityKind::Article, WebsiteKind::Public)
                .await
                .unwrap(),
            force_update: false,
        };

        assert_eq!(publisher.run(&task).await, PublishOutcome::Published);
        assert_eq!(publisher.run(&task).await, PublishOutcome::Skipped);
        assert_eq!(target.published(EntityKind::Article).len(), 1);

        let forced = ArticlePublishTask {
            force_update: true,
            ..task
        };
        assert_eq!(publisher.run(&forced).await, PublishOutcome::Published);
    }

    #[tokio::test]
    async fn test_task_for_missing_record_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        let target = Arc::new(MockPublishTarget::new());
        let ledger = Arc::new(MemoryLedger::new());
        let publisher = ArticlePublisher::new(store.clone(), store.clone(), target.clone(), ledger.clone());
        let task = ArticlePublishTask {
            user_id: 1,
            username: "admin".to_string(),
            website_kind: WebsiteKind::Qa,
            article_proc_id: Uuid::new_v4(),
            publish_config: target
                .get_capabilities("scl", EntityKind::Article, WebsiteKind::Qa)
                .await
                .unwrap(),
            force_update: false,
        };
        assert_eq!(publisher.run(&task).await, PublishOutcome::Skipped);
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_task_message_shape() {
        let task = ArticlePublishTask {
            user_id: 9,
            username: "ops".to_string(),
            website_kind: WebsiteKind::Public,
            article_proc_id: Uuid::nil(),
            publish_config: PublishConfig {
                website: WebsiteKind::Public,
                collection: "scl".to_string(),
                kind: EntityKind::Article,
                endpoint: "http://www.test/api/v1/article/".to_string(),
                token: None,
                timeout_secs: 30,
            },
            force_update: true,
        };
        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["website_kind"], "PUBLIC");
        assert_eq!(value["publish_config"]["kind"], "article");
        assert_eq!(value["force_update"], true);
        assert_eq!(value["user_id"], 9);
    }
}
