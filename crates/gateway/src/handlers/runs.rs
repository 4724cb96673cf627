//! Migration and publication run triggers
//!
//! Runs are long; the handlers validate the request, spawn the run and
//! answer 202 with a run id that tags every log line of the run. At most
//! one run per collection and operation is active; a second one gets 409.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use bibliosync_common::{
    db::models::WebsiteKind,
    errors::{AppError, Result},
    publication::{ArticleTaskDispatcher, LocalWorkerPool},
    store::ProcFilter,
    MigrationOptions, PublishOptions,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;
use validator::Validate;

use crate::AppState;

/// Migration run request
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(default)]
pub struct MigrateRequest {
    pub force_update: bool,
    pub force_import_acron_id_file: bool,
    pub force_migrate_document_records: bool,
    pub force_import_issue_files: bool,
    pub migrate_issues: bool,
    /// Implies `migrate_issues`
    pub migrate_articles: bool,
    #[validate(length(min = 1))]
    pub journal_pid: Option<String>,
    #[validate(length(min = 1))]
    pub journal_acron: Option<String>,
    #[validate(length(equal = 4))]
    pub publication_year: Option<String>,
}

impl MigrateRequest {
    fn options(&self) -> MigrationOptions {
        MigrationOptions {
            force_update: self.force_update,
            force_import_acron_id_file: self.force_import_acron_id_file,
            force_migrate_document_records: self.force_migrate_document_records,
            force_import_issue_files: self.force_import_issue_files,
            migrate_issues: self.migrate_issues || self.migrate_articles,
            migrate_articles: self.migrate_articles,
            journal_filter: journal_filter(&self.journal_pid, &self.journal_acron),
            publication_year: self.publication_year.clone(),
        }
    }
}

/// Publication run request
#[derive(Debug, Deserialize, Validate)]
pub struct PublishRequest {
    pub website: WebsiteKind,
    #[serde(default)]
    pub force_update: bool,
    #[serde(default)]
    pub cascade_issues: bool,
    /// Implies `cascade_issues`
    #[serde(default)]
    pub cascade_articles: bool,
    #[serde(default)]
    #[validate(length(min = 1))]
    pub journal_pid: Option<String>,
    #[serde(default)]
    #[validate(length(min = 1))]
    pub journal_acron: Option<String>,
    #[serde(default)]
    #[validate(length(equal = 4))]
    pub publication_year: Option<String>,
}

impl PublishRequest {
    fn options(&self) -> PublishOptions {
        PublishOptions {
            force_update: self.force_update,
            journal_filter: journal_filter(&self.journal_pid, &self.journal_acron),
            issue_filter: ProcFilter {
                publication_year: self.publication_year.clone(),
                ..Default::default()
            },
            cascade_issues: self.cascade_issues || self.cascade_articles,
            cascade_articles: self.cascade_articles,
        }
    }
}

/// Accepted run
#[derive(Debug, Serialize)]
pub struct RunAccepted {
    pub run_id: Uuid,
    pub collection: String,
    pub operation: &'static str,
}

/// Runs in flight, keyed by collection and operation
#[derive(Debug, Clone, Default)]
pub struct RunRegistry {
    active: Arc<Mutex<HashSet<(String, &'static str)>>>,
}

impl RunRegistry {
    /// Claim `(collection, operation)` until the guard is dropped
    pub fn begin(&self, collection: &str, operation: &'static str) -> Result<RunGuard> {
        let key = (collection.to_string(), operation);
        let mut active = self.active.lock().map_err(|_| AppError::Internal {
            message: "run registry lock poisoned".to_string(),
        })?;
        if !active.insert(key.clone()) {
            return Err(AppError::RunInProgress {
                collection: collection.to_string(),
                operation: operation.to_string(),
            });
        }
        Ok(RunGuard {
            active: self.active.clone(),
            key,
        })
    }
}

/// Releases its run slot on drop
#[derive(Debug)]
pub struct RunGuard {
    active: Arc<Mutex<HashSet<(String, &'static str)>>>,
    key: (String, &'static str),
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if let Ok(mut active) = self.active.lock() {
            active.remove(&self.key);
        }
    }
}

fn journal_filter(pid: &Option<String>, acron: &Option<String>) -> ProcFilter {
    ProcFilter {
        pid: pid.clone(),
        journal_acron: acron.clone(),
        ..Default::default()
    }
}

fn check<T: Validate>(request: &T) -> Result<()> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: e.field_errors().keys().next().map(|k| k.to_string()),
    })
}

/// Start a migration run for a collection
pub async fn migrate(
    State(state): State<AppState>,
    Path(acron): Path<String>,
    Json(request): Json<MigrateRequest>,
) -> Result<(StatusCode, Json<RunAccepted>)> {
    check(&request)?;
    let guard = state.runs.begin(&acron, "migrate")?;

    let run_id = Uuid::new_v4();
    let options = request.options();
    let migration = state.services.migration();
    let actor = state.actor.clone();
    let collection = acron.clone();

    let span = info_span!("migration_run", %run_id, collection = %acron);
    tokio::spawn(
        async move {
            let _guard = guard;
            let report = migration.run(&actor, &collection, &options).await;
            match serde_json::to_value(&report) {
                Ok(report) => info!(%report, "Migration run finished"),
                Err(e) => error!(error = %e, "Migration run finished; report not serializable"),
            }
        }
        .instrument(span),
    );

    info!(%run_id, collection = %acron, "Migration run accepted");
    Ok((
        StatusCode::ACCEPTED,
        Json(RunAccepted {
            run_id,
            collection: acron,
            operation: "migrate",
        }),
    ))
}

/// Start a publication run for a collection
pub async fn publish(
    State(state): State<AppState>,
    Path(acron): Path<String>,
    Json(request): Json<PublishRequest>,
) -> Result<(StatusCode, Json<RunAccepted>)> {
    check(&request)?;
    let guard = state.runs.begin(&acron, "publish")?;
    state
        .services
        .entities
        .find_collection(&acron)
        .await?
        .ok_or_else(|| AppError::CollectionNotFound { acron: acron.clone() })?;

    let run_id = Uuid::new_v4();
    let options = request.options();
    let website = request.website;
    let actor = state.actor.clone();
    let collection = acron.clone();

    let span = info_span!("publication_run", %run_id, collection = %acron, %website);
    tokio::spawn(
        async move {
            let _guard = guard;
            let (dispatcher, pool): (Arc<dyn ArticleTaskDispatcher>, Option<Arc<LocalWorkerPool>>) =
                match state.queue.clone() {
                    Some(queue) => (queue, None),
                    None => {
                        let pool = Arc::new(LocalWorkerPool::start(
                            Arc::new(state.services.article_publisher()),
                            state.config.workers.pool_size,
                            state.config.workers.capacity,
                        ));
                        (pool.clone(), Some(pool))
                    }
                };

            let report = state
                .services
                .publication(dispatcher)
                .publish_journals(&actor, &collection, website, &options)
                .await;
            if let Some(pool) = pool {
                pool.shutdown().await;
            }
            match serde_json::to_value(&report) {
                Ok(report) => info!(%report, "Publication run finished"),
                Err(e) => error!(error = %e, "Publication run finished; report not serializable"),
            }
        }
        .instrument(span),
    );

    info!(%run_id, collection = %acron, %website, "Publication run accepted");
    Ok((
        StatusCode::ACCEPTED,
        Json(RunAccepted {
            run_id,
            collection: acron,
            operation: "publish",
        }),
    ))
}
