//! Service wiring shared by the binaries

use crate::config::AppConfig;
use crate::db::{DbPool, Repository};
use crate::errors::Result;
use crate::ledger::{FailureLedger, MemoryLedger};
use crate::legacy::{FsLegacyFiles, JsonLinesSource, LegacyFileImporter, LegacySource};
use crate::migration::MigrationOrchestrator;
use crate::publication::{ArticlePublisher, ArticleTaskDispatcher, PublicationOrchestrator};
use crate::publish::{HttpPublishTarget, MockPublishTarget, PublishTarget};
use crate::remote::{HttpMetadataSource, MetadataSource};
use crate::store::{EntityStore, MemoryStore, ProcStore};
use crate::sync::Synchronizer;
use std::sync::Arc;
use tracing::info;

/// Collaborators behind the orchestrators
#[derive(Clone)]
pub struct Services {
    pub entities: Arc<dyn EntityStore>,
    pub procs: Arc<dyn ProcStore>,
    pub ledger: Arc<dyn FailureLedger>,
    pub sync: Arc<Synchronizer>,
    pub legacy: Arc<dyn LegacySource>,
    pub files: Arc<dyn LegacyFileImporter>,
    pub target: Arc<dyn PublishTarget>,
}

impl Services {
    /// Database-backed services with the HTTP remote source and publish target
    pub async fn connect(config: &AppConfig) -> Result<(Self, Arc<Repository>)> {
        let pool = DbPool::new(&config.database).await?;
        let repository = Arc::new(Repository::new(pool));
        if config.database.ensure_schema {
            repository.ensure_schema().await?;
        }

        let services = Self::assemble(
            repository.clone(),
            repository.clone(),
            repository.clone(),
            Arc::new(HttpMetadataSource::new()?),
            Arc::new(HttpPublishTarget::new(config.publication.clone())?),
            config,
        );
        info!("Services connected to database");
        Ok((services, repository))
    }

    /// In-memory stores and a publish target that accepts everything; the
    /// remote source and legacy export are still read for real
    pub fn dry_run(config: &AppConfig) -> Result<Self> {
        let store = Arc::new(MemoryStore::new());
        Ok(Self::assemble(
            store.clone(),
            store,
            Arc::new(MemoryLedger::new()),
            Arc::new(HttpMetadataSource::new()?),
            Arc::new(MockPublishTarget::new()),
            config,
        ))
    }

    pub fn assemble(
        entities: Arc<dyn EntityStore>,
        procs: Arc<dyn ProcStore>,
        ledger: Arc<dyn FailureLedger>,
        source: Arc<dyn MetadataSource>,
        target: Arc<dyn PublishTarget>,
        config: &AppConfig,
    ) -> Self {
        let sync = Arc::new(Synchronizer::new(
            entities.clone(),
            procs.clone(),
            source,
            ledger.clone(),
            &config.remote,
        ));
        Self {
            entities,
            procs,
            ledger,
            sync,
            legacy: Arc::new(JsonLinesSource::new(&config.legacy.root)),
            files: Arc::new(FsLegacyFiles::new(&config.legacy.files_root)),
            target,
        }
    }

    pub fn migration(&self) -> MigrationOrchestrator {
        MigrationOrchestrator::new(
            self.entities.clone(),
            self.procs.clone(),
            self.sync.clone(),
            self.legacy.clone(),
            self.files.clone(),
            self.ledger.clone(),
        )
    }

    pub fn publication(&self, dispatcher: Arc<dyn ArticleTaskDispatcher>) -> PublicationOrchestrator {
        PublicationOrchestrator::new(
            self.entities.clone(),
            self.procs.clone(),
            self.target.clone(),
            dispatcher,
            self.ledger.clone(),
        )
    }

    pub fn article_publisher(&self) -> ArticlePublisher {
        ArticlePublisher::new(
            self.entities.clone(),
            self.procs.clone(),
            self.target.clone(),
            self.ledger.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Actor;
    use crate::migration::MigrationOptions;

    #[tokio::test]
    async fn test_dry_run_with_empty_export_is_idle() {
        let mut config = AppConfig::default();
        config.legacy.root = "/nonexistent/legacy".to_string();
        let services = Services::dry_run(&config).unwrap();

        let report = services
            .migration()
            .run(&Actor::default(), "scl", &MigrationOptions::default())
            .await;
        assert_eq!(report.registered_journals.processed, 0);
        assert_eq!(report.journals.processed, 0);

        let counts = services
            .procs
            .status_counts("scl", crate::db::models::EntityKind::Journal)
            .await
            .unwrap();
        assert_eq!(counts.total, 0);
    }
}
