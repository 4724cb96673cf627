//! Bibliosync Common Library
//!
//! Shared code for the Bibliosync binaries including:
//! - Canonical entity and processing record models
//! - Entity / processing record stores (database and in-memory)
//! - Remote metadata client and legacy collection source
//! - Synchronizer, migration and publication orchestrators
//! - Failure ledger, error types and configuration
//! - Metrics and the article task queue

pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod ledger;
pub mod legacy;
pub mod metrics;
pub mod migration;
pub mod proc;
pub mod publication;
pub mod publish;
pub mod queue;
pub mod remote;
pub mod services;
pub mod store;
pub mod sync;

// Re-export commonly used types
pub use auth::Actor;
pub use config::AppConfig;
pub use db::Repository;
pub use errors::{AppError, Result};
pub use migration::{MigrationOptions, MigrationOrchestrator, MigrationReport};
pub use publication::{ArticlePublishTask, ArticlePublisher, PublicationOrchestrator, PublishOptions};
pub use services::Services;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
