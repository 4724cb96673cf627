//! Configuration management for Bibliosync services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default, config/{APP_ENV}, config/local)
//! - Default values

use crate::db::models::WebsiteKind;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct AppConfig {
    /// Gateway server configuration
    #[serde(default)]
    #[validate(nested)]
    pub server: ServerConfig,

    /// Database configuration
    #[validate(nested)]
    pub database: DatabaseConfig,

    /// Remote metadata API configuration
    #[validate(nested)]
    pub remote: RemoteConfig,

    /// Legacy collection export location
    #[serde(default)]
    pub legacy: LegacyConfig,

    /// Publish target websites
    #[serde(default)]
    #[validate(nested)]
    pub publication: PublicationConfig,

    /// Article task queue configuration (SQS)
    #[serde(default)]
    #[validate(nested)]
    pub queue: QueueConfig,

    /// In-process article worker pool
    #[serde(default)]
    #[validate(nested)]
    pub workers: WorkerConfig,

    /// Acting user for unattended runs
    #[serde(default)]
    pub actor: ActorConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
}

impl ServerConfig {
    /// `host:port` for the listener
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct DatabaseConfig {
    /// Primary database URL (for writes)
    pub url: String,

    /// Read replica URL (optional, falls back to primary)
    pub read_url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    #[validate(range(min = 1))]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Create missing tables and uniqueness indexes at startup
    #[serde(default = "default_enabled")]
    pub ensure_schema: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct RemoteConfig {
    /// Journal metadata endpoint
    #[validate(url)]
    pub journal_api_url: String,

    /// Issue metadata endpoint
    #[validate(url)]
    pub issue_api_url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_remote_timeout")]
    #[validate(range(min = 1))]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LegacyConfig {
    /// Root directory holding `{collection}/{kind}.jsonl` exports
    #[serde(default = "default_legacy_root")]
    pub root: String,

    /// Root directory holding legacy journal and issue files
    #[serde(default = "default_legacy_files_root")]
    pub files_root: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct WebsiteConfig {
    /// Base URL of the website's publication API
    #[validate(url)]
    pub base_url: String,

    /// API username (optional, enables token authentication)
    pub username: Option<String>,

    /// API password
    pub password: Option<String>,

    /// Collections served by this website (empty means all)
    #[serde(default)]
    pub collections: Vec<String>,
}

impl WebsiteConfig {
    /// Check whether the website serves a collection
    pub fn serves(&self, collection: &str) -> bool {
        self.collections.is_empty() || self.collections.iter().any(|c| c == collection)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct PublicationConfig {
    /// Quality-assurance website
    #[validate(nested)]
    pub qa: Option<WebsiteConfig>,

    /// Public website
    #[validate(nested)]
    pub public: Option<WebsiteConfig>,

    /// Publish request timeout in seconds
    #[serde(default = "default_publish_timeout")]
    pub timeout_secs: u64,
}

impl PublicationConfig {
    /// Website configuration for a website kind
    pub fn website(&self, kind: WebsiteKind) -> Option<&WebsiteConfig> {
        match kind {
            WebsiteKind::Qa => self.qa.as_ref(),
            WebsiteKind::Public => self.public.as_ref(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct QueueConfig {
    /// SQS article publication queue URL
    pub article_queue_url: Option<String>,

    /// Dead letter queue URL
    pub dlq_url: Option<String>,

    /// Maximum messages to receive per poll
    #[serde(default = "default_queue_batch_size")]
    #[validate(range(min = 1, max = 10))]
    pub batch_size: u32,

    /// Long polling timeout in seconds
    #[serde(default = "default_queue_poll_timeout")]
    pub poll_timeout_secs: u64,

    /// Visibility timeout in seconds
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct WorkerConfig {
    /// Number of concurrent article workers
    #[serde(default = "default_pool_size")]
    #[validate(range(min = 1))]
    pub pool_size: usize,

    /// Bounded queue capacity in front of the workers
    #[serde(default = "default_pool_capacity")]
    #[validate(range(min = 1))]
    pub capacity: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ActorConfig {
    #[serde(default = "default_actor_id")]
    pub user_id: i64,

    #[serde(default = "default_actor_username")]
    pub username: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for logs
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_remote_timeout() -> u64 { 30 }
fn default_legacy_root() -> String { "legacy".to_string() }
fn default_legacy_files_root() -> String { "legacy/files".to_string() }
fn default_publish_timeout() -> u64 { 60 }
fn default_queue_batch_size() -> u32 { 10 }
fn default_queue_poll_timeout() -> u64 { 20 }
fn default_visibility_timeout() -> u64 { 300 }
fn default_pool_size() -> usize { 4 }
fn default_pool_capacity() -> usize { 256 }
fn default_actor_id() -> i64 { 1 }
fn default_actor_username() -> String { "admin".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 0 }
fn default_service_name() -> String { "bibliosync".to_string() }
fn default_enabled() -> bool { true }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for LegacyConfig {
    fn default() -> Self {
        Self {
            root: default_legacy_root(),
            files_root: default_legacy_files_root(),
        }
    }
}

impl Default for PublicationConfig {
    fn default() -> Self {
        Self {
            qa: None,
            public: None,
            timeout_secs: default_publish_timeout(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            article_queue_url: None,
            dlq_url: None,
            batch_size: default_queue_batch_size(),
            poll_timeout_secs: default_queue_poll_timeout(),
            visibility_timeout_secs: default_visibility_timeout(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            capacity: default_pool_capacity(),
        }
    }
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            user_id: default_actor_id(),
            username: default_actor_username(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // e.g., APP__REMOTE__TIMEOUT_SECS=10
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load and validate, the way binaries start up
    pub fn load_validated() -> crate::errors::Result<Self> {
        let config = Self::load()?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig {
                url: "postgres://localhost/bibliosync".to_string(),
                read_url: None,
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
                connect_timeout_secs: default_connect_timeout(),
                idle_timeout_secs: default_idle_timeout(),
                ensure_schema: default_enabled(),
            },
            remote: RemoteConfig {
                journal_api_url: "http://localhost:8000/api/v2/pid/journal/".to_string(),
                issue_api_url: "http://localhost:8000/api/v2/pid/issue/".to_string(),
                timeout_secs: default_remote_timeout(),
            },
            legacy: LegacyConfig::default(),
            publication: PublicationConfig::default(),
            queue: QueueConfig::default(),
            workers: WorkerConfig::default(),
            actor: ActorConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.bind_address(), "0.0.0.0:8080");
        assert_eq!(config.remote.timeout_secs, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_remote_url_rejected() {
        let mut config = AppConfig::default();
        config.remote.journal_api_url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_website_collections() {
        let website = WebsiteConfig {
            base_url: "https://qa.example.org".to_string(),
            username: None,
            password: None,
            collections: vec!["scl".to_string()],
        };
        assert!(website.serves("scl"));
        assert!(!website.serves("arg"));

        let mut config = PublicationConfig::default();
        config.qa = Some(website);
        assert!(config.website(WebsiteKind::Qa).is_some());
        assert!(config.website(WebsiteKind::Public).is_none());
    }
}
