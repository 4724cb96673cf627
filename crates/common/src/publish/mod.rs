//! Publish target
//!
//! The website API records are pushed to. A capability check per
//! `(collection, kind, website)` precedes every publish stage and yields
//! the config snapshot that individual publish calls (and article tasks)
//! carry.

use crate::config::PublicationConfig;
use crate::db::models::{EntityKind, WebsiteKind};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Resolved target for one publish stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishConfig {
    pub website: WebsiteKind,
    pub collection: String,
    pub kind: EntityKind,
    /// Endpoint receiving the payloads
    pub endpoint: String,
    /// Bearer token, when the website requires one
    pub token: Option<String>,
    pub timeout_secs: u64,
}

impl PublishConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[async_trait]
pub trait PublishTarget: Send + Sync {
    /// Resolve the target for a stage. A `PublishPrecondition` error means
    /// the stage must not run at all.
    async fn get_capabilities(
        &self,
        collection: &str,
        kind: EntityKind,
        website: WebsiteKind,
    ) -> Result<PublishConfig>;

    /// Push one payload; `Ok(true)` when the website accepted it
    async fn publish(&self, payload: &Value, config: &PublishConfig) -> Result<bool>;
}

fn precondition(collection: &str, kind: EntityKind, website: WebsiteKind, message: impl Into<String>) -> AppError {
    AppError::PublishPrecondition {
        collection: collection.to_string(),
        kind: kind.to_string(),
        website: website.to_string(),
        message: message.into(),
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(alias = "access")]
    token: String,
}

/// HTTP publish target driven by `publication` configuration
pub struct HttpPublishTarget {
    client: reqwest::Client,
    config: PublicationConfig,
}

impl HttpPublishTarget {
    pub fn new(config: PublicationConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("bibliosync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, config })
    }

    async fn obtain_token(&self, base_url: &str, username: &str, password: &str) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/api/v1/auth/token", base_url))
            .json(&json!({ "username": username, "password": password }))
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .send()
            .await?
            .error_for_status()?;
        let body: TokenResponse = response.json().await?;
        Ok(body.token)
    }
}

#[async_trait]
impl PublishTarget for HttpPublishTarget {
    #[instrument(skip(self))]
    async fn get_capabilities(
        &self,
        collection: &str,
        kind: EntityKind,
        website: WebsiteKind,
    ) -> Result<PublishConfig> {
        let site = self
            .config
            .website(website)
            .ok_or_else(|| precondition(collection, kind, website, "website is not configured"))?;
        if !site.serves(collection) {
            return Err(precondition(collection, kind, website, "website does not serve the collection"));
        }

        let base_url = site.base_url.trim_end_matches('/');
        let token = match (&site.username, &site.password) {
            (Some(username), Some(password)) => Some(
                self.obtain_token(base_url, username, password)
                    .await
                    .map_err(|e| precondition(collection, kind, website, format!("authentication failed: {}", e)))?,
            ),
            _ => None,
        };

        Ok(PublishConfig {
            website,
            collection: collection.to_string(),
            kind,
            endpoint: format!("{}/api/v1/{}/", base_url, kind),
            token,
            timeout_secs: self.config.timeout_secs,
        })
    }

    #[instrument(skip(self, payload, config), fields(endpoint = %config.endpoint))]
    async fn publish(&self, payload: &Value, config: &PublishConfig) -> Result<bool> {
        let pid = payload.get("pid").and_then(Value::as_str).unwrap_or_default();
        let mut request = self.client.post(&config.endpoint).json(payload).timeout(config.timeout());
        if let Some(ref token) = config.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| AppError::PublishFailed {
            kind: config.kind.to_string(),
            pid: pid.to_string(),
            message: e.to_string(),
        })?;

        if !check_status(response.status(), config.kind, pid)? {
            return Ok(false);
        }

        // an empty or non-JSON body counts as accepted
        let body: Value = response.json().await.unwrap_or(Value::Null);
        let accepted = body.get("published").and_then(Value::as_bool).unwrap_or(true);
        debug!(pid, accepted, "Payload delivered");
        Ok(accepted)
    }
}

/// `Ok(true)` when the body should be read, `Ok(false)` for a rejected
/// payload. Server errors and refused credentials are failures: the token
/// an article task carries may have expired before a worker ran it.
fn check_status(status: reqwest::StatusCode, kind: EntityKind, pid: &str) -> Result<bool> {
    let refused = matches!(
        status,
        reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN
    );
    if status.is_server_error() || refused {
        return Err(AppError::PublishFailed {
            kind: kind.to_string(),
            pid: pid.to_string(),
            message: format!("website answered {}", status),
        });
    }
    if !status.is_success() {
        warn!(status = status.as_u16(), pid, "Website rejected payload");
        return Ok(false);
    }
    Ok(true)
}

#[derive(Default)]
struct MockState {
    precondition_failure: bool,
    rejected: HashSet<String>,
    failing: HashSet<String>,
    published: Vec<(EntityKind, String)>,
    capability_calls: usize,
}

/// In-process publish target for tests and dry runs
#[derive(Default)]
pub struct MockPublishTarget {
    state: Mutex<MockState>,
}

impl MockPublishTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every capability check fails
    pub fn fail_precondition(&self, fail: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.precondition_failure = fail;
        }
    }

    /// The website answers "not published" for `pid`
    pub fn reject(&self, pid: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.rejected.insert(pid.to_string());
        }
    }

    /// Publishing `pid` raises an error
    pub fn fail(&self, pid: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.failing.insert(pid.to_string());
        }
    }

    /// PIDs accepted so far for `kind`, in call order
    pub fn published(&self, kind: EntityKind) -> Vec<String> {
        self.state
            .lock()
            .map(|s| {
                s.published
                    .iter()
                    .filter(|(k, _)| *k == kind)
                    .map(|(_, pid)| pid.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn capability_calls(&self) -> usize {
        self.state.lock().map(|s| s.capability_calls).unwrap_or(0)
    }
}

#[async_trait]
impl PublishTarget for MockPublishTarget {
    async fn get_capabilities(
        &self,
        collection: &str,
        kind: EntityKind,
        website: WebsiteKind,
    ) -> Result<PublishConfig> {
        let mut state = self.state.lock().map_err(|e| AppError::Internal {
            message: e.to_string(),
        })?;
        state.capability_calls += 1;
        if state.precondition_failure {
            return Err(precondition(collection, kind, website, "mock precondition failure"));
        }
        Ok(PublishConfig {
            website,
            collection: collection.to_string(),
            kind,
            endpoint: format!("mock://{}/{}", website, kind),
            token: None,
            timeout_secs: 5,
        })
    }

    async fn publish(&self, payload: &Value, config: &PublishConfig) -> Result<bool> {
        let pid = payload
            .get("pid")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let mut state = self.state.lock().map_err(|e| AppError::Internal {
            message: e.to_string(),
        })?;
        if state.failing.contains(&pid) {
            return Err(AppError::PublishFailed {
                kind: config.kind.to_string(),
                pid,
                message: "mock failure".to_string(),
            });
        }
        if state.rejected.contains(&pid) {
            return Ok(false);
        }
        state.published.push((config.kind, pid));
        Ok(true)
    }
}
