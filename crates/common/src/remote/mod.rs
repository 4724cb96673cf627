//! Remote metadata source
//!
//! The authoritative journal / issue API. Calls are time-bounded and
//! never retried here: retrying is a matter of re-running migration.

mod rows;

pub use rows::{
    parse_results, CollectionRow, HistoryRow, IssueRow, JournalRow, NamedRow, OfficialRow, SubjectRow,
};

use crate::errors::{AppError, Result};
use crate::metrics;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

/// Metadata lookup by natural key
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Fetch `url` with query `params`; the body is `{"results": [...]}`
    async fn fetch(&self, url: &str, params: &BTreeMap<String, String>, timeout: Duration) -> Result<Value>;
}

/// reqwest-backed metadata source
pub struct HttpMetadataSource {
    client: reqwest::Client,
}

impl HttpMetadataSource {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("bibliosync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl MetadataSource for HttpMetadataSource {
    #[instrument(skip(self, params), fields(url = %url))]
    async fn fetch(&self, url: &str, params: &BTreeMap<String, String>, timeout: Duration) -> Result<Value> {
        let start = Instant::now();

        let result = async {
            let response = self
                .client
                .get(url)
                .query(params)
                .timeout(timeout)
                .send()
                .await
                .map_err(|e| AppError::RemoteUnavailable {
                    url: url.to_string(),
                    message: e.to_string(),
                })?;

            let status = response.status();
            if !status.is_success() {
                return Err(AppError::RemoteUnavailable {
                    url: url.to_string(),
                    message: format!("HTTP {}", status),
                });
            }

            response.json::<Value>().await.map_err(|e| AppError::RemoteUnavailable {
                url: url.to_string(),
                message: format!("invalid JSON body: {}", e),
            })
        }
        .await;

        metrics::record_remote_fetch(url, start.elapsed().as_secs_f64(), result.is_ok());
        debug!(success = result.is_ok(), "Remote metadata fetched");
        result
    }
}

/// Canned metadata source for tests
#[derive(Default)]
pub struct MockMetadataSource {
    responses: Mutex<HashMap<String, Value>>,
    failing: AtomicBool,
    calls: AtomicUsize,
    last_params: Mutex<Option<BTreeMap<String, String>>>,
}

impl MockMetadataSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Respond to `url` with `{"results": rows}`
    pub fn respond(&self, url: &str, rows: Vec<Value>) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.insert(url.to_string(), json!({ "results": rows }));
        }
    }

    /// Fail every call as unreachable
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_params(&self) -> Option<BTreeMap<String, String>> {
        self.last_params.lock().ok().and_then(|p| p.clone())
    }
}

#[async_trait]
impl MetadataSource for MockMetadataSource {
    async fn fetch(&self, url: &str, params: &BTreeMap<String, String>, _timeout: Duration) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_params.lock() {
            *last = Some(params.clone());
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::RemoteUnavailable {
                url: url.to_string(),
                message: "mock failure".to_string(),
            });
        }

        let responses = self.responses.lock().map_err(|_| AppError::Internal {
            message: "mock lock poisoned".to_string(),
        })?;
        Ok(responses
            .get(url)
            .cloned()
            .unwrap_or_else(|| json!({ "results": [] })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_unknown_url_is_empty() {
        let source = MockMetadataSource::new();
        let body = source
            .fetch("http://core/journal/", &BTreeMap::new(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(body, json!({ "results": [] }));
        assert_eq!(source.call_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_failing() {
        let source = MockMetadataSource::new();
        source.set_failing(true);
        let err = source
            .fetch("http://core/journal/", &BTreeMap::new(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::RemoteUnavailable { .. }));
        assert!(!err.is_expected());
    }
}
