//! Failure ledger
//!
//! Append-only record of unexpected failures. Writers never see an error:
//! a ledger that cannot persist an entry logs it instead.

use crate::auth::Actor;
use crate::errors::AppError;
use crate::metrics;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Mutex;
use tracing::error;

/// One unexpected failure with its diagnostic context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureEntry {
    pub operation: String,
    pub user_id: i64,
    pub username: String,
    pub collection: String,
    pub pid: Option<String>,
    /// Override flags in effect
    pub flags: Map<String, Value>,
    pub exception_type: String,
    pub exception_summary: String,
}

impl FailureEntry {
    pub fn new(operation: &str, actor: &Actor, collection: &str) -> Self {
        Self {
            operation: operation.to_string(),
            user_id: actor.user_id,
            username: actor.username.clone(),
            collection: collection.to_string(),
            pid: None,
            flags: Map::new(),
            exception_type: String::new(),
            exception_summary: String::new(),
        }
    }

    pub fn pid(mut self, pid: impl Into<String>) -> Self {
        self.pid = Some(pid.into());
        self
    }

    pub fn flag(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.flags.insert(name.to_string(), value.into());
        self
    }

    pub fn flags(mut self, flags: Map<String, Value>) -> Self {
        self.flags.extend(flags);
        self
    }

    pub fn error(mut self, err: &AppError) -> Self {
        self.exception_type = err.type_name();
        self.exception_summary = err.to_string();
        self
    }
}

/// Sink for unexpected failures
#[async_trait]
pub trait FailureLedger: Send + Sync {
    /// Persist the entry; never fails
    async fn record(&self, entry: FailureEntry);
}

/// Log and count an entry; every ledger calls this first
pub(crate) fn trace_entry(entry: &FailureEntry) {
    metrics::record_failure(&entry.operation);
    let flags = Value::Object(entry.flags.clone());
    error!(
        operation = %entry.operation,
        collection = %entry.collection,
        pid = entry.pid.as_deref().unwrap_or(""),
        user = %entry.username,
        flags = %flags,
        error_type = %entry.exception_type,
        error = %entry.exception_summary,
        "Unexpected failure recorded"
    );
}

/// In-process ledger used by tests and dry runs
#[derive(Default)]
pub struct MemoryLedger {
    entries: Mutex<Vec<FailureEntry>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<FailureEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl FailureLedger for MemoryLedger {
    async fn record(&self, entry: FailureEntry) {
        trace_entry(&entry);
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_entry_carries_context() {
        let ledger = MemoryLedger::new();
        let err = AppError::RemoteUnavailable {
            url: "http://core/api/journal/".into(),
            message: "connection refused".into(),
        };
        ledger
            .record(
                FailureEntry::new("migrate_journal", &Actor::new(7, "ops"), "scl")
                    .pid("0001-0001")
                    .flag("force_update", true)
                    .flag("migrate_issues", false)
                    .error(&err),
            )
            .await;

        let entries = ledger.entries();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.operation, "migrate_journal");
        assert_eq!(entry.collection, "scl");
        assert_eq!(entry.pid.as_deref(), Some("0001-0001"));
        assert_eq!(entry.user_id, 7);
        assert_eq!(entry.flags["force_update"], Value::Bool(true));
        assert_eq!(entry.exception_type, "RemoteUnavailable");
        assert!(entry.exception_summary.contains("connection refused"));
    }
}
