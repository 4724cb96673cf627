//! Liveness and readiness probes

use crate::AppState;
use axum::{extract::State, http::StatusCode, Json};
use bibliosync_common::Repository;
use serde::Serialize;
use std::time::Instant;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub status: &'static str,
    pub database: DependencyStatus,
    /// "queue" when article tasks go to SQS, "in_process" otherwise
    pub article_dispatch: &'static str,
}

#[derive(Serialize)]
pub struct DependencyStatus {
    pub up: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

async fn probe_database(repository: &Repository) -> DependencyStatus {
    let start = Instant::now();
    match repository.ping().await {
        Ok(()) => DependencyStatus {
            up: true,
            latency_ms: Some(u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)),
            error: None,
        },
        Err(e) => DependencyStatus {
            up: false,
            latency_ms: None,
            error: Some(e.to_string()),
        },
    }
}

/// Process is up
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: bibliosync_common::VERSION,
    })
}

/// Ready when the database answers; 503 otherwise
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let database = probe_database(&state.repository).await;
    let code = if database.up {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(ReadyResponse {
            status: if database.up { "ready" } else { "not_ready" },
            database,
            article_dispatch: if state.queue.is_some() { "queue" } else { "in_process" },
        }),
    )
}
