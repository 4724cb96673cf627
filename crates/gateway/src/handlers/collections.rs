//! Collection status handlers

use axum::{
    extract::{Path, State},
    Json,
};
use bibliosync_common::{
    db::models::EntityKind,
    errors::{AppError, Result},
    store::StatusCounts,
};
use serde::Serialize;

use crate::AppState;

/// Processing record counts for one collection
#[derive(Serialize)]
pub struct CollectionStatusResponse {
    pub collection: String,
    pub journals: StatusCounts,
    pub issues: StatusCounts,
    pub articles: StatusCounts,
}

/// Get processing status counts for a collection
pub async fn status(
    State(state): State<AppState>,
    Path(acron): Path<String>,
) -> Result<Json<CollectionStatusResponse>> {
    state
        .services
        .entities
        .find_collection(&acron)
        .await?
        .ok_or_else(|| AppError::CollectionNotFound { acron: acron.clone() })?;

    let procs = &state.services.procs;
    Ok(Json(CollectionStatusResponse {
        journals: procs.status_counts(&acron, EntityKind::Journal).await?,
        issues: procs.status_counts(&acron, EntityKind::Issue).await?,
        articles: procs.status_counts(&acron, EntityKind::Article).await?,
        collection: acron,
    }))
}
