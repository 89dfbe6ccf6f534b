//! Sync Routes
//!
//! HTTP endpoints for two-way file sync.
//!
//! Endpoints:
//! - GET /api/v1/spaces/:space/sync/file-hash?file_path= - Fingerprint one file
//! - POST /api/v1/spaces/:space/sync/check - Verdicts for a batch of local files
//! - GET /api/v1/spaces/:space/sync/list-all?folder_path= - Fingerprint a subtree
//! - DELETE /api/v1/spaces/:space/sync/delete?file_path= - Propagate a local delete

use axum::{
    extract::{Path, Query, State},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::fingerprint::HashAlgorithm;
use crate::state::AppState;
use crate::sync::{Listing, SyncCheckEntry, SyncCheckResult};

// ============================================================================
// Request / Response
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct FileQuery {
    pub file_path: String,
}

#[derive(Debug, Deserialize)]
pub struct FolderQuery {
    #[serde(default)]
    pub folder_path: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FileHashResponse {
    pub path: String,
    pub hash: String,
    pub algorithm: HashAlgorithm,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SyncCheckRequest {
    pub files: Vec<SyncCheckEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SyncCheckResponse {
    pub results: Vec<SyncCheckResult>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub path: String,
}

// ============================================================================
// Router
// ============================================================================

/// Create the sync router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/spaces/:space/sync/file-hash", get(file_hash))
        .route("/spaces/:space/sync/check", post(check))
        .route("/spaces/:space/sync/list-all", get(list_all))
        .route("/spaces/:space/sync/delete", delete(delete_file))
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/v1/spaces/:space/sync/file-hash
async fn file_hash(
    State(state): State<AppState>,
    Path(space): Path<String>,
    Query(query): Query<FileQuery>,
) -> Result<Json<FileHashResponse>> {
    let root = state.space_root(&space).await?;
    let fp = state.reconciler().compute_fingerprint(&root, &query.file_path).await?;

    Ok(Json(FileHashResponse {
        path: query.file_path.trim().to_string(),
        hash: fp.hash,
        algorithm: fp.algorithm,
        size: fp.size,
        modified_at: fp.modified_at,
    }))
}

/// POST /api/v1/spaces/:space/sync/check
///
/// Entries that cannot be checked are left out of the results.
async fn check(
    State(state): State<AppState>,
    Path(space): Path<String>,
    Json(request): Json<SyncCheckRequest>,
) -> Result<Json<SyncCheckResponse>> {
    let root = state.space_root(&space).await?;
    let results = state.reconciler().batch_sync_check(&root, &request.files).await?;

    tracing::debug!(
        space = %space,
        requested = request.files.len(),
        answered = results.len(),
        "Sync check"
    );

    Ok(Json(SyncCheckResponse { results }))
}

/// GET /api/v1/spaces/:space/sync/list-all
async fn list_all(
    State(state): State<AppState>,
    Path(space): Path<String>,
    Query(query): Query<FolderQuery>,
) -> Result<Json<Listing>> {
    let root = state.space_root(&space).await?;
    let listing = state
        .reconciler()
        .list_all_fingerprints(&root, &query.folder_path)
        .await?;
    Ok(Json(listing))
}

/// DELETE /api/v1/spaces/:space/sync/delete
async fn delete_file(
    State(state): State<AppState>,
    Path(space): Path<String>,
    Query(query): Query<FileQuery>,
) -> Result<Json<DeleteResponse>> {
    let root = state.space_root(&space).await?;
    state.reconciler().delete_synced_file(&root, &query.file_path).await?;

    Ok(Json(DeleteResponse {
        success: true,
        path: query.file_path.trim().to_string(),
    }))
}
