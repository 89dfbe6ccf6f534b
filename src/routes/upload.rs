//! Upload Routes
//!
//! HTTP endpoints for chunked uploads.
//!
//! Endpoints:
//! - POST /api/v1/spaces/:space/uploads/:upload_id/chunks/:index - Upload a chunk
//! - GET /api/v1/uploads/:upload_id/progress - Get upload progress

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::guard;
use crate::progress::ProgressRecord;
use crate::state::AppState;
use crate::upload::{ChunkUpload, UploadStatus};

// ============================================================================
// Request / Response
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ChunkQuery {
    pub total_chunks: u32,
    pub filename: String,
    /// Destination folder relative to the space ("" for the space root)
    #[serde(default)]
    pub folder: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChunkUploadResponse {
    pub upload_id: String,
    pub status: UploadStatus,
    pub chunks_received: u32,
    pub total_chunks: u32,
    /// Space-relative path of the merged file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_path: Option<String>,
}

// ============================================================================
// Router
// ============================================================================

/// Create the upload router.
///
/// Chunk bodies above `max_chunk_bytes` are rejected with 413 before they
/// are buffered.
pub fn router(max_chunk_bytes: usize) -> Router<AppState> {
    Router::new()
        .route(
            "/spaces/:space/uploads/:upload_id/chunks/:index",
            post(upload_chunk).layer(DefaultBodyLimit::max(max_chunk_bytes)),
        )
        .route("/uploads/:upload_id/progress", get(get_progress))
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/v1/spaces/:space/uploads/:upload_id/chunks/:index
///
/// Store one chunk. The request that completes the upload merges the file
/// and gets `complete`.
async fn upload_chunk(
    State(state): State<AppState>,
    Path((space, upload_id, index)): Path<(String, String, u32)>,
    Query(query): Query<ChunkQuery>,
    body: Bytes,
) -> Result<Json<ChunkUploadResponse>> {
    let root = state.space_root(&space).await?;

    let chunk = ChunkUpload {
        folder: query.folder,
        upload_id: upload_id.clone(),
        chunk_index: index,
        total_chunks: query.total_chunks,
        filename: query.filename,
    };
    let outcome = state.assembler().upload_chunk(&root, chunk, &body).await?;

    Ok(Json(ChunkUploadResponse {
        upload_id,
        status: outcome.status,
        chunks_received: outcome.chunks_received,
        total_chunks: outcome.total_chunks,
        final_path: outcome
            .final_path
            .map(|path| guard::relative_display(&path, &root)),
    }))
}

/// GET /api/v1/uploads/:upload_id/progress
async fn get_progress(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
) -> Result<Json<ProgressRecord>> {
    let record = state.assembler().get_upload_progress(&upload_id)?;
    Ok(Json(record))
}
