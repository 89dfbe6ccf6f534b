//! Muda Server Library
//!
//! File transfer and two-way sync core for a self-hosted home file server.
//! The binary in main.rs wires these pieces to the network; tests and
//! benchmarks use them directly.
//!
//! # Modules
//!
//! - `guard`: Containment check for every caller-supplied path
//! - `fingerprint`: Streaming content hasher (xxh3 / sha256)
//! - `progress`: In-memory progress registry
//! - `upload`: Chunk assembler with exactly-once merge
//! - `sync`: Verdicts, listings and deletes for two-way sync
//! - `sweeper`: Periodic retention cleanup

pub mod config;
pub mod error;
pub mod fingerprint;
pub mod guard;
pub mod progress;
pub mod routes;
pub mod state;
pub mod sweeper;
pub mod sync;
pub mod upload;

use axum::{routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use state::AppState;

/// Build the full HTTP application
pub fn app(state: AppState) -> Router {
    // Build CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let max_chunk_bytes = state.config().storage.max_chunk_bytes;

    Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/api/v1/health", get(routes::health::health_check))
        .nest("/api/v1", routes::upload::router(max_chunk_bytes).merge(routes::sync::router()))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
