//! Two-way sync
//!
//! Clients describe their local files by (path, hash, modified time); the
//! server answers with a verdict per file. Nothing is resolved server side:
//! conflicts are reported and the client decides.

pub mod conflict;
pub mod reconciler;
pub mod types;

pub use conflict::ConflictDetector;
pub use reconciler::{SyncReconciler, DEFAULT_SYNC_CONCURRENCY};
pub use types::*;
