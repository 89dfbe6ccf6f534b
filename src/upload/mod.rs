//! Chunked Upload Module
//!
//! Implements large file uploads with:
//! - Idempotent per-index chunk storage in a temp directory per upload
//! - Completion detection on distinct indices
//! - Exactly-once merge into the destination folder
//!
//! Protocol Flow:
//! 1. Client picks an upload id and sends chunks in any order
//! 2. Server stores `<upload_id>_parts/<index>.part` and reports progress
//! 3. The request that completes the set merges the file and gets `complete`
//! 4. Unfinished uploads are reclaimed by the retention sweeper

pub mod assembler;
pub mod session;
pub mod types;

pub use assembler::ChunkAssembler;
pub use session::{MergeFailure, SessionState, UploadSession};
pub use types::*;
