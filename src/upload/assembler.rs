//! Chunk Assembler
//!
//! Receives chunks into `<folder>/<upload_id>_parts/<index>.part`, tracks the
//! distinct indices per upload, and merges the parts into the destination
//! file exactly once.
//!
//! Parts are written to a temporary sibling and renamed into place, so a
//! merge running concurrently with a duplicate send never reads a torn part.
//! The merge itself runs on a spawned task: a client hanging up mid-merge
//! must not leave the session stuck in Merging.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::{Result, TransferError};
use crate::guard;
use crate::progress::{ProgressRecord, ProgressRegistry};

use super::session::{ChunkObservation, MergeFailure, MergeOutcome, MergeWatch, SessionState, UploadSession};
use super::types::{
    numbered_filename, parse_part_file_name, part_file_name, ChunkOutcome, ChunkUpload,
    UploadStatus, DEFAULT_MAX_CHUNK_BYTES, MAX_NAME_SUFFIX,
};

// ============================================================================
// Chunk Assembler
// ============================================================================

/// Owns every upload session of the process
#[derive(Clone)]
pub struct ChunkAssembler {
    inner: Arc<ChunkAssemblerInner>,
}

struct ChunkAssemblerInner {
    /// Sessions keyed by canonical temp directory
    sessions: Mutex<HashMap<PathBuf, UploadSession>>,

    progress: ProgressRegistry,

    max_chunk_bytes: usize,
}

impl ChunkAssembler {
    pub fn new(progress: ProgressRegistry) -> Self {
        Self::with_max_chunk_bytes(progress, DEFAULT_MAX_CHUNK_BYTES)
    }

    pub fn with_max_chunk_bytes(progress: ProgressRegistry, max_chunk_bytes: usize) -> Self {
        Self {
            inner: Arc::new(ChunkAssemblerInner {
                sessions: Mutex::new(HashMap::new()),
                progress,
                max_chunk_bytes,
            }),
        }
    }

    pub fn progress_registry(&self) -> &ProgressRegistry {
        &self.inner.progress
    }

    // ========================================================================
    // Chunk Upload
    // ========================================================================

    /// Store one chunk; merge if it completes the upload.
    ///
    /// Exactly one caller per upload gets `UploadStatus::Complete`. Callers
    /// that observe completion while someone else merges wait for that merge
    /// and get the same final path with `UploadStatus::ChunkAccepted`.
    pub async fn upload_chunk(&self, root: &Path, chunk: ChunkUpload, data: &[u8]) -> Result<ChunkOutcome> {
        chunk.validate(data.len(), self.inner.max_chunk_bytes)?;

        let destination_dir = guard::resolve_async(&chunk.folder, root).await?;
        let parts_dir = guard::resolve_async(&chunk.parts_dir_relative(), root).await?;

        // Finished or merging sessions never get their parts touched again
        if let Some(observation) = self.observe_existing(&parts_dir, &chunk)? {
            return self.settle(&chunk, &parts_dir, observation, false).await;
        }

        if !tokio::fs::try_exists(&destination_dir).await? {
            return Err(TransferError::NotFound(format!("folder not found: {}", chunk.folder)));
        }

        // The session exists before any byte is written, so a request that
        // disagrees with it is refused without touching its parts
        let known = self.inner.sessions.lock().contains_key(&parts_dir);
        if !known {
            let existing_parts = scan_parts(&parts_dir).await?;
            self.open_session(&parts_dir, &destination_dir, &chunk, existing_parts)?;
        }

        if let Err(e) = write_part(&parts_dir, chunk.chunk_index, data).await {
            // The temp directory may have been removed by a merge that just finished
            let late = self.inner.sessions.lock().get(&parts_dir).and_then(|s| s.observe());
            return match late {
                Some(observation) => self.settle(&chunk, &parts_dir, observation, false).await,
                None => Err(e),
            };
        }

        let observation = {
            let mut sessions = self.inner.sessions.lock();
            // Reclaimed by the sweeper between the write and now
            let session = sessions.entry(parts_dir.clone()).or_insert_with(|| {
                UploadSession::new(
                    chunk.upload_id.clone(),
                    chunk.total_chunks,
                    parts_dir.clone(),
                    destination_dir.clone(),
                    chunk.filename.clone(),
                    [chunk.chunk_index],
                )
            });

            let observation = session.record_chunk(chunk.chunk_index);

            // Progress is written under the session lock so a slower handler
            // can never move the counter backwards
            if let ChunkObservation::Accepted { received } | ChunkObservation::Claimed { received, .. } =
                &observation
            {
                self.inner.progress.set(
                    &chunk.upload_id,
                    u64::from(*received),
                    u64::from(session.total_chunks),
                    &session.filename,
                );
            }

            observation
        };

        tracing::debug!(
            upload_id = %chunk.upload_id,
            chunk_index = chunk.chunk_index,
            total_chunks = chunk.total_chunks,
            "Chunk stored"
        );

        self.settle(&chunk, &parts_dir, observation, true).await
    }

    /// Observation for an existing session, after checking the request
    /// agrees with it. `None` when there is no session or it is receiving.
    fn observe_existing(&self, parts_dir: &Path, chunk: &ChunkUpload) -> Result<Option<ChunkObservation>> {
        let sessions = self.inner.sessions.lock();
        match sessions.get(parts_dir) {
            Some(session) => {
                check_total_chunks(session, chunk)?;
                Ok(session.observe())
            }
            None => Ok(None),
        }
    }

    /// Create the session for a temp directory unless a concurrent request
    /// already did
    fn open_session(
        &self,
        parts_dir: &Path,
        destination_dir: &Path,
        chunk: &ChunkUpload,
        existing_parts: BTreeSet<u32>,
    ) -> Result<()> {
        let mut sessions = self.inner.sessions.lock();

        if let Some(session) = sessions.get(parts_dir) {
            return check_total_chunks(session, chunk);
        }

        // Progress is keyed by upload id, so a live id cannot be reused
        // for a different folder or space
        let in_use = sessions.values().any(|s| {
            s.upload_id == chunk.upload_id && !matches!(s.state, SessionState::Complete { .. })
        });
        if in_use {
            return Err(TransferError::InvalidInput(format!(
                "upload id already in use: {}",
                chunk.upload_id
            )));
        }

        tracing::info!(
            upload_id = %chunk.upload_id,
            total_chunks = chunk.total_chunks,
            recovered_parts = existing_parts.len(),
            "Created upload session"
        );
        sessions.insert(
            parts_dir.to_path_buf(),
            UploadSession::new(
                chunk.upload_id.clone(),
                chunk.total_chunks,
                parts_dir.to_path_buf(),
                destination_dir.to_path_buf(),
                chunk.filename.clone(),
                existing_parts,
            ),
        );
        Ok(())
    }

    /// Turn a session observation into the caller's outcome
    async fn settle(
        &self,
        chunk: &ChunkUpload,
        parts_dir: &Path,
        observation: ChunkObservation,
        wrote_part: bool,
    ) -> Result<ChunkOutcome> {
        match observation {
            ChunkObservation::Accepted { received } => Ok(ChunkOutcome {
                status: UploadStatus::ChunkAccepted,
                chunks_received: received,
                total_chunks: chunk.total_chunks,
                final_path: None,
            }),
            ChunkObservation::Claimed { notify, .. } => {
                let final_path = self.run_merge(parts_dir.to_path_buf(), notify).await?;

                Ok(ChunkOutcome {
                    status: UploadStatus::Complete,
                    chunks_received: chunk.total_chunks,
                    total_chunks: chunk.total_chunks,
                    final_path: Some(final_path),
                })
            }
            ChunkObservation::Merging(merge_watch) => {
                let final_path = wait_for_merge(merge_watch).await?;
                if wrote_part {
                    remove_straggler_parts(parts_dir).await;
                }
                Ok(already_merged(chunk, final_path))
            }
            ChunkObservation::Complete(final_path) => {
                if wrote_part {
                    remove_straggler_parts(parts_dir).await;
                }
                Ok(already_merged(chunk, final_path))
            }
            ChunkObservation::Failed(msg) => Err(TransferError::Assembly(format!(
                "upload {} failed earlier ({}); retry with a new upload id",
                chunk.upload_id, msg
            ))),
        }
    }

    /// Merge on a detached task, record the result on the session and wake
    /// every waiter
    async fn run_merge(
        &self,
        parts_dir: PathBuf,
        notify: watch::Sender<Option<MergeOutcome>>,
    ) -> MergeOutcome {
        let snapshot = self.inner.sessions.lock().get(&parts_dir).cloned();
        let Some(session) = snapshot else {
            let outcome = Err(MergeFailure::Io("session vanished before merge".to_string()));
            let _ = notify.send(Some(outcome.clone()));
            return outcome;
        };

        let this = self.clone();
        let task = tokio::spawn(async move {
            tracing::info!(
                upload_id = %session.upload_id,
                filename = %session.filename,
                chunks = session.total_chunks,
                "Assembling file from chunks"
            );

            let outcome = merge_parts(
                &session.parts_dir,
                &session.destination_dir,
                &session.filename,
                session.total_chunks,
            )
            .await;

            {
                let mut sessions = this.inner.sessions.lock();
                if let Some(s) = sessions.get_mut(&session.parts_dir) {
                    s.finish_merge(&outcome);
                }
            }

            match &outcome {
                Ok(path) => {
                    this.inner.progress.remove(&session.upload_id);
                    tracing::info!(
                        upload_id = %session.upload_id,
                        path = %path.display(),
                        "Upload complete"
                    );
                }
                Err(MergeFailure::Assembly(msg)) => {
                    tracing::error!(
                        upload_id = %session.upload_id,
                        error = %msg,
                        "Assembly failed, parts kept for diagnosis"
                    );
                }
                Err(MergeFailure::Io(msg)) => {
                    tracing::warn!(upload_id = %session.upload_id, error = %msg, "Merge IO failure");
                }
            }

            // Waiters may all be gone; that is fine
            let _ = notify.send(Some(outcome.clone()));
            outcome
        });

        match task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                let outcome = Err(MergeFailure::Io(format!("merge task failed: {e}")));
                if let Some(s) = self.inner.sessions.lock().get_mut(&parts_dir) {
                    s.finish_merge(&outcome);
                }
                outcome
            }
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Progress for an upload id
    pub fn get_upload_progress(&self, upload_id: &str) -> Result<ProgressRecord> {
        self.inner
            .progress
            .get(upload_id)
            .ok_or_else(|| TransferError::NotFound(format!("upload not found: {upload_id}")))
    }

    pub fn session_count(&self) -> usize {
        self.inner.sessions.lock().len()
    }

    // ========================================================================
    // Retention
    // ========================================================================

    /// Forget the session behind a stale temp directory.
    ///
    /// Returns `false` when the directory belongs to a merge in progress and
    /// must not be deleted.
    pub fn abandon(&self, parts_dir: &Path) -> bool {
        let mut sessions = self.inner.sessions.lock();
        let forget = match sessions.get(parts_dir).map(|s| &s.state) {
            None => return true,
            Some(SessionState::Merging(_)) => return false,
            // Keep the completion record; only the stray directory goes
            Some(SessionState::Complete { .. }) => false,
            Some(SessionState::Receiving) | Some(SessionState::Failed(_)) => true,
        };

        if forget {
            if let Some(session) = sessions.remove(parts_dir) {
                self.inner.progress.remove(&session.upload_id);
                tracing::info!(
                    upload_id = %session.upload_id,
                    started_at = %session.created_at,
                    "Abandoned upload session"
                );
            }
        }
        true
    }

    /// Drop completion records older than `max_age`
    pub fn prune_completed(&self, max_age: Duration) -> usize {
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        let now = Utc::now();

        let mut sessions = self.inner.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, session| match &session.state {
            SessionState::Complete { completed_at, .. } => now - *completed_at <= max_age,
            _ => true,
        });
        before - sessions.len()
    }
}

// ============================================================================
// Disk Operations
// ============================================================================

fn part_path(parts_dir: &Path, index: u32) -> PathBuf {
    parts_dir.join(part_file_name(index))
}

/// Write a part via temp file + rename so readers see old or new bytes only
async fn write_part(parts_dir: &Path, index: u32, data: &[u8]) -> Result<()> {
    tokio::fs::create_dir_all(parts_dir).await?;

    let tmp = parts_dir.join(format!(".{}.{}.tmp", index, Uuid::new_v4().simple()));
    if let Err(e) = tokio::fs::write(&tmp, data).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    if let Err(e) = tokio::fs::rename(&tmp, part_path(parts_dir, index)).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

/// Indices of the parts already present in a temp directory
async fn scan_parts(parts_dir: &Path) -> Result<BTreeSet<u32>> {
    let mut found = BTreeSet::new();
    let mut entries = match tokio::fs::read_dir(parts_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(found),
        Err(e) => return Err(e.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
        if let Some(index) = entry.file_name().to_str().and_then(parse_part_file_name) {
            found.insert(index);
        }
    }
    Ok(found)
}

/// Create the destination with create-new semantics, picking `name(n).ext`
/// when the name is taken
async fn create_destination(destination_dir: &Path, filename: &str) -> std::io::Result<(PathBuf, tokio::fs::File)> {
    for n in 0..=MAX_NAME_SUFFIX {
        let name = if n == 0 {
            filename.to_string()
        } else {
            numbered_filename(filename, n)
        };
        let path = destination_dir.join(&name);

        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AlreadyExists,
        format!("no free name for {filename}"),
    ))
}

/// Concatenate parts 0..total in order into a new destination file.
///
/// The temp directory is removed only after the destination is fully
/// written and synced.
async fn merge_parts(parts_dir: &Path, destination_dir: &Path, filename: &str, total_chunks: u32) -> MergeOutcome {
    let io = |e: std::io::Error| MergeFailure::Io(e.to_string());

    for index in 0..total_chunks {
        if !tokio::fs::try_exists(part_path(parts_dir, index)).await.map_err(io)? {
            return Err(MergeFailure::Assembly(format!(
                "part {index} of {total_chunks} is missing"
            )));
        }
    }

    let (final_path, file) = create_destination(destination_dir, filename).await.map_err(io)?;

    let written = async {
        let mut writer = BufWriter::new(file);
        for index in 0..total_chunks {
            let mut part = match tokio::fs::File::open(part_path(parts_dir, index)).await {
                Ok(part) => part,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(MergeFailure::Assembly(format!(
                        "part {index} disappeared during merge"
                    )));
                }
                Err(e) => return Err(io(e)),
            };
            tokio::io::copy(&mut part, &mut writer).await.map_err(io)?;
        }
        writer.flush().await.map_err(io)?;
        writer.into_inner().sync_all().await.map_err(io)?;
        Ok(())
    }
    .await;

    if let Err(failure) = written {
        let _ = tokio::fs::remove_file(&final_path).await;
        return Err(failure);
    }

    if let Err(e) = tokio::fs::remove_dir_all(parts_dir).await {
        tracing::warn!(path = %parts_dir.display(), error = %e, "Failed to remove temp parts");
    }

    Ok(final_path)
}

async fn wait_for_merge(mut merge_watch: MergeWatch) -> Result<PathBuf> {
    let outcome = merge_watch
        .wait_for(|outcome| outcome.is_some())
        .await
        .map_err(|_| TransferError::Io(std::io::Error::other("merge aborted")))?
        .clone();

    match outcome {
        Some(Ok(path)) => Ok(path),
        Some(Err(failure)) => Err(failure.into()),
        None => Err(TransferError::Io(std::io::Error::other("merge aborted"))),
    }
}

/// A duplicate send recreated the temp directory after the merge removed it
async fn remove_straggler_parts(parts_dir: &Path) {
    match tokio::fs::remove_dir_all(parts_dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::debug!(path = %parts_dir.display(), error = %e, "Failed to remove straggler parts"),
    }
}

fn check_total_chunks(session: &UploadSession, chunk: &ChunkUpload) -> Result<()> {
    if session.total_chunks != chunk.total_chunks {
        return Err(TransferError::InvalidInput(format!(
            "total_chunks changed from {} to {}",
            session.total_chunks, chunk.total_chunks
        )));
    }
    Ok(())
}

fn already_merged(chunk: &ChunkUpload, final_path: PathBuf) -> ChunkOutcome {
    ChunkOutcome {
        status: UploadStatus::ChunkAccepted,
        chunks_received: chunk.total_chunks,
        total_chunks: chunk.total_chunks,
        final_path: Some(final_path),
    }
}
