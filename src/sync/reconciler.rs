//! Sync Reconciler
//!
//! Server side of two-way sync: single-file fingerprints, batch verdicts,
//! full subtree listings and deletes propagated from clients. Every path goes
//! through the path guard first.
//!
//! Reads are not transactional with concurrent writers; each result is a
//! point-in-time view of the file it describes.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use walkdir::WalkDir;

use crate::error::{Result, TransferError};
use crate::fingerprint::{self, FileFingerprint, HashAlgorithm};
use crate::guard;
use crate::upload::is_parts_dir_name;

use super::conflict::ConflictDetector;
use super::types::{
    parse_timestamp, EntryKind, ListedEntry, Listing, SyncCheckEntry, SyncCheckResult, SyncVerdict,
};

/// Default number of batch entries fingerprinted at once
pub const DEFAULT_SYNC_CONCURRENCY: usize = 8;

#[derive(Debug, Clone)]
pub struct SyncReconciler {
    algorithm: HashAlgorithm,
    detector: ConflictDetector,
    concurrency: usize,
}

impl SyncReconciler {
    pub fn new(algorithm: HashAlgorithm, detector: ConflictDetector) -> Self {
        Self {
            algorithm,
            detector,
            concurrency: DEFAULT_SYNC_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    // ========================================================================
    // Single File
    // ========================================================================

    /// Fingerprint one file below `root`
    pub async fn compute_fingerprint(&self, root: &Path, relative_path: &str) -> Result<FileFingerprint> {
        let resolved = guard::resolve_async(relative_path, root).await?;
        fingerprint::fingerprint_async(resolved, self.algorithm).await
    }

    /// Delete a file the client deleted locally
    pub async fn delete_synced_file(&self, root: &Path, relative_path: &str) -> Result<PathBuf> {
        let resolved = guard::resolve_async(relative_path, root).await?;

        let metadata = match tokio::fs::metadata(&resolved).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TransferError::NotFound(format!("file not found: {}", relative_path.trim())));
            }
            Err(e) => return Err(e.into()),
        };
        if !metadata.is_file() {
            return Err(TransferError::InvalidInput(format!(
                "path is not a file: {}",
                relative_path.trim()
            )));
        }

        tokio::fs::remove_file(&resolved).await?;
        tracing::info!(path = %relative_path.trim(), "Deleted synced file");
        Ok(resolved)
    }

    // ========================================================================
    // Batch Check
    // ========================================================================

    /// Verdicts for a batch of client entries, in request order.
    ///
    /// Entries that fail the path guard, point at directories, are malformed,
    /// or hit an IO error are left out; they never fail the batch.
    pub async fn batch_sync_check(&self, root: &Path, entries: &[SyncCheckEntry]) -> Result<Vec<SyncCheckResult>> {
        let root = guard::canonical_root(root)?;

        let results = stream::iter(entries.to_vec())
            .map(|entry| {
                let root = root.clone();
                async move {
                    match self.check_entry(&root, &entry).await {
                        Ok(result) => result,
                        Err(e) => {
                            tracing::warn!(path = %entry.path, error = %e, "Skipping sync entry");
                            None
                        }
                    }
                }
            })
            .buffered(self.concurrency)
            .collect::<Vec<_>>()
            .await;

        Ok(results.into_iter().flatten().collect())
    }

    /// `Ok(None)` means the entry is a directory and is skipped
    async fn check_entry(&self, canonical_root: &Path, entry: &SyncCheckEntry) -> Result<Option<SyncCheckResult>> {
        let path = entry.path.trim().to_string();
        let resolved = {
            let path = path.clone();
            let root = canonical_root.to_path_buf();
            tokio::task::spawn_blocking(move || guard::resolve_within(&path, &root))
                .await
                .map_err(|e| TransferError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}"))))??
        };

        let local_only = || SyncCheckResult {
            path: path.clone(),
            status: SyncVerdict::LocalOnly,
            server_hash: None,
            server_modified: None,
        };

        match tokio::fs::metadata(&resolved).await {
            Ok(metadata) if metadata.is_dir() => return Ok(None),
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Some(local_only())),
            Err(e) => return Err(e.into()),
        }

        let server = match fingerprint::fingerprint_async(resolved, self.algorithm).await {
            Ok(server) => server,
            // Deleted between the stat and the read
            Err(TransferError::NotFound(_)) => return Ok(Some(local_only())),
            Err(e) => return Err(e),
        };

        let client_modified = parse_timestamp(&entry.client_modified)?;
        let status = self.detector.classify(
            &server.hash,
            server.modified_at,
            &entry.client_hash,
            client_modified,
        );

        Ok(Some(SyncCheckResult {
            path,
            status,
            server_hash: Some(server.hash),
            server_modified: Some(server.modified_at),
        }))
    }

    // ========================================================================
    // Full Listing
    // ========================================================================

    /// Every file (with fingerprint) and folder below `relative_folder`
    pub async fn list_all_fingerprints(&self, root: &Path, relative_folder: &str) -> Result<Listing> {
        let root = root.to_path_buf();
        let folder = relative_folder.to_string();
        let algorithm = self.algorithm;

        tokio::task::spawn_blocking(move || list_blocking(&root, &folder, algorithm))
            .await
            .map_err(|e| TransferError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}"))))?
    }
}

fn list_blocking(root: &Path, relative_folder: &str, algorithm: HashAlgorithm) -> Result<Listing> {
    let canonical_root = guard::canonical_root(root)?;
    let start = guard::resolve_within(relative_folder, &canonical_root)?;

    let metadata = match std::fs::metadata(&start) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(TransferError::NotFound(format!("folder not found: {}", relative_folder.trim())));
        }
        Err(e) => return Err(e.into()),
    };
    if !metadata.is_dir() {
        return Err(TransferError::InvalidInput(format!(
            "path is not a folder: {}",
            relative_folder.trim()
        )));
    }

    let mut listing = Listing::default();
    let walker = WalkDir::new(&start)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        // Upload temp directories are not user content
        .filter_entry(|e| {
            !(e.file_type().is_dir() && e.file_name().to_str().is_some_and(is_parts_dir_name))
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "Error walking directory");
                continue;
            }
        };

        let relative = guard::relative_display(entry.path(), &canonical_root);
        // Symlinks are followed only if they stay inside the root
        let resolved = match guard::resolve_within(&relative, &canonical_root) {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::warn!(path = %relative, error = %e, "Skipping entry");
                continue;
            }
        };

        match listed_entry(&resolved, relative, algorithm) {
            Ok(item) => {
                if let Some(size) = item.size {
                    listing.total_files += 1;
                    listing.total_size += size;
                }
                listing.files.push(item);
            }
            Err(e) => {
                tracing::warn!(path = %entry.path().display(), error = %e, "Error accessing entry");
            }
        }
    }

    Ok(listing)
}

fn listed_entry(resolved: &Path, relative: String, algorithm: HashAlgorithm) -> Result<ListedEntry> {
    let metadata = std::fs::metadata(resolved)?;

    if metadata.is_dir() {
        return Ok(ListedEntry {
            path: relative,
            hash: None,
            size: None,
            modified_at: DateTime::<Utc>::from(metadata.modified()?),
            kind: EntryKind::Folder,
        });
    }

    let fp = fingerprint::fingerprint(resolved, algorithm)?;
    Ok(ListedEntry {
        path: relative,
        hash: Some(fp.hash),
        size: Some(fp.size),
        modified_at: fp.modified_at,
        kind: EntryKind::File,
    })
}
