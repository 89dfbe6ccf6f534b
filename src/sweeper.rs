//! Retention Sweeper
//!
//! Periodic background task that reclaims abandoned uploads: chunk temp
//! directories older than the chunk max age are deleted along with their
//! sessions, and progress records (plus completion records) older than the
//! progress max age are dropped. Each cycle is idempotent.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use walkdir::WalkDir;

use crate::error::{Result, TransferError};
use crate::guard;
use crate::progress::ProgressRegistry;
use crate::upload::{is_parts_dir_name, ChunkAssembler};

/// Counts from one sweep cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub chunks_cleaned: usize,
    pub progress_cleaned: usize,
}

#[derive(Clone)]
pub struct RetentionSweeper {
    data_root: PathBuf,
    assembler: ChunkAssembler,
    progress: ProgressRegistry,
    chunk_max_age: Duration,
    progress_max_age: Duration,
    interval: Duration,
}

impl RetentionSweeper {
    pub fn new(data_root: impl Into<PathBuf>, assembler: ChunkAssembler) -> Self {
        let progress = assembler.progress_registry().clone();
        Self {
            data_root: data_root.into(),
            assembler,
            progress,
            chunk_max_age: Duration::from_secs(24 * 3600),
            progress_max_age: Duration::from_secs(3600),
            interval: Duration::from_secs(6 * 3600),
        }
    }

    pub fn with_chunk_max_age(mut self, max_age: Duration) -> Self {
        self.chunk_max_age = max_age;
        self
    }

    pub fn with_progress_max_age(mut self, max_age: Duration) -> Self {
        self.progress_max_age = max_age;
        self
    }

    /// Zero is ignored: `tokio::time::interval` requires a non-zero period
    pub fn with_interval(mut self, interval: Duration) -> Self {
        if interval.is_zero() {
            tracing::warn!(interval_secs = self.interval.as_secs(), "Ignoring zero sweep interval");
        } else {
            self.interval = interval;
        }
        self
    }

    /// Run one cleanup cycle
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let data_root = self.data_root.clone();
        let max_age = self.chunk_max_age;
        let stale = tokio::task::spawn_blocking(move || find_stale_parts_dirs(&data_root, max_age))
            .await
            .map_err(|e| TransferError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}"))))??;

        let mut chunks_cleaned = 0;
        for dir in stale {
            if !self.assembler.abandon(&dir) {
                tracing::debug!(path = %dir.display(), "Skipping temp directory of an active merge");
                continue;
            }
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => chunks_cleaned += 1,
                // Finished or reclaimed since the scan
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %dir.display(), error = %e, "Failed to remove stale chunk directory");
                }
            }
        }

        let progress_cleaned = self.progress.sweep(self.progress_max_age);
        let pruned = self.assembler.prune_completed(self.progress_max_age);

        let report = SweepReport {
            chunks_cleaned,
            progress_cleaned,
        };
        tracing::info!(
            chunks_cleaned = report.chunks_cleaned,
            progress_cleaned = report.progress_cleaned,
            completed_pruned = pruned,
            "Retention sweep finished"
        );
        Ok(report)
    }

    /// Start the periodic task. The first cycle runs immediately.
    pub fn start(self) -> SweeperHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep_once().await {
                            tracing::warn!(error = %e, "Retention sweep failed");
                        }
                    }
                    _ = &mut stop_rx => {
                        tracing::info!("Retention sweeper stopped");
                        break;
                    }
                }
            }
        });

        SweeperHandle { stop_tx, task }
    }
}

/// Owns the running sweeper task
pub struct SweeperHandle {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the task and wait for an in-flight cycle to finish
    pub async fn shutdown(self) {
        let _ = self.stop_tx.send(());
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Retention sweeper task ended abnormally");
        }
    }
}

fn find_stale_parts_dirs(data_root: &Path, max_age: Duration) -> Result<Vec<PathBuf>> {
    let root = guard::canonical_root(data_root)?;
    let now = SystemTime::now();
    let mut stale = Vec::new();

    let mut walker = WalkDir::new(&root).min_depth(1).into_iter();
    while let Some(entry) = walker.next() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "Error walking data directory");
                continue;
            }
        };

        if !entry.file_type().is_dir() {
            continue;
        }
        let is_parts_dir = entry.file_name().to_str().is_some_and(is_parts_dir_name);
        if !is_parts_dir {
            continue;
        }
        walker.skip_current_dir();

        let modified = match entry.metadata().map_err(std::io::Error::from).and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) => {
                tracing::warn!(path = %entry.path().display(), error = %e, "Cannot read chunk directory age");
                continue;
            }
        };
        // A clock step backwards makes the directory look fresh
        let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
        if age > max_age {
            stale.push(entry.into_path());
        }
    }

    Ok(stale)
}
