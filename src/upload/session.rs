//! Upload Session
//!
//! Per-upload bookkeeping owned by the chunk assembler:
//! - Distinct received chunk indices
//! - The Receiving → Merging → Complete state machine
//! - A single merge claim, handed to exactly one caller

use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::error::TransferError;

// ============================================================================
// Merge Outcome
// ============================================================================

/// Why a merge did not produce a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeFailure {
    /// Parts do not line up; the session is dead
    Assembly(String),
    /// Transient disk error; the session goes back to Receiving
    Io(String),
}

impl From<MergeFailure> for TransferError {
    fn from(failure: MergeFailure) -> Self {
        match failure {
            MergeFailure::Assembly(msg) => TransferError::Assembly(msg),
            MergeFailure::Io(msg) => TransferError::Io(std::io::Error::other(msg)),
        }
    }
}

pub type MergeOutcome = std::result::Result<PathBuf, MergeFailure>;

/// Broadcast slot for a merge in progress; `None` until the merger finishes
pub type MergeWatch = watch::Receiver<Option<MergeOutcome>>;

// ============================================================================
// Session State
// ============================================================================

#[derive(Debug, Clone)]
pub enum SessionState {
    /// Accepting chunks
    Receiving,
    /// One caller is concatenating parts
    Merging(MergeWatch),
    /// Final file written; kept so late completers see the same path
    Complete {
        final_path: PathBuf,
        completed_at: DateTime<Utc>,
    },
    /// Assembly invariant violated; parts are kept for diagnosis
    Failed(String),
}

/// What recording a chunk meant for the caller
#[derive(Debug)]
pub enum ChunkObservation {
    /// Stored; more chunks needed
    Accepted { received: u32 },
    /// This caller observed completion first and must merge
    Claimed {
        received: u32,
        notify: watch::Sender<Option<MergeOutcome>>,
    },
    /// Another caller is merging
    Merging(MergeWatch),
    /// Already merged
    Complete(PathBuf),
    Failed(String),
}

// ============================================================================
// Upload Session
// ============================================================================

/// One chunked upload
#[derive(Debug, Clone)]
pub struct UploadSession {
    pub upload_id: String,
    pub total_chunks: u32,
    pub received: BTreeSet<u32>,
    /// Canonical temp directory holding `<index>.part` files
    pub parts_dir: PathBuf,
    /// Canonical folder the merged file is written to
    pub destination_dir: PathBuf,
    pub filename: String,
    pub created_at: DateTime<Utc>,
    pub state: SessionState,
}

impl UploadSession {
    /// Create a session, counting any in-range parts already on disk
    pub fn new(
        upload_id: String,
        total_chunks: u32,
        parts_dir: PathBuf,
        destination_dir: PathBuf,
        filename: String,
        existing_parts: impl IntoIterator<Item = u32>,
    ) -> Self {
        let received = existing_parts
            .into_iter()
            .filter(|index| *index < total_chunks)
            .collect();

        Self {
            upload_id,
            total_chunks,
            received,
            parts_dir,
            destination_dir,
            filename,
            created_at: Utc::now(),
            state: SessionState::Receiving,
        }
    }

    pub fn received_count(&self) -> u32 {
        self.received.len() as u32
    }

    pub fn is_complete(&self) -> bool {
        self.received_count() == self.total_chunks
    }

    /// State as seen by a caller about to write a chunk
    pub fn observe(&self) -> Option<ChunkObservation> {
        match &self.state {
            SessionState::Receiving => None,
            SessionState::Merging(merge_watch) => Some(ChunkObservation::Merging(merge_watch.clone())),
            SessionState::Complete { final_path, .. } => {
                Some(ChunkObservation::Complete(final_path.clone()))
            }
            SessionState::Failed(msg) => Some(ChunkObservation::Failed(msg.clone())),
        }
    }

    /// Record a written chunk and decide whether this caller merges.
    ///
    /// Repeated indices do not change the count. The merge claim is handed
    /// out at most once per Receiving period.
    pub fn record_chunk(&mut self, index: u32) -> ChunkObservation {
        if let Some(observation) = self.observe() {
            return observation;
        }

        self.received.insert(index);
        let received = self.received_count();

        if self.is_complete() {
            let (notify, merge_watch) = watch::channel(None);
            self.state = SessionState::Merging(merge_watch);
            ChunkObservation::Claimed { received, notify }
        } else {
            ChunkObservation::Accepted { received }
        }
    }

    /// Apply the merger's result
    pub fn finish_merge(&mut self, outcome: &MergeOutcome) {
        self.state = match outcome {
            Ok(path) => SessionState::Complete {
                final_path: path.clone(),
                completed_at: Utc::now(),
            },
            Err(MergeFailure::Assembly(msg)) => SessionState::Failed(msg.clone()),
            Err(MergeFailure::Io(_)) => SessionState::Receiving,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(total: u32) -> UploadSession {
        UploadSession::new(
            "up-1".to_string(),
            total,
            PathBuf::from("/data/u/up-1_parts"),
            PathBuf::from("/data/u"),
            "f.bin".to_string(),
            Vec::new(),
        )
    }

    #[test]
    fn test_repeated_index_does_not_count_twice() {
        let mut s = session(3);
        assert!(matches!(s.record_chunk(0), ChunkObservation::Accepted { received: 1 }));
        assert!(matches!(s.record_chunk(0), ChunkObservation::Accepted { received: 1 }));
        assert!(matches!(s.record_chunk(2), ChunkObservation::Accepted { received: 2 }));
        assert_eq!(s.received.iter().copied().collect::<Vec<_>>(), vec![0, 2]);
    }

    #[test]
    fn test_claim_is_handed_out_once() {
        let mut s = session(2);
        s.record_chunk(0);
        assert!(matches!(s.record_chunk(1), ChunkObservation::Claimed { received: 2, .. }));
        assert!(matches!(s.state, SessionState::Merging(_)));
        assert!(matches!(s.record_chunk(1), ChunkObservation::Merging(_)));
        assert!(matches!(s.record_chunk(0), ChunkObservation::Merging(_)));
    }

    #[test]
    fn test_finish_merge_transitions() {
        let mut s = session(1);
        s.record_chunk(0);
        s.finish_merge(&Ok(PathBuf::from("/data/u/f.bin")));
        match s.record_chunk(0) {
            ChunkObservation::Complete(path) => assert_eq!(path, PathBuf::from("/data/u/f.bin")),
            other => panic!("unexpected: {other:?}"),
        }

        let mut s = session(1);
        s.record_chunk(0);
        s.finish_merge(&Err(MergeFailure::Assembly("part 0 missing".into())));
        assert!(matches!(s.record_chunk(0), ChunkObservation::Failed(_)));
    }

    #[test]
    fn test_io_failure_allows_a_new_claim() {
        let mut s = session(1);
        s.record_chunk(0);
        s.finish_merge(&Err(MergeFailure::Io("disk full".into())));
        assert!(matches!(s.record_chunk(0), ChunkObservation::Claimed { .. }));
    }

    #[test]
    fn test_existing_parts_seed_the_session() {
        let s = UploadSession::new(
            "up-1".to_string(),
            3,
            PathBuf::from("/p"),
            PathBuf::from("/d"),
            "f".to_string(),
            vec![0, 2, 7],
        );
        assert_eq!(s.received_count(), 2);
        assert!(!s.received.contains(&7));
    }
}
