//! Application state management

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Config;
use crate::error::{Result, TransferError};
use crate::guard;
use crate::progress::ProgressRegistry;
use crate::sync::{ConflictDetector, SyncReconciler};
use crate::upload::ChunkAssembler;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    assembler: ChunkAssembler,
    reconciler: SyncReconciler,
}

impl AppState {
    /// Create a new application state with an empty progress registry
    pub fn new(config: Config) -> Self {
        let progress = ProgressRegistry::new();
        let assembler = ChunkAssembler::with_max_chunk_bytes(progress, config.storage.max_chunk_bytes);
        let reconciler = SyncReconciler::new(
            config.sync.hash_algorithm,
            ConflictDetector::new(config.sync.conflict_threshold()),
        )
        .with_concurrency(config.sync.list_concurrency);

        Self {
            inner: Arc::new(AppStateInner {
                config,
                assembler,
                reconciler,
            }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the chunk assembler
    pub fn assembler(&self) -> &ChunkAssembler {
        &self.inner.assembler
    }

    /// Get the progress registry
    pub fn progress(&self) -> &ProgressRegistry {
        self.inner.assembler.progress_registry()
    }

    /// Get the sync reconciler
    pub fn reconciler(&self) -> &SyncReconciler {
        &self.inner.reconciler
    }

    /// Canonical root directory of a space under the data directory
    pub async fn space_root(&self, space: &str) -> Result<PathBuf> {
        if space.trim().is_empty() {
            return Err(TransferError::InvalidInput("space name is required".to_string()));
        }

        let data_dir = &self.inner.config.storage.data_dir;
        let resolved = guard::resolve_async(space, data_dir).await?;

        // The data directory itself is not a space
        if resolved == guard::canonical_root(data_dir)? {
            return Err(TransferError::InvalidInput(format!("invalid space name: {space}")));
        }

        match tokio::fs::metadata(&resolved).await {
            Ok(metadata) if metadata.is_dir() => Ok(resolved),
            Ok(_) => Err(TransferError::NotFound(format!("space not found: {space}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(TransferError::NotFound(format!("space not found: {space}")))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn state_for(dir: &TempDir) -> AppState {
        let mut config = Config::default();
        config.storage.data_dir = dir.path().to_path_buf();
        AppState::new(config)
    }

    #[tokio::test]
    async fn test_space_root() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join("alice")).unwrap();
        let state = state_for(&temp);

        let root = state.space_root("alice").await.unwrap();
        assert_eq!(root, temp.path().canonicalize().unwrap().join("alice"));

        assert!(matches!(state.space_root("bob").await, Err(TransferError::NotFound(_))));
        assert!(matches!(state.space_root("").await, Err(TransferError::InvalidInput(_))));
        assert!(matches!(state.space_root("alice/..").await, Err(TransferError::InvalidInput(_))));
        assert!(matches!(state.space_root("..").await, Err(TransferError::AccessDenied(_))));
    }
}
