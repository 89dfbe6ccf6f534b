//! Progress Registry
//!
//! In-memory progress for in-flight transfers, keyed by transfer id.
//! One `parking_lot::Mutex` covers every read and write so concurrent chunk
//! handlers never lose updates; readers get a cloned snapshot and only hold
//! the lock for the lookup. Nothing is persisted: the registry lives exactly
//! as long as the `AppState` that owns it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

/// Snapshot of one transfer's progress
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressRecord {
    pub current: u64,
    pub total: u64,
    pub percentage: f64,
    pub filename: String,
    pub last_updated_at: DateTime<Utc>,
}

impl ProgressRecord {
    fn new(current: u64, total: u64, filename: String) -> Self {
        // current never exceeds total for a live transfer
        let current = current.min(total);
        let percentage = if total > 0 {
            current as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        Self {
            current,
            total,
            percentage,
            filename,
            last_updated_at: Utc::now(),
        }
    }
}

/// Thread-safe progress store.
///
/// Records are keyed by upload id alone, across every space. The chunk
/// assembler refuses to open a second live session under an id that is
/// already receiving, so one id never maps to two uploads at once.
#[derive(Clone, Default)]
pub struct ProgressRegistry {
    records: Arc<Mutex<HashMap<String, ProgressRecord>>>,
}

impl ProgressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the progress for `id`
    pub fn set(&self, id: &str, current: u64, total: u64, filename: &str) -> ProgressRecord {
        let record = ProgressRecord::new(current, total, filename.to_string());
        self.records.lock().insert(id.to_string(), record.clone());
        record
    }

    /// Snapshot of the progress for `id`
    pub fn get(&self, id: &str) -> Option<ProgressRecord> {
        self.records.lock().get(id).cloned()
    }

    pub fn remove(&self, id: &str) -> Option<ProgressRecord> {
        self.records.lock().remove(id)
    }

    /// Remove records not updated within `max_age`.
    ///
    /// Returns the number of records removed.
    pub fn sweep(&self, max_age: Duration) -> usize {
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        let now = Utc::now();

        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|_, record| now - record.last_updated_at <= max_age);
        let removed = before - records.len();

        if removed > 0 {
            tracing::debug!(removed = removed, "Swept stale progress records");
        }

        removed
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Drop every record (process shutdown)
    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let registry = ProgressRegistry::new();
        registry.set("up-1", 2, 4, "movie.mkv");

        let record = registry.get("up-1").unwrap();
        assert_eq!(record.current, 2);
        assert_eq!(record.total, 4);
        assert_eq!(record.percentage, 50.0);
        assert_eq!(record.filename, "movie.mkv");
        assert!(registry.get("up-2").is_none());
    }

    #[test]
    fn test_zero_total_percentage() {
        let registry = ProgressRegistry::new();
        let record = registry.set("up-1", 0, 0, "empty");
        assert_eq!(record.percentage, 0.0);
    }

    #[test]
    fn test_current_is_clamped_to_total() {
        let registry = ProgressRegistry::new();
        let record = registry.set("up-1", 7, 5, "f");
        assert_eq!(record.current, 5);
        assert_eq!(record.percentage, 100.0);
    }

    #[test]
    fn test_remove() {
        let registry = ProgressRegistry::new();
        registry.set("up-1", 1, 2, "f");
        assert!(registry.remove("up-1").is_some());
        assert!(registry.remove("up-1").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_sweep_removes_only_stale_records() {
        let registry = ProgressRegistry::new();
        registry.set("old", 1, 2, "f");
        registry.set("fresh", 1, 2, "g");
        registry
            .records
            .lock()
            .get_mut("old")
            .unwrap()
            .last_updated_at = Utc::now() - chrono::Duration::hours(2);

        assert_eq!(registry.sweep(Duration::from_secs(3600)), 1);
        assert!(registry.get("old").is_none());
        assert!(registry.get("fresh").is_some());

        // Idempotent
        assert_eq!(registry.sweep(Duration::from_secs(3600)), 0);
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let registry = ProgressRegistry::new();
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for j in 0..100 {
                        registry.set(&format!("up-{i}"), j, 100, "f");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.len(), 16);
        for i in 0..16 {
            assert_eq!(registry.get(&format!("up-{i}")).unwrap().current, 99);
        }
    }
}
