//! Conflict detection
//!
//! Classifies a client's claimed (hash, modified time) against the server's
//! fingerprint. Equal hashes always win; otherwise the timestamps decide,
//! unless they are too close together to be trusted across device clocks.
//! No resolution happens here: callers decide what to do with `Conflict`.

use std::time::Duration;

use chrono::{DateTime, Utc};

use super::types::SyncVerdict;

/// Compares client claims against server fingerprints
#[derive(Debug, Clone, Copy)]
pub struct ConflictDetector {
    threshold: Duration,
}

impl ConflictDetector {
    pub fn new(threshold: Duration) -> Self {
        Self { threshold }
    }

    /// Verdict for a file that exists on the server
    pub fn classify(
        &self,
        server_hash: &str,
        server_modified: DateTime<Utc>,
        client_hash: &str,
        client_modified: DateTime<Utc>,
    ) -> SyncVerdict {
        if server_hash.eq_ignore_ascii_case(client_hash.trim()) {
            return SyncVerdict::InSync;
        }

        let skew = if server_modified >= client_modified {
            server_modified - client_modified
        } else {
            client_modified - server_modified
        };
        let threshold = chrono::Duration::from_std(self.threshold).unwrap_or(chrono::Duration::MAX);

        if skew < threshold {
            SyncVerdict::Conflict
        } else if server_modified > client_modified {
            SyncVerdict::ServerNewer
        } else {
            SyncVerdict::LocalNewer
        }
    }
}

impl Default for ConflictDetector {
    fn default() -> Self {
        Self::new(Duration::from_secs(super::types::DEFAULT_CONFLICT_THRESHOLD_SECS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, m, s).unwrap()
    }

    #[test]
    fn test_equal_hashes_are_in_sync_regardless_of_time() {
        let detector = ConflictDetector::default();
        assert_eq!(
            detector.classify("H1", at(10, 0, 0), "H1", at(9, 0, 0)),
            SyncVerdict::InSync
        );
        assert_eq!(
            detector.classify("abcdef", at(10, 0, 0), "ABCDEF", at(10, 0, 30)),
            SyncVerdict::InSync
        );
    }

    #[test]
    fn test_close_timestamps_conflict() {
        let detector = ConflictDetector::default();
        // 50s apart
        assert_eq!(
            detector.classify("H1", at(10, 0, 0), "H2", at(9, 59, 10)),
            SyncVerdict::Conflict
        );
        assert_eq!(
            detector.classify("H1", at(10, 0, 0), "H2", at(10, 0, 0)),
            SyncVerdict::Conflict
        );
    }

    #[test]
    fn test_server_newer() {
        let detector = ConflictDetector::default();
        assert_eq!(
            detector.classify("H1", at(10, 0, 0), "H2", at(9, 55, 0)),
            SyncVerdict::ServerNewer
        );
    }

    #[test]
    fn test_local_newer() {
        let detector = ConflictDetector::default();
        assert_eq!(
            detector.classify("H1", at(10, 0, 0), "H2", at(10, 5, 0)),
            SyncVerdict::LocalNewer
        );
    }

    #[test]
    fn test_threshold_boundary_is_not_a_conflict() {
        let detector = ConflictDetector::default();
        // Exactly 60s apart is outside the tolerance
        assert_eq!(
            detector.classify("H1", at(10, 0, 0), "H2", at(9, 59, 0)),
            SyncVerdict::ServerNewer
        );
    }

    #[test]
    fn test_custom_threshold() {
        let detector = ConflictDetector::new(Duration::from_secs(600));
        assert_eq!(
            detector.classify("H1", at(10, 0, 0), "H2", at(9, 55, 0)),
            SyncVerdict::Conflict
        );
    }
}
