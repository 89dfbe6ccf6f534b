//! Sync types for two-way file synchronization

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TransferError};

/// Timestamps closer than this cannot be ordered reliably across devices
pub const DEFAULT_CONFLICT_THRESHOLD_SECS: u64 = 60;

/// Classification of a client's claimed file state against the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncVerdict {
    InSync,
    LocalOnly,
    Conflict,
    LocalNewer,
    ServerNewer,
}

/// One file as the client sees it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncCheckEntry {
    pub path: String,
    #[serde(rename = "local_hash")]
    pub client_hash: String,
    /// RFC 3339 timestamp
    #[serde(rename = "local_modified")]
    pub client_modified: String,
}

/// Verdict for one entry of a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCheckResult {
    pub path: String,
    pub status: SyncVerdict,
    pub server_hash: Option<String>,
    pub server_modified: Option<DateTime<Utc>>,
}

/// Kind of a listed entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Folder,
}

/// One entry of a full listing; folders carry no hash or size
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListedEntry {
    pub path: String,
    pub hash: Option<String>,
    pub size: Option<u64>,
    pub modified_at: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: EntryKind,
}

/// Full listing of a subtree
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub files: Vec<ListedEntry>,
    pub total_files: u64,
    pub total_size: u64,
}

/// Parse a client timestamp.
///
/// Accepts RFC 3339 (`Z` or numeric offset). A timestamp without an offset
/// is taken as UTC.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|_| TransferError::InvalidInput(format!("invalid timestamp: {value}")))
}
