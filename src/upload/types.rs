//! Upload types for chunked transfers

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TransferError};

// ============================================================================
// Constants
// ============================================================================

/// Suffix of the per-upload temp directory: `<upload_id>_parts`
pub const PARTS_DIR_SUFFIX: &str = "_parts";

/// Extension of a stored part: `<index>.part`
pub const PART_EXTENSION: &str = "part";

/// Default maximum chunk payload: 64MB
pub const DEFAULT_MAX_CHUNK_BYTES: usize = 64 * 1024 * 1024;

/// Maximum upload id length
pub const MAX_UPLOAD_ID_LEN: usize = 128;

/// Maximum filename length in bytes
pub const MAX_FILENAME_LEN: usize = 255;

/// Upper bound on `name(n).ext` probing when the destination exists
pub const MAX_NAME_SUFFIX: u32 = 10_000;

// ============================================================================
// Chunk Upload Types
// ============================================================================

/// One incoming chunk
#[derive(Debug, Clone)]
pub struct ChunkUpload {
    /// Folder relative to the caller's root ("" for the root itself)
    pub folder: String,
    pub upload_id: String,
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub filename: String,
}

impl ChunkUpload {
    /// Check everything that can be checked without touching the disk
    pub fn validate(&self, data_len: usize, max_chunk_bytes: usize) -> Result<()> {
        validate_upload_id(&self.upload_id)?;
        validate_filename(&self.filename)?;

        if self.total_chunks == 0 {
            return Err(TransferError::InvalidInput(
                "total_chunks must be at least 1".to_string(),
            ));
        }
        if self.chunk_index >= self.total_chunks {
            return Err(TransferError::InvalidInput(format!(
                "chunk index out of bounds: {} (total: {})",
                self.chunk_index, self.total_chunks
            )));
        }
        if data_len > max_chunk_bytes {
            return Err(TransferError::InvalidInput(format!(
                "chunk too large: {} bytes (max: {})",
                data_len, max_chunk_bytes
            )));
        }

        Ok(())
    }

    /// Root-relative path of this upload's temp directory
    pub fn parts_dir_relative(&self) -> String {
        let name = parts_dir_name(&self.upload_id);
        let folder = self.folder.trim().trim_end_matches('/');
        if folder.is_empty() {
            name
        } else {
            format!("{folder}/{name}")
        }
    }
}

/// Outcome of a chunk upload as seen by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    /// Chunk stored, upload not finished by this request
    ChunkAccepted,
    /// This request merged the final file
    Complete,
}

/// Result of [`super::ChunkAssembler::upload_chunk`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkOutcome {
    pub status: UploadStatus,
    pub chunks_received: u32,
    pub total_chunks: u32,
    /// Set when the upload has been (or is being) merged
    pub final_path: Option<PathBuf>,
}

// ============================================================================
// Validation
// ============================================================================

/// Upload ids become directory names, so keep them boring
pub fn validate_upload_id(upload_id: &str) -> Result<()> {
    if upload_id.is_empty() || upload_id.len() > MAX_UPLOAD_ID_LEN {
        return Err(TransferError::InvalidInput(format!(
            "upload id must be 1-{} characters",
            MAX_UPLOAD_ID_LEN
        )));
    }
    if !upload_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(TransferError::InvalidInput(format!(
            "invalid upload id: {upload_id}"
        )));
    }
    Ok(())
}

/// Letters, digits, `_`, `-`, `.` and space; no path separators
pub fn validate_filename(filename: &str) -> Result<()> {
    if filename.is_empty() {
        return Err(TransferError::InvalidInput("no file selected".to_string()));
    }
    if filename.len() > MAX_FILENAME_LEN {
        return Err(TransferError::InvalidInput(format!(
            "filename is too long, maximum length is {} characters",
            MAX_FILENAME_LEN
        )));
    }
    if filename == "." || filename == ".." {
        return Err(TransferError::InvalidInput(format!("invalid filename: {filename}")));
    }
    if !filename
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ' '))
    {
        return Err(TransferError::InvalidInput(format!("invalid filename: {filename}")));
    }
    Ok(())
}

// ============================================================================
// On-disk Naming
// ============================================================================

pub fn parts_dir_name(upload_id: &str) -> String {
    format!("{upload_id}{PARTS_DIR_SUFFIX}")
}

pub fn part_file_name(index: u32) -> String {
    format!("{index}.{PART_EXTENSION}")
}

/// Parse `<index>.part` back into an index
pub fn parse_part_file_name(name: &str) -> Option<u32> {
    name.strip_suffix(PART_EXTENSION)?
        .strip_suffix('.')?
        .parse()
        .ok()
}

/// Whether a directory name follows the temp directory pattern
pub fn is_parts_dir_name(name: &str) -> bool {
    name.strip_suffix(PARTS_DIR_SUFFIX)
        .map(|id| validate_upload_id(id).is_ok())
        .unwrap_or(false)
}

/// Candidate name for the n-th collision: `report(2).pdf`
pub fn numbered_filename(filename: &str, n: u32) -> String {
    match filename.rfind('.') {
        Some(dot) if dot > 0 => format!("{}({}){}", &filename[..dot], n, &filename[dot..]),
        _ => format!("{filename}({n})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(index: u32, total: u32) -> ChunkUpload {
        ChunkUpload {
            folder: "photos".to_string(),
            upload_id: "abc-123".to_string(),
            chunk_index: index,
            total_chunks: total,
            filename: "holiday.jpg".to_string(),
        }
    }

    #[test]
    fn test_validate_ok() {
        assert!(chunk(0, 1).validate(10, 100).is_ok());
        assert!(chunk(3, 4).validate(100, 100).is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_indices() {
        assert!(matches!(
            chunk(4, 4).validate(1, 100),
            Err(TransferError::InvalidInput(_))
        ));
        assert!(matches!(
            chunk(0, 0).validate(1, 100),
            Err(TransferError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_validate_rejects_oversized_chunk() {
        assert!(chunk(0, 1).validate(101, 100).is_err());
    }

    #[test]
    fn test_upload_id_validation() {
        assert!(validate_upload_id("a1_B-2").is_ok());
        assert!(validate_upload_id("").is_err());
        assert!(validate_upload_id("../x").is_err());
        assert!(validate_upload_id("a/b").is_err());
        assert!(validate_upload_id(&"x".repeat(129)).is_err());
    }

    #[test]
    fn test_filename_validation() {
        assert!(validate_filename("My Report-v2.final.pdf").is_ok());
        assert!(validate_filename("..").is_err());
        assert!(validate_filename("a/b.txt").is_err());
        assert!(validate_filename("a\\b.txt").is_err());
        assert!(validate_filename(&"x".repeat(256)).is_err());
    }

    #[test]
    fn test_parts_dir_relative() {
        assert_eq!(chunk(0, 1).parts_dir_relative(), "photos/abc-123_parts");
        let mut root_level = chunk(0, 1);
        root_level.folder = String::new();
        assert_eq!(root_level.parts_dir_relative(), "abc-123_parts");
    }

    #[test]
    fn test_part_names() {
        assert_eq!(part_file_name(12), "12.part");
        assert_eq!(parse_part_file_name("12.part"), Some(12));
        assert_eq!(parse_part_file_name(".12.abc.tmp"), None);
        assert_eq!(parse_part_file_name("x.part"), None);
        assert!(is_parts_dir_name("abc_parts"));
        assert!(!is_parts_dir_name("_parts"));
        assert!(!is_parts_dir_name("holiday"));
    }

    #[test]
    fn test_numbered_filename() {
        assert_eq!(numbered_filename("notes.txt", 1), "notes(1).txt");
        assert_eq!(numbered_filename("archive.tar.gz", 2), "archive.tar(2).gz");
        assert_eq!(numbered_filename("README", 3), "README(3)");
        assert_eq!(numbered_filename(".env", 1), ".env(1)");
    }
}
