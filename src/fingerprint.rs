//! Content Hasher
//!
//! Streams a file through a digest in fixed-size reads and captures its size
//! and modified time from the same open handle. Memory use does not depend on
//! file size.
//!
//! Consistency is best-effort: a writer modifying the file while it is being
//! read can produce a fingerprint that matches neither the old nor the new
//! contents. Fingerprints are never cached; every call reads the bytes again.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use xxhash_rust::xxh3::Xxh3;

use crate::error::{Result, TransferError};

/// Read size for hashing: 8KB
pub const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Digest used for fingerprints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// XXH3 128-bit, fast and non-cryptographic
    #[default]
    Xxh3,
    /// SHA-256 for integrity-sensitive use
    Sha256,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Xxh3 => "xxh3",
            Self::Sha256 => "sha256",
        }
    }

    /// Length of the hex digest produced by this algorithm
    pub fn hex_len(&self) -> usize {
        match self {
            Self::Xxh3 => 32,
            Self::Sha256 => 64,
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "xxh3" => Ok(Self::Xxh3),
            "sha256" => Ok(Self::Sha256),
            other => Err(format!("unknown hash algorithm: {other}")),
        }
    }
}

/// Hash, size and modified time of a file captured in one read
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileFingerprint {
    pub path: PathBuf,
    pub hash: String,
    pub algorithm: HashAlgorithm,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
}

enum Hasher {
    Xxh3(Box<Xxh3>),
    Sha256(Sha256),
}

impl Hasher {
    fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Xxh3 => Self::Xxh3(Box::new(Xxh3::new())),
            HashAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Xxh3(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
        }
    }

    fn finish(self) -> String {
        match self {
            Self::Xxh3(h) => format!("{:032x}", h.digest128()),
            Self::Sha256(h) => hex::encode(h.finalize()),
        }
    }
}

/// Hash an in-memory buffer
pub fn hash_bytes(data: &[u8], algorithm: HashAlgorithm) -> String {
    let mut hasher = Hasher::new(algorithm);
    hasher.update(data);
    hasher.finish()
}

/// Fingerprint a file. The path must already have passed the path guard.
pub fn fingerprint(path: &Path, algorithm: HashAlgorithm) -> Result<FileFingerprint> {
    let mut file = File::open(path).map_err(|e| not_found_or_io(e, path))?;
    let metadata = file.metadata()?;
    if !metadata.is_file() {
        return Err(TransferError::InvalidInput(format!(
            "path is not a file: {}",
            path.display()
        )));
    }

    let mut hasher = Hasher::new(algorithm);
    let mut buffer = vec![0u8; READ_CHUNK_SIZE];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(FileFingerprint {
        path: path.to_path_buf(),
        hash: hasher.finish(),
        algorithm,
        size: metadata.len(),
        modified_at: DateTime::<Utc>::from(metadata.modified()?),
    })
}

/// Async variant of [`fingerprint`] running on the blocking pool
pub async fn fingerprint_async(path: PathBuf, algorithm: HashAlgorithm) -> Result<FileFingerprint> {
    tokio::task::spawn_blocking(move || fingerprint(&path, algorithm))
        .await
        .map_err(|e| TransferError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}"))))?
}

fn not_found_or_io(e: std::io::Error, path: &Path) -> TransferError {
    if e.kind() == std::io::ErrorKind::NotFound {
        TransferError::NotFound(format!("file not found: {}", path.display()))
    } else {
        TransferError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_same_content_same_hash() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a.bin");
        let b = temp.path().join("b.bin");
        std::fs::write(&a, b"Hello, World!").unwrap();
        std::fs::write(&b, b"Hello, World!").unwrap();

        for algorithm in [HashAlgorithm::Xxh3, HashAlgorithm::Sha256] {
            let fa = fingerprint(&a, algorithm).unwrap();
            let fb = fingerprint(&b, algorithm).unwrap();
            assert_eq!(fa.hash, fb.hash);
            assert_eq!(fa.hash.len(), algorithm.hex_len());
            assert_eq!(fa.size, 13);
        }
    }

    #[test]
    fn test_different_content_different_hash() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a.bin");
        let b = temp.path().join("b.bin");
        std::fs::write(&a, b"Hello, World!").unwrap();
        std::fs::write(&b, b"Hello, World?").unwrap();

        let fa = fingerprint(&a, HashAlgorithm::Xxh3).unwrap();
        let fb = fingerprint(&b, HashAlgorithm::Xxh3).unwrap();
        assert_ne!(fa.hash, fb.hash);
    }

    #[test]
    fn test_streaming_matches_in_memory_hash() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("big.bin");
        // Spans several read chunks with a ragged tail
        let data: Vec<u8> = (0..(READ_CHUNK_SIZE * 3 + 123)).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &data).unwrap();

        for algorithm in [HashAlgorithm::Xxh3, HashAlgorithm::Sha256] {
            let fp = fingerprint(&path, algorithm).unwrap();
            assert_eq!(fp.hash, hash_bytes(&data, algorithm));
            assert_eq!(fp.size, data.len() as u64);
        }
    }

    #[test]
    fn test_known_sha256() {
        assert_eq!(
            hash_bytes(b"abc", HashAlgorithm::Sha256),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_missing_file() {
        let temp = TempDir::new().unwrap();
        let result = fingerprint(&temp.path().join("nope"), HashAlgorithm::Xxh3);
        assert!(matches!(result, Err(TransferError::NotFound(_))));
    }

    #[test]
    fn test_directory_is_rejected() {
        let temp = TempDir::new().unwrap();
        let result = fingerprint(temp.path(), HashAlgorithm::Xxh3);
        assert!(matches!(result, Err(TransferError::InvalidInput(_))));
    }

    #[test]
    fn test_algorithm_parsing() {
        assert_eq!("XXH3".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Xxh3);
        assert_eq!("sha256".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha256);
        assert!("md5".parse::<HashAlgorithm>().is_err());
    }
}
