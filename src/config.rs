//! Configuration management for Muda Server

use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::fingerprint::HashAlgorithm;
use crate::sync::{DEFAULT_CONFLICT_THRESHOLD_SECS, DEFAULT_SYNC_CONCURRENCY};
use crate::upload::DEFAULT_MAX_CHUNK_BYTES;

const SECS_PER_HOUR: u64 = 3600;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub sync: SyncConfig,
    pub cleanup: CleanupConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Parent of every space root
    pub data_dir: PathBuf,
    pub max_chunk_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    pub hash_algorithm: HashAlgorithm,
    pub conflict_threshold_secs: u64,
    pub list_concurrency: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CleanupConfig {
    pub interval_hours: u64,
    pub chunk_max_age_hours: u64,
    pub progress_max_age_secs: u64,
}

impl SyncConfig {
    pub fn conflict_threshold(&self) -> Duration {
        Duration::from_secs(self.conflict_threshold_secs)
    }
}

impl CleanupConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_hours.saturating_mul(SECS_PER_HOUR))
    }

    pub fn chunk_max_age(&self) -> Duration {
        Duration::from_secs(self.chunk_max_age_hours.saturating_mul(SECS_PER_HOUR))
    }

    pub fn progress_max_age(&self) -> Duration {
        Duration::from_secs(self.progress_max_age_secs)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid HASH_ALGORITHM: {0}")]
    HashAlgorithm(String),
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            storage: StorageConfig {
                data_dir: PathBuf::from("./data"),
                max_chunk_bytes: DEFAULT_MAX_CHUNK_BYTES,
            },
            sync: SyncConfig {
                hash_algorithm: HashAlgorithm::default(),
                conflict_threshold_secs: DEFAULT_CONFLICT_THRESHOLD_SECS,
                list_concurrency: DEFAULT_SYNC_CONCURRENCY,
            },
            cleanup: CleanupConfig {
                interval_hours: 6,
                chunk_max_age_hours: 24,
                progress_max_age_secs: 3600,
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary variable source; unset keys use defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let hash_algorithm = match lookup("HASH_ALGORITHM") {
            Some(value) => HashAlgorithm::from_str(value.trim()).map_err(ConfigError::HashAlgorithm)?,
            None => defaults.sync.hash_algorithm,
        };

        Ok(Config {
            server: ServerConfig {
                host: lookup("SERVER_HOST").unwrap_or(defaults.server.host),
                port: parse_or(&lookup, "SERVER_PORT", defaults.server.port),
            },
            storage: StorageConfig {
                data_dir: lookup("DATA_DIR").map(PathBuf::from).unwrap_or(defaults.storage.data_dir),
                max_chunk_bytes: parse_or(&lookup, "MAX_CHUNK_BYTES", defaults.storage.max_chunk_bytes),
            },
            sync: SyncConfig {
                hash_algorithm,
                conflict_threshold_secs: parse_or(
                    &lookup,
                    "CONFLICT_THRESHOLD_SECS",
                    defaults.sync.conflict_threshold_secs,
                ),
                list_concurrency: parse_or(&lookup, "LIST_CONCURRENCY", defaults.sync.list_concurrency),
            },
            cleanup: CleanupConfig {
                interval_hours: parse_hours(&lookup, "CLEANUP_INTERVAL_HOURS", defaults.cleanup.interval_hours),
                chunk_max_age_hours: parse_hours(
                    &lookup,
                    "CHUNK_MAX_AGE_HOURS",
                    defaults.cleanup.chunk_max_age_hours,
                ),
                progress_max_age_secs: parse_positive(
                    &lookup,
                    "PROGRESS_MAX_AGE_SECS",
                    defaults.cleanup.progress_max_age_secs,
                ),
            },
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + std::fmt::Display + Copy,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key = key, value = %raw, default = %default, "Invalid config value, using default");
            default
        }),
    }
}

/// Like `parse_or`, but zero falls back to the default too
fn parse_positive<F>(lookup: &F, key: &str, default: u64) -> u64
where
    F: Fn(&str) -> Option<String>,
{
    match parse_or(lookup, key, default) {
        0 => {
            tracing::warn!(key = key, default = default, "Config value must be positive, using default");
            default
        }
        value => value,
    }
}

/// A positive hour count that still fits in seconds
fn parse_hours<F>(lookup: &F, key: &str, default: u64) -> u64
where
    F: Fn(&str) -> Option<String>,
{
    let hours = parse_positive(lookup, key, default);
    if hours.checked_mul(SECS_PER_HOUR).is_none() {
        tracing::warn!(key = key, value = hours, default = default, "Config value too large, using default");
        return default;
    }
    hours
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.storage.data_dir, PathBuf::from("./data"));
        assert_eq!(config.sync.hash_algorithm, HashAlgorithm::Xxh3);
        assert_eq!(config.sync.conflict_threshold(), Duration::from_secs(60));
        assert_eq!(config.cleanup.interval(), Duration::from_secs(6 * 3600));
        assert_eq!(config.cleanup.chunk_max_age(), Duration::from_secs(24 * 3600));
        assert_eq!(config.cleanup.progress_max_age(), Duration::from_secs(3600));
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            ("SERVER_PORT", "8080"),
            ("DATA_DIR", "/srv/muda"),
            ("HASH_ALGORITHM", "SHA256"),
            ("CONFLICT_THRESHOLD_SECS", "120"),
            ("LIST_CONCURRENCY", "2"),
        ]))
        .unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.storage.data_dir, PathBuf::from("/srv/muda"));
        assert_eq!(config.sync.hash_algorithm, HashAlgorithm::Sha256);
        assert_eq!(config.sync.conflict_threshold_secs, 120);
        assert_eq!(config.sync.list_concurrency, 2);
    }

    #[test]
    fn test_invalid_number_falls_back() {
        let config = Config::from_lookup(lookup_from(&[("SERVER_PORT", "http"), ("CHUNK_MAX_AGE_HOURS", "-1")]))
            .unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.cleanup.chunk_max_age_hours, 24);
    }

    #[test]
    fn test_zero_and_overflowing_cleanup_values_fall_back() {
        let config = Config::from_lookup(lookup_from(&[
            ("CLEANUP_INTERVAL_HOURS", "0"),
            ("CHUNK_MAX_AGE_HOURS", "18446744073709551615"),
            ("PROGRESS_MAX_AGE_SECS", "0"),
        ]))
        .unwrap();

        assert_eq!(config.cleanup.interval(), Duration::from_secs(6 * 3600));
        assert_eq!(config.cleanup.chunk_max_age(), Duration::from_secs(24 * 3600));
        assert_eq!(config.cleanup.progress_max_age(), Duration::from_secs(3600));
    }

    #[test]
    fn test_unknown_algorithm_is_error() {
        let result = Config::from_lookup(lookup_from(&[("HASH_ALGORITHM", "md5")]));
        assert!(matches!(result, Err(ConfigError::HashAlgorithm(_))));
    }
}
