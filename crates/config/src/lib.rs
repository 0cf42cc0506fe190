//! # Config — RiptideKV configuration loading
//!
//! Loads a [`RiptideConfig`] from an optional TOML file, then overlays
//! `RIPTIDE_*` environment variables on top — the same naming convention the
//! `cli` crate used for its ad hoc `env_or` lookups, now backed by a typed
//! struct so every tunable named across the engine, lock manager, Raft node,
//! and 2PC coordinator has one home.
//!
//! Nothing here depends on `engine`/`txn`/`raft`/`tpc` — those crates accept
//! the plain values (paths, durations, strategy names) produced here and
//! parse/validate them themselves, so `config` stays a leaf dependency.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors loading or parsing a [`RiptideConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the config file from disk.
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The config file's TOML was malformed.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    /// A `RIPTIDE_*` env override could not be parsed as the expected type.
    #[error("invalid value for {var}: {value:?}")]
    InvalidEnvValue { var: &'static str, value: String },
}

/// Leveled/tiered/size-tiered/time-window compaction tuning knobs.
///
/// Mirrors `engine::compaction::CompactionTuning` field-for-field; kept as a
/// separate plain-data struct here so `config` never depends on `engine`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionTuningConfig {
    pub level_base_bytes: u64,
    pub level_size_multiplier: u64,
    pub l0_file_count_trigger: usize,
    pub max_files_per_tier: usize,
    pub size_tiered_min_threshold: usize,
    pub size_tiered_ratio: f64,
    pub time_window_max_files: usize,
    pub time_window_millis: u64,
}

impl Default for CompactionTuningConfig {
    fn default() -> Self {
        Self {
            level_base_bytes: 4 * 1024 * 1024,
            level_size_multiplier: 10,
            l0_file_count_trigger: 4,
            max_files_per_tier: 4,
            size_tiered_min_threshold: 4,
            size_tiered_ratio: 0.5,
            time_window_max_files: 4,
            time_window_millis: 60_000,
        }
    }
}

/// Lock manager timeout and deadlock-detector cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub default_timeout_ms: u64,
    pub deadlock_detector_interval_ms: u64,
    pub default_strategy: String,
    /// Rolling window size (completed txns) the hybrid manager tracks.
    pub hybrid_window_size: usize,
    /// Conflict-rate threshold (0.0-1.0) above which the hybrid manager
    /// switches its default strategy to pessimistic.
    pub hybrid_conflict_threshold: f64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 5_000,
            deadlock_detector_interval_ms: 250,
            default_strategy: "PESSIMISTIC".to_string(),
            hybrid_window_size: 64,
            hybrid_conflict_threshold: 0.20,
        }
    }
}

/// Raft election/heartbeat/client-request timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaftConfig {
    pub election_timeout_min_ms: u64,
    pub election_timeout_max_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub client_request_timeout_ms: u64,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            election_timeout_min_ms: 150,
            election_timeout_max_ms: 300,
            heartbeat_interval_ms: 50,
            client_request_timeout_ms: 2_000,
        }
    }
}

/// 2PC coordinator phase timeouts and retry budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TwoPcConfig {
    pub prepare_timeout_ms: u64,
    pub commit_timeout_ms: u64,
    pub max_retry_attempts: u32,
}

impl Default for TwoPcConfig {
    fn default() -> Self {
        Self {
            prepare_timeout_ms: 3_000,
            commit_timeout_ms: 3_000,
            max_retry_attempts: 5,
        }
    }
}

/// Top-level RiptideKV configuration: engine storage knobs plus every
/// tunable named across the transaction core, Raft node, and 2PC
/// coordinator (spec §4).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiptideConfig {
    pub data_dir: PathBuf,
    pub flush_threshold_bytes: usize,
    pub wal_sync: bool,
    pub block_cache_capacity: usize,
    /// One of `LEVELED | TIERED | SIZE_TIERED | TIME_WINDOW`; parsed by the
    /// `engine` crate's `CompactionKind: FromStr`.
    pub compaction_kind: String,
    pub compaction: CompactionTuningConfig,
    pub lock: LockConfig,
    /// One of `READ_COMMITTED | REPEATABLE_READ | SERIALIZABLE`.
    pub isolation_level_default: String,
    pub raft: RaftConfig,
    pub tpc: TwoPcConfig,
}

impl Default for RiptideConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            flush_threshold_bytes: 4 * 1024 * 1024,
            wal_sync: true,
            block_cache_capacity: 1024,
            compaction_kind: "LEVELED".to_string(),
            compaction: CompactionTuningConfig::default(),
            lock: LockConfig::default(),
            isolation_level_default: "REPEATABLE_READ".to_string(),
            raft: RaftConfig::default(),
            tpc: TwoPcConfig::default(),
        }
    }
}

impl RiptideConfig {
    /// Loads config from `path` if given and present, falling back to
    /// defaults, then applies `RIPTIDE_*` environment overrides on top.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut cfg = match path {
            Some(p) if p.exists() => {
                let text = std::fs::read_to_string(p).map_err(|source| ConfigError::Io {
                    path: p.to_path_buf(),
                    source,
                })?;
                toml::from_str(&text)?
            }
            _ => Self::default(),
        };
        cfg.apply_env_overrides()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(v) = env_str("RIPTIDE_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = env_parsed("RIPTIDE_FLUSH_KB")? {
            let kb: usize = v;
            self.flush_threshold_bytes = kb * 1024;
        }
        if let Some(v) = env_parsed("RIPTIDE_WAL_SYNC")? {
            self.wal_sync = v;
        }
        if let Some(v) = env_parsed("RIPTIDE_BLOCK_CACHE_CAPACITY")? {
            self.block_cache_capacity = v;
        }
        if let Some(v) = env_str("RIPTIDE_COMPACTION_KIND") {
            self.compaction_kind = v;
        }
        if let Some(v) = env_parsed("RIPTIDE_L0_TRIGGER")? {
            self.compaction.l0_file_count_trigger = v;
        }
        if let Some(v) = env_str("RIPTIDE_ISOLATION_LEVEL") {
            self.isolation_level_default = v;
        }
        if let Some(v) = env_parsed("RIPTIDE_LOCK_TIMEOUT_MS")? {
            self.lock.default_timeout_ms = v;
        }
        if let Some(v) = env_parsed("RIPTIDE_RAFT_HEARTBEAT_MS")? {
            self.raft.heartbeat_interval_ms = v;
        }
        if let Some(v) = env_parsed("RIPTIDE_TPC_PREPARE_TIMEOUT_MS")? {
            self.tpc.prepare_timeout_ms = v;
        }
        Ok(())
    }
}

fn env_str(var: &'static str) -> Option<String> {
    std::env::var(var).ok()
}

fn env_parsed<T: std::str::FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(var) {
        Ok(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnvValue { var, value }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let cfg = RiptideConfig::default();
        let text = toml::to_string(&cfg).unwrap();
        let back: RiptideConfig = toml::from_str(&text).unwrap();
        assert_eq!(cfg, back);
    }

    #[test]
    fn load_with_no_path_returns_defaults() {
        std::env::remove_var("RIPTIDE_FLUSH_KB");
        let cfg = RiptideConfig::load(None).unwrap();
        assert_eq!(cfg.flush_threshold_bytes, 4 * 1024 * 1024);
    }

    #[test]
    fn load_reads_a_partial_toml_file_and_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("riptide.toml");
        std::fs::write(&path, "data_dir = \"/tmp/riptide\"\n").unwrap();

        let cfg = RiptideConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.data_dir, PathBuf::from("/tmp/riptide"));
        assert_eq!(cfg.wal_sync, true);
    }

    #[test]
    fn env_override_wins_over_file_and_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("riptide.toml");
        std::fs::write(&path, "").unwrap();

        std::env::set_var("RIPTIDE_FLUSH_KB", "256");
        let cfg = RiptideConfig::load(Some(&path)).unwrap();
        std::env::remove_var("RIPTIDE_FLUSH_KB");

        assert_eq!(cfg.flush_threshold_bytes, 256 * 1024);
    }

    #[test]
    fn invalid_env_override_is_rejected() {
        std::env::set_var("RIPTIDE_WAL_SYNC", "not-a-bool");
        let result = RiptideConfig::load(None);
        std::env::remove_var("RIPTIDE_WAL_SYNC");
        assert!(result.is_err());
    }
}
