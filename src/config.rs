use std::path::PathBuf;
use std::time::Duration;

use crate::engine::{EngineOptions, StatusPolicy};

/// Process settings, read from `HOUNDZ_*` environment variables.
/// Missing or unparseable values fall back to the defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub lock_timeout: Duration,
    /// WAL appends between automatic compactions.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub status_policy: StatusPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            lock_timeout: Duration::from_millis(2000),
            compact_threshold: 1000,
            metrics_port: None,
            status_policy: StatusPolicy::Permissive,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            data_dir: lookup("HOUNDZ_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            lock_timeout: parsed("HOUNDZ_LOCK_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_timeout),
            compact_threshold: parsed("HOUNDZ_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            metrics_port: lookup("HOUNDZ_METRICS_PORT").and_then(|s| s.trim().parse().ok()),
            status_policy: lookup("HOUNDZ_STATUS_POLICY")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.status_policy),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("bookings.wal")
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            lock_timeout: self.lock_timeout,
            status_policy: self.status_policy,
        }
    }
}
