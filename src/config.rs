use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::contracts::{AdvanceFormula, AllocatorError};

/// Construction-time settings for a [`SegmentAllocator`](crate::provider::SegmentAllocator).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    /// Name of the provider, used in logs and as the pool id
    pub name: String,
    /// SQLite database file holding the "group" table
    pub db_path: PathBuf,
    /// Number of store connections kept open
    pub pool_size: u16,
    /// Bound on connection checkout and return
    pub pool_timeout: Duration,
    /// How long a connection waits for another connection's write
    pub busy_timeout: Duration,
    /// Arithmetic used to derive the next segment
    pub advance_formula: AdvanceFormula,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            name: "idcenter".into(),
            db_path: PathBuf::from("./data/idcenter.db"),
            pool_size: 8,
            pool_timeout: Duration::from_millis(100),
            busy_timeout: Duration::from_secs(5),
            advance_formula: AdvanceFormula::Contiguous,
        }
    }
}

impl StorageConfig {
    /// Creates a StorageConfig from environment variables.
    ///
    /// Environment variables:
    /// - `IDCENTER_NAME`: Provider name (default: idcenter)
    /// - `IDCENTER_DB_PATH`: Database file (default: ./data/idcenter.db)
    /// - `IDCENTER_POOL_SIZE`: Connections in the pool (default: 8)
    /// - `IDCENTER_POOL_TIMEOUT_MS`: Checkout/return bound in ms (default: 100)
    /// - `IDCENTER_BUSY_TIMEOUT_MS`: SQLite busy wait in ms (default: 5000)
    /// - `IDCENTER_ADVANCE_FORMULA`: `contiguous` or `legacy` (default: contiguous)
    ///
    /// Unset or unparsable values fall back to the default.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`StorageConfig::from_env`] with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let default = Self::default();

        fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
            let raw = lookup(key)?;
            match raw.trim().parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(key, value = %raw, "Ignoring unparsable setting");
                    None
                }
            }
        }

        Self {
            name: lookup("IDCENTER_NAME").unwrap_or(default.name),
            db_path: lookup("IDCENTER_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(default.db_path),
            pool_size: parsed(&lookup, "IDCENTER_POOL_SIZE").unwrap_or(default.pool_size),
            pool_timeout: parsed(&lookup, "IDCENTER_POOL_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(default.pool_timeout),
            busy_timeout: parsed(&lookup, "IDCENTER_BUSY_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(default.busy_timeout),
            advance_formula: parsed(&lookup, "IDCENTER_ADVANCE_FORMULA")
                .unwrap_or(default.advance_formula),
        }
    }

    /// Rejects settings the allocator cannot start with.
    pub fn validate(&self) -> Result<(), AllocatorError> {
        if self.pool_size == 0 {
            return Err(AllocatorError::InvalidArgument(
                "pool_size must be > 0".into(),
            ));
        }
        if self.db_path.as_os_str().is_empty() {
            return Err(AllocatorError::InvalidArgument(
                "db_path must not be empty".into(),
            ));
        }
        Ok(())
    }
}
