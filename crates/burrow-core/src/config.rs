//! Configuration management for Burrow
//!
//! Provides presets for durable and scratch deployments and `with_*`
//! builder methods for custom configurations.

use std::path::PathBuf;

use crate::error::{BurrowError, BurrowResult};

/// Default query window size when `limit` is not given.
pub const DEFAULT_QUERY_SIZE_LIMIT: usize = 50;

/// Burrow configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Window size applied by `find`/`read_all` when no limit is given
    pub query_size_limit: usize,
    /// Root directory for the filesystem driver
    pub data_dir: PathBuf,
    /// Sync every log append to persistent storage
    pub durable_writes: bool,
    /// Log segment rotation threshold (bytes)
    pub log_rotation_bytes: u64,
    /// Maximum key size in bytes
    pub max_key_size: usize,
    /// Maximum encoded document size in bytes
    pub max_value_size: usize,
    /// Rewrite a store's log once it holds this many entries per live
    /// record; 0 disables compaction
    pub compaction_factor: u64,
    /// Logs shorter than this are never compacted
    pub compaction_min_entries: u64,
}

impl Config {
    /// Scratch preset: no fsync and small log segments.
    pub fn ephemeral() -> Self {
        Self {
            durable_writes: false,
            log_rotation_bytes: 4 * 1024 * 1024,
            ..Self::default()
        }
    }

    pub fn with_query_size_limit(mut self, limit: usize) -> Self {
        self.query_size_limit = limit;
        self
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn with_durable_writes(mut self, durable: bool) -> Self {
        self.durable_writes = durable;
        self
    }

    pub fn with_log_rotation_bytes(mut self, bytes: u64) -> Self {
        self.log_rotation_bytes = bytes;
        self
    }

    pub fn with_compaction(mut self, factor: u64, min_entries: u64) -> Self {
        self.compaction_factor = factor;
        self.compaction_min_entries = min_entries;
        self
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> BurrowResult<()> {
        if self.query_size_limit == 0 {
            return Err(BurrowError::Config("query_size_limit must be > 0".into()));
        }
        if self.data_dir.as_os_str().is_empty() {
            return Err(BurrowError::Config("data_dir must not be empty".into()));
        }
        if self.log_rotation_bytes < 64 * 1024 {
            return Err(BurrowError::Config("log_rotation_bytes must be >= 64KB".into()));
        }
        if self.max_key_size == 0 || self.max_key_size > u16::MAX as usize {
            return Err(BurrowError::Config("max_key_size must be in [1, 65535]".into()));
        }
        if self.max_value_size == 0 || self.max_value_size > 128 * 1024 * 1024 {
            return Err(BurrowError::Config("max_value_size must be in [1, 128MB]".into()));
        }
        if self.compaction_factor == 1 {
            return Err(BurrowError::Config(
                "compaction_factor must be 0 (disabled) or >= 2".into(),
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            query_size_limit: DEFAULT_QUERY_SIZE_LIMIT,
            data_dir: PathBuf::from("burrow-data"),
            durable_writes: true,
            log_rotation_bytes: 64 * 1024 * 1024,
            max_key_size: 1024,
            max_value_size: 16 * 1024 * 1024,
            compaction_factor: 4,
            compaction_min_entries: 4096,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_valid() {
        assert!(Config::default().validate().is_ok());
        assert!(Config::ephemeral().validate().is_ok());
    }

    #[test]
    fn test_default_window() {
        assert_eq!(Config::default().query_size_limit, 50);
    }

    #[test]
    fn test_rejects_zero_limit() {
        let config = Config::default().with_query_size_limit(0);
        assert!(matches!(config.validate(), Err(BurrowError::Config(_))));
    }

    #[test]
    fn test_compaction_factor_bounds() {
        assert!(Config::default().with_compaction(0, 0).validate().is_ok());
        assert!(Config::default().with_compaction(2, 16).validate().is_ok());
        assert!(Config::default().with_compaction(1, 16).validate().is_err());
    }

    #[test]
    fn test_rejects_tiny_rotation() {
        let config = Config::default().with_log_rotation_bytes(10);
        assert!(config.validate().is_err());
    }
}
