//! Configuration for the sync store.
//!
//! # Example
//!
//! ```
//! use syncstore::SyncStoreConfig;
//!
//! // Minimal config (uses defaults)
//! let config = SyncStoreConfig::new("subscriber");
//! assert_eq!(config.cache_writer_valid_interval_secs, 150);
//!
//! // Full config
//! let config = SyncStoreConfig {
//!     table_name_prefix: "subscriber".into(),
//!     cache_writer_valid_interval_secs: 60,
//!     insert_chunk_size: 100,
//!     ..SyncStoreConfig::new("subscriber")
//! };
//! assert!(config.validate_for_writer().is_ok());
//! ```

use serde::Deserialize;

use crate::storage::traits::StorageError;

/// Configuration for a sync store.
///
/// Every table the store owns is named `{table_name_prefix}_...`, so two
/// stores with different prefixes can share one database.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncStoreConfig {
    /// Prefix for all owned tables. Restricted to `[A-Za-z0-9_]`.
    pub table_name_prefix: String,

    /// Lease length for a cache writer. Must be smaller than the polling
    /// interval of the process driving garbage collection.
    #[serde(default = "default_cache_writer_valid_interval_secs")]
    pub cache_writer_valid_interval_secs: i64,

    /// Pool size when the store opens its own connection.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,

    /// Rows per multi-row INSERT. SQLite caps bound parameters at 999 on
    /// older builds and each row binds three.
    #[serde(default = "default_insert_chunk_size")]
    pub insert_chunk_size: usize,
}

fn default_cache_writer_valid_interval_secs() -> i64 { 150 }
fn default_max_connections() -> u32 { 5 }
fn default_acquire_timeout_secs() -> u64 { 10 }
fn default_insert_chunk_size() -> usize { 300 }

impl SyncStoreConfig {
    /// Config with the given table prefix and defaults for everything else.
    pub fn new(table_name_prefix: impl Into<String>) -> Self {
        Self {
            table_name_prefix: table_name_prefix.into(),
            cache_writer_valid_interval_secs: default_cache_writer_valid_interval_secs(),
            max_connections: default_max_connections(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
            insert_chunk_size: default_insert_chunk_size(),
        }
    }

    /// Checks needed by a read-only store.
    pub fn validate_for_reader(&self) -> Result<(), StorageError> {
        if self.table_name_prefix.is_empty() {
            return Err(StorageError::InvalidArgument(
                "table name prefix must be non-empty".to_string(),
            ));
        }
        if !self
            .table_name_prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(StorageError::InvalidArgument(format!(
                "table name prefix '{}' may only contain [A-Za-z0-9_]",
                self.table_name_prefix
            )));
        }
        Ok(())
    }

    /// Checks needed by a store that creates cache writers.
    pub fn validate_for_writer(&self) -> Result<(), StorageError> {
        self.validate_for_reader()?;
        if self.cache_writer_valid_interval_secs <= 0 {
            return Err(StorageError::InvalidArgument(
                "cache writer valid interval must be positive".to_string(),
            ));
        }
        if self.insert_chunk_size == 0 {
            return Err(StorageError::InvalidArgument(
                "insert chunk size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncStoreConfig::new("subscriber");
        assert_eq!(config.cache_writer_valid_interval_secs, 150);
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.insert_chunk_size, 300);
        assert!(config.validate_for_writer().is_ok());
    }

    #[test]
    fn test_deserialize_fills_defaults() {
        let config: SyncStoreConfig =
            serde_json::from_str(r#"{"table_name_prefix": "policy"}"#).unwrap();
        assert_eq!(config.table_name_prefix, "policy");
        assert_eq!(config.acquire_timeout_secs, 10);
    }

    #[test]
    fn test_rejects_bad_prefix() {
        assert!(SyncStoreConfig::new("").validate_for_reader().is_err());
        assert!(SyncStoreConfig::new("drop table;").validate_for_reader().is_err());
    }

    #[test]
    fn test_reader_ignores_interval() {
        let config = SyncStoreConfig {
            cache_writer_valid_interval_secs: 0,
            ..SyncStoreConfig::new("subscriber")
        };
        assert!(config.validate_for_reader().is_ok());
        assert!(matches!(
            config.validate_for_writer(),
            Err(StorageError::InvalidArgument(_))
        ));
    }
}
