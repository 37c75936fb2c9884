use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

use crate::digest::DigestTree;
use crate::gc::GcReport;

#[derive(Error, Debug)]
pub enum StorageError {
    /// The cache writer was already applied (or failed while applying).
    #[error("Invalid state: {0}")]
    InvalidState(String),
    /// Malformed caller input, or a lease row naming a table outside the staging namespace.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Storage backend error ({context}): {source}")]
    Backend {
        context: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("Serialization error ({context}): {source}")]
    Serialization {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StorageError {
    /// Wrap a sqlx error with the operation it came from.
    pub fn backend(context: impl Into<String>) -> impl FnOnce(sqlx::Error) -> Self {
        let context = context.into();
        move |source| Self::Backend { context, source }
    }
}

/// Staging handle that replaces one network's cached object set.
///
/// Single use: after [`CacheWriter::apply`] every call fails with
/// [`StorageError::InvalidState`].
#[async_trait]
pub trait CacheWriter: Send + Sync {
    /// Unique id of this writer; also names its staging table.
    fn id(&self) -> &str;

    fn network(&self) -> &str;

    /// Stage objects. Repeated calls accumulate.
    async fn insert_many(&mut self, objects: HashMap<String, Vec<u8>>) -> Result<(), StorageError>;

    /// Replace the network's cache with exactly the staged objects.
    async fn apply(&mut self) -> Result<(), StorageError>;
}

#[async_trait]
pub trait SyncStoreReader: Send + Sync {
    /// Create owned tables if missing. Idempotent.
    async fn initialize(&self) -> Result<(), StorageError>;

    /// Digests last updated at or before `last_updated_before`. An empty
    /// `networks` slice means every network.
    async fn get_digests(
        &self,
        networks: &[String],
        last_updated_before: i64,
        load_leaves: bool,
    ) -> Result<HashMap<String, DigestTree>, StorageError>;

    /// Cached objects for `ids`, ordered by id. Unknown ids are skipped.
    async fn get_cached_by_id(&self, network: &str, ids: &[String]) -> Result<Vec<Vec<u8>>, StorageError>;

    /// One page of cached objects ordered by id, plus the token for the next
    /// page (empty once the data is exhausted).
    async fn get_cached_by_page(
        &self,
        network: &str,
        token: &str,
        page_size: u64,
    ) -> Result<(Vec<Vec<u8>>, String), StorageError>;

    /// Last resync time of a gateway, or 0 if it never resynced.
    async fn get_last_resync(&self, network: &str, gateway: &str) -> Result<i64, StorageError>;
}

#[async_trait]
pub trait SyncStore: SyncStoreReader {
    async fn set_digest(&self, network: &str, digests: &DigestTree) -> Result<(), StorageError>;

    /// Start a new cache writer for `network`.
    async fn update_cache(&self, network: &str) -> Result<Box<dyn CacheWriter>, StorageError>;

    async fn record_resync(&self, network: &str, gateway: &str, t: i64) -> Result<(), StorageError>;

    /// Drop all state for networks outside `tracked_networks` and reap expired
    /// cache writers. Best effort: failures are logged and reported, never
    /// returned.
    async fn collect_garbage(&self, tracked_networks: &[String]) -> GcReport;
}
