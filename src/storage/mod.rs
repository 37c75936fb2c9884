//! Storage backends for the sync store.

pub mod cache_writer;
pub mod schema;
pub mod sql;
pub mod traits;

pub use cache_writer::SqlCacheWriter;
pub use sql::{connect_pool, SqlSyncStore, SqlSyncStoreReader};
pub use traits::{CacheWriter, StorageError, SyncStore, SyncStoreReader};
