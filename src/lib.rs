//! # syncstore
//!
//! Digest-based sync cache for pushing a large, per-network object set (for
//! example a subscriber database) down to many gateways.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐   leaf_digests_diff()   ┌──────────────────────┐
//! │   Ingestion poller   │ ──────────────────────▶ │    Digest Differ     │
//! │  (per network)       │                         └──────────────────────┘
//! │                      │   update_cache()
//! │                      │ ──────────────────────▶ ┌──────────────────────┐
//! │                      │   insert_many()/apply() │     Cache Writer     │
//! │                      │                         │  (staging table)     │
//! │                      │   set_digest()          └──────────┬───────────┘
//! └──────────┬───────────┘                                    │ apply
//!            │                                                ▼
//!            │            ┌──────────────────────────────────────────────┐
//!            └──────────▶ │  SQL: digests │ cached objs │ last resync │  │
//!                         │               │             │ writer leases│  │
//!                         └──────────────────────────────────────────────┘
//!                              ▲                       ▲
//!      get_digests()/pages     │                       │ collect_garbage()
//!  ┌───────────────────────────┴──┐          ┌─────────┴──────────┐
//!  │  Gateway resync RPC (reader) │          │   Periodic GC task │
//!  └──────────────────────────────┘          └────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::collections::HashMap;
//! use syncstore::{CacheWriter, DigestTree, SqlSyncStore, SyncStore, SyncStoreConfig, SyncStoreReader};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), syncstore::StorageError> {
//!     let config = SyncStoreConfig::new("subscriber");
//!     let store = SqlSyncStore::connect("sqlite://syncstore.db?mode=rwc", &config).await?;
//!
//!     let mut objects = HashMap::new();
//!     objects.insert("IMSI001010000000001".to_string(), b"profile".to_vec());
//!
//!     let mut writer = store.update_cache("network1").await?;
//!     writer.insert_many(objects.clone()).await?;
//!     writer.apply().await?;
//!     store.set_digest("network1", &DigestTree::from_objects(&objects)).await?;
//!
//!     let (page, next) = store.get_cached_by_page("network1", "", 100).await?;
//!     assert_eq!(page.len(), 1);
//!     assert!(next.is_empty());
//!
//!     store.collect_garbage(&["network1".to_string()]).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`digest`]: digest trees, hashing and the leaf differ
//! - [`storage`]: store traits and the SQL implementation
//! - [`gc`]: garbage collection report and lease rules
//! - [`config`]: store configuration
//! - [`clock`]: injectable time source
//! - [`page_token`]: opaque paging cursor
//! - [`metrics`]: `metrics` crate instrumentation

pub mod clock;
pub mod config;
pub mod digest;
pub mod gc;
pub mod metrics;
pub mod page_token;
pub mod storage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SyncStoreConfig;
pub use crate::metrics::LatencyTimer;
pub use digest::{digest_of, leaf_digests_diff, root_digest, Digest, DigestTree, LeafDigest, LeafDigestsDiff};
pub use gc::{CacheWriterLease, GcReport};
pub use page_token::PageToken;
pub use storage::traits::{CacheWriter, StorageError, SyncStore, SyncStoreReader};
pub use storage::{SqlCacheWriter, SqlSyncStore, SqlSyncStoreReader};
