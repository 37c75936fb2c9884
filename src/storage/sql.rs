// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL-backed sync store.
//!
//! Runs on the sqlx `Any` driver so the same code serves SQLite (tests,
//! single-node deployments) and MySQL. Dialect differences are confined to
//! [`super::schema`] and chosen by an `is_sqlite` flag.
//!
//! Every public operation is a single transaction or a single statement.
//! There is no in-process locking: concurrent callers (an ingestion poller,
//! an RPC pool, a GC task) are coordinated by the database alone.
//!
//! ## sqlx Any Driver Quirks
//!
//! Blobs are bound and read as `Vec<u8>`; leaf digests are stored as a
//! JSON-encoded blob rather than TEXT so MySQL's LONGTEXT-as-bytes mapping
//! never comes into play.

use async_trait::async_trait;
use sqlx::{
    any::{AnyPoolOptions, AnyRow},
    AnyPool, Row,
};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Once};
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::cache_writer::SqlCacheWriter;
use super::schema::{self, Tables};
use super::traits::{CacheWriter, StorageError, SyncStore, SyncStoreReader};
use crate::clock::{Clock, SystemClock};
use crate::config::SyncStoreConfig;
use crate::digest::{Digest, DigestTree, LeafDigest};
use crate::gc::{CacheWriterLease, GcReport};
use crate::metrics::{self, LatencyTimer};
use crate::page_token::PageToken;

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

/// Max values bound into one `IN (...)` list.
const IN_CHUNK_SIZE: usize = 500;

/// Open a pool for `connection_string`. Returns the pool and whether it is SQLite.
pub async fn connect_pool(
    connection_string: &str,
    config: &SyncStoreConfig,
) -> Result<(AnyPool, bool), StorageError> {
    install_drivers();

    let is_sqlite = connection_string.starts_with("sqlite:");

    let pool = AnyPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .after_connect(move |conn, _meta| {
            Box::pin(async move {
                if is_sqlite {
                    // Writers on other connections hold the lock briefly; wait instead of failing.
                    sqlx::query("PRAGMA busy_timeout = 5000").execute(&mut *conn).await?;
                }
                Ok(())
            })
        })
        .connect(connection_string)
        .await
        .map_err(StorageError::backend("connect"))?;

    if is_sqlite {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&pool)
            .await
            .map_err(StorageError::backend("enable WAL mode"))?;
    }

    info!(is_sqlite, "sync store pool connected");
    Ok((pool, is_sqlite))
}

/// Decode one `{prefix}_digests` row into its network and tree.
fn decode_digest_row(row: &AnyRow, load_leaves: bool) -> Result<(String, DigestTree), StorageError> {
    let network: String = row
        .try_get("network_id")
        .map_err(StorageError::backend("read network_id"))?;
    let root: String = row
        .try_get("root_digest")
        .map_err(StorageError::backend("read root_digest"))?;

    let leaf_digests = if load_leaves {
        let raw: Option<Vec<u8>> = row
            .try_get("leaf_digests")
            .map_err(StorageError::backend("read leaf_digests"))?;
        match raw {
            Some(bytes) if !bytes.is_empty() => serde_json::from_slice::<Vec<LeafDigest>>(&bytes)
                .map_err(|source| StorageError::Serialization {
                    context: format!("decode leaf digests of network {}", network),
                    source,
                })?,
            _ => Vec::new(),
        }
    } else {
        Vec::new()
    };

    Ok((
        network,
        DigestTree {
            root_digest: Digest::new(root),
            leaf_digests,
        },
    ))
}

/// Read-only view of a sync store.
#[derive(Clone)]
pub struct SqlSyncStoreReader {
    pool: AnyPool,
    is_sqlite: bool,
    tables: Tables,
}

impl SqlSyncStoreReader {
    /// Reader over an existing pool. Call [`SyncStoreReader::initialize`]
    /// before use if the tables may not exist yet.
    pub fn from_pool(pool: AnyPool, is_sqlite: bool, config: &SyncStoreConfig) -> Result<Self, StorageError> {
        config.validate_for_reader()?;
        Ok(Self {
            pool,
            is_sqlite,
            tables: Tables::new(&config.table_name_prefix),
        })
    }

    /// Connect and initialize.
    pub async fn connect(connection_string: &str, config: &SyncStoreConfig) -> Result<Self, StorageError> {
        config.validate_for_reader()?;
        let (pool, is_sqlite) = connect_pool(connection_string, config).await?;
        let reader = Self::from_pool(pool, is_sqlite, config)?;
        reader.initialize().await?;
        Ok(reader)
    }

    pub fn pool(&self) -> AnyPool {
        self.pool.clone()
    }

    pub fn tables(&self) -> &Tables {
        &self.tables
    }

    async fn query_digests(
        &self,
        networks: &[String],
        last_updated_before: i64,
        load_leaves: bool,
    ) -> Result<HashMap<String, DigestTree>, StorageError> {
        let columns = if load_leaves {
            "network_id, root_digest, leaf_digests"
        } else {
            "network_id, root_digest"
        };
        let base = format!(
            "SELECT {} FROM {} WHERE last_updated_at <= ?",
            columns, self.tables.digests
        );

        let mut digests = HashMap::new();
        if networks.is_empty() {
            let rows = sqlx::query(&base)
                .bind(last_updated_before)
                .fetch_all(&self.pool)
                .await
                .map_err(StorageError::backend(format!("select from {}", self.tables.digests)))?;
            for row in rows {
                let (network, tree) = decode_digest_row(&row, load_leaves)?;
                digests.insert(network, tree);
            }
            return Ok(digests);
        }

        for chunk in networks.chunks(IN_CHUNK_SIZE) {
            let sql = format!("{} AND network_id IN ({})", base, schema::placeholders(chunk.len()));
            let mut query = sqlx::query(&sql).bind(last_updated_before);
            for network in chunk {
                query = query.bind(network);
            }
            let rows = query
                .fetch_all(&self.pool)
                .await
                .map_err(StorageError::backend(format!("select from {}", self.tables.digests)))?;
            for row in rows {
                let (network, tree) = decode_digest_row(&row, load_leaves)?;
                digests.insert(network, tree);
            }
        }
        Ok(digests)
    }

    async fn query_cached_by_id(&self, network: &str, ids: &[String]) -> Result<Vec<Vec<u8>>, StorageError> {
        // Sorted, deduplicated chunks keep the concatenated result ordered by id.
        let sorted: Vec<&String> = ids.iter().collect::<BTreeSet<_>>().into_iter().collect();
        let mut objects = Vec::with_capacity(sorted.len());

        for chunk in sorted.chunks(IN_CHUNK_SIZE) {
            let sql = format!(
                "SELECT obj FROM {} WHERE network_id = ? AND id IN ({}) ORDER BY id",
                self.tables.cache,
                schema::placeholders(chunk.len())
            );
            let mut query = sqlx::query(&sql).bind(network);
            for id in chunk {
                query = query.bind(*id);
            }
            let rows = query
                .fetch_all(&self.pool)
                .await
                .map_err(StorageError::backend(format!("select cached objects of network {}", network)))?;
            for row in rows {
                let obj: Vec<u8> = row.try_get("obj").map_err(StorageError::backend("read obj"))?;
                objects.push(obj);
            }
        }
        Ok(objects)
    }

    async fn query_cached_page(
        &self,
        network: &str,
        token: &str,
        page_size: u64,
    ) -> Result<(Vec<Vec<u8>>, String), StorageError> {
        if page_size == 0 {
            return Err(StorageError::InvalidArgument("page size must be positive".to_string()));
        }
        let after = PageToken::decode(token)?;

        let sql = if after.is_some() {
            format!(
                "SELECT id, obj FROM {} WHERE network_id = ? AND id > ? ORDER BY id LIMIT ?",
                self.tables.cache
            )
        } else {
            format!(
                "SELECT id, obj FROM {} WHERE network_id = ? ORDER BY id LIMIT ?",
                self.tables.cache
            )
        };
        let mut query = sqlx::query(&sql).bind(network);
        if let Some(ref after) = after {
            query = query.bind(after.last_id.as_str());
        }
        let limit = i64::try_from(page_size).unwrap_or(i64::MAX);
        let rows = query
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::backend(format!("page cached objects of network {}", network)))?;

        let mut objects = Vec::with_capacity(rows.len());
        let mut last_id = None;
        for row in rows {
            let id: String = row.try_get("id").map_err(StorageError::backend("read id"))?;
            let obj: Vec<u8> = row.try_get("obj").map_err(StorageError::backend("read obj"))?;
            objects.push(obj);
            last_id = Some(id);
        }

        // A short page is the end of the data.
        let next_token = match last_id {
            Some(id) if objects.len() as u64 >= page_size => PageToken::new(id).encode()?,
            _ => String::new(),
        };
        Ok((objects, next_token))
    }

    async fn query_last_resync(&self, network: &str, gateway: &str) -> Result<i64, StorageError> {
        let sql = format!(
            "SELECT last_resync_time FROM {} WHERE network_id = ? AND gateway_id = ?",
            self.tables.last_resync
        );
        let row = sqlx::query(&sql)
            .bind(network)
            .bind(gateway)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::backend(format!(
                "select last resync of {}/{}",
                network, gateway
            )))?;

        match row {
            Some(row) => row
                .try_get("last_resync_time")
                .map_err(StorageError::backend("read last_resync_time")),
            None => Ok(0),
        }
    }
}

#[async_trait]
impl SyncStoreReader for SqlSyncStoreReader {
    #[instrument(skip(self), fields(prefix = %self.tables.prefix))]
    async fn initialize(&self) -> Result<(), StorageError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(StorageError::backend("begin initialize"))?;
        for stmt in schema::create_tables(&self.tables, self.is_sqlite) {
            sqlx::query(&stmt)
                .execute(&mut *tx)
                .await
                .map_err(StorageError::backend("create sync store tables"))?;
        }
        tx.commit().await.map_err(StorageError::backend("commit initialize"))?;

        debug!("sync store tables initialized");
        Ok(())
    }

    #[instrument(skip(self, networks), fields(networks = networks.len()))]
    async fn get_digests(
        &self,
        networks: &[String],
        last_updated_before: i64,
        load_leaves: bool,
    ) -> Result<HashMap<String, DigestTree>, StorageError> {
        let _timer = LatencyTimer::new("get_digests");
        metrics::observe(
            "get_digests",
            self.query_digests(networks, last_updated_before, load_leaves).await,
        )
    }

    #[instrument(skip(self, ids), fields(ids = ids.len()))]
    async fn get_cached_by_id(&self, network: &str, ids: &[String]) -> Result<Vec<Vec<u8>>, StorageError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let _timer = LatencyTimer::new("get_cached_by_id");
        metrics::observe("get_cached_by_id", self.query_cached_by_id(network, ids).await)
    }

    #[instrument(skip(self, token))]
    async fn get_cached_by_page(
        &self,
        network: &str,
        token: &str,
        page_size: u64,
    ) -> Result<(Vec<Vec<u8>>, String), StorageError> {
        let _timer = LatencyTimer::new("get_cached_by_page");
        metrics::observe(
            "get_cached_by_page",
            self.query_cached_page(network, token, page_size).await,
        )
    }

    #[instrument(skip(self))]
    async fn get_last_resync(&self, network: &str, gateway: &str) -> Result<i64, StorageError> {
        metrics::observe("get_last_resync", self.query_last_resync(network, gateway).await)
    }
}

/// Read-write sync store: digests, cache writers, resync records and GC.
#[derive(Clone)]
pub struct SqlSyncStore {
    reader: SqlSyncStoreReader,
    clock: Arc<dyn Clock>,
    cache_writer_valid_interval_secs: i64,
    insert_chunk_size: usize,
}

impl SqlSyncStore {
    /// Store over an existing pool, using the wall clock.
    pub fn from_pool(pool: AnyPool, is_sqlite: bool, config: &SyncStoreConfig) -> Result<Self, StorageError> {
        config.validate_for_writer()?;
        Ok(Self {
            reader: SqlSyncStoreReader::from_pool(pool, is_sqlite, config)?,
            clock: Arc::new(SystemClock),
            cache_writer_valid_interval_secs: config.cache_writer_valid_interval_secs,
            insert_chunk_size: config.insert_chunk_size,
        })
    }

    /// Connect and initialize.
    pub async fn connect(connection_string: &str, config: &SyncStoreConfig) -> Result<Self, StorageError> {
        config.validate_for_writer()?;
        let (pool, is_sqlite) = connect_pool(connection_string, config).await?;
        let store = Self::from_pool(pool, is_sqlite, config)?;
        store.initialize().await?;
        info!(prefix = %config.table_name_prefix, "sync store initialized");
        Ok(store)
    }

    /// Replace the time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// A read-only handle sharing this store's pool.
    pub fn reader(&self) -> SqlSyncStoreReader {
        self.reader.clone()
    }

    pub fn pool(&self) -> AnyPool {
        self.reader.pool()
    }

    fn tables(&self) -> &Tables {
        &self.reader.tables
    }

    fn is_sqlite(&self) -> bool {
        self.reader.is_sqlite
    }

    async fn write_digest(&self, network: &str, digests: &DigestTree) -> Result<(), StorageError> {
        let leaves = serde_json::to_vec(&digests.leaf_digests).map_err(|source| StorageError::Serialization {
            context: format!("encode leaf digests of network {}", network),
            source,
        })?;

        let mut tx = self
            .reader
            .pool
            .begin()
            .await
            .map_err(StorageError::backend("begin set digest"))?;
        sqlx::query(&schema::upsert_digest(self.tables(), self.is_sqlite()))
            .bind(network)
            .bind(digests.root_digest.value.as_str())
            .bind(leaves)
            .bind(self.clock.now())
            .execute(&mut *tx)
            .await
            .map_err(StorageError::backend(format!(
                "upsert {} for network {}",
                self.tables().digests,
                network
            )))?;
        tx.commit().await.map_err(StorageError::backend("commit set digest"))?;
        Ok(())
    }

    async fn create_cache_writer(&self, network: &str) -> Result<SqlCacheWriter, StorageError> {
        let writer_id = Uuid::new_v4().simple().to_string();
        let staging = self.tables().staging_table(&writer_id);
        let created_at = self.clock.now();

        let mut tx = self
            .reader
            .pool
            .begin()
            .await
            .map_err(StorageError::backend("begin update cache"))?;
        // Lease first: where CREATE TABLE commits implicitly (MySQL), the lease
        // is already durable, so GC can always find the staging table.
        sqlx::query(&format!(
            "INSERT INTO {} (writer_id, network_id, table_name, created_at) VALUES (?, ?, ?, ?)",
            self.tables().cache_writers
        ))
        .bind(writer_id.as_str())
        .bind(network)
        .bind(staging.as_str())
        .bind(created_at)
        .execute(&mut *tx)
        .await
        .map_err(StorageError::backend(format!("record lease of cache writer {}", writer_id)))?;
        sqlx::query(&schema::cached_objs_ddl(&staging, self.is_sqlite()))
            .persistent(false)
            .execute(&mut *tx)
            .await
            .map_err(StorageError::backend(format!("create staging table {}", staging)))?;
        tx.commit().await.map_err(StorageError::backend("commit update cache"))?;

        debug!(network, writer_id = %writer_id, created_at, "cache writer created");
        Ok(SqlCacheWriter::new(
            self.reader.pool.clone(),
            self.is_sqlite(),
            self.tables().clone(),
            network.to_string(),
            writer_id,
            staging,
            self.insert_chunk_size,
        ))
    }

    async fn write_resync(&self, network: &str, gateway: &str, t: i64) -> Result<(), StorageError> {
        sqlx::query(&schema::upsert_resync(self.tables(), self.is_sqlite()))
            .bind(network)
            .bind(gateway)
            .bind(t)
            .execute(&self.reader.pool)
            .await
            .map_err(StorageError::backend(format!(
                "upsert last resync of {}/{}",
                network, gateway
            )))?;
        Ok(())
    }

    /// Delete rows of `table` whose network is not tracked.
    ///
    /// The untracked set is computed here rather than with `NOT IN`, so the
    /// tracked list never has to fit in one statement.
    async fn sweep_table(&self, table: &str, tracked: &HashSet<&str>) -> Result<u64, StorageError> {
        let untracked: Vec<String> = if tracked.is_empty() {
            Vec::new()
        } else {
            let rows = sqlx::query(&format!("SELECT DISTINCT network_id FROM {}", table))
                .fetch_all(&self.reader.pool)
                .await
                .map_err(StorageError::backend(format!("list networks of {}", table)))?;
            let mut untracked = Vec::new();
            for row in rows {
                let network: String = row
                    .try_get("network_id")
                    .map_err(StorageError::backend("read network_id"))?;
                if !tracked.contains(network.as_str()) {
                    untracked.push(network);
                }
            }
            if untracked.is_empty() {
                return Ok(0);
            }
            untracked
        };

        let mut tx = self
            .reader
            .pool
            .begin()
            .await
            .map_err(StorageError::backend(format!("begin sweep of {}", table)))?;
        let deleted = if tracked.is_empty() {
            sqlx::query(&format!("DELETE FROM {}", table))
                .execute(&mut *tx)
                .await
                .map_err(StorageError::backend(format!("sweep {}", table)))?
                .rows_affected()
        } else {
            let mut deleted = 0;
            for chunk in untracked.chunks(IN_CHUNK_SIZE) {
                let sql = format!(
                    "DELETE FROM {} WHERE network_id IN ({})",
                    table,
                    schema::placeholders(chunk.len())
                );
                let mut query = sqlx::query(&sql);
                for network in chunk {
                    query = query.bind(network);
                }
                deleted += query
                    .execute(&mut *tx)
                    .await
                    .map_err(StorageError::backend(format!("sweep {}", table)))?
                    .rows_affected();
            }
            deleted
        };
        tx.commit()
            .await
            .map_err(StorageError::backend(format!("commit sweep of {}", table)))?;
        Ok(deleted)
    }

    async fn list_leases(&self) -> Result<Vec<CacheWriterLease>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT writer_id, network_id, table_name, created_at FROM {}",
            self.tables().cache_writers
        ))
        .fetch_all(&self.reader.pool)
        .await
        .map_err(StorageError::backend(format!("list {}", self.tables().cache_writers)))?;

        let mut leases = Vec::with_capacity(rows.len());
        for row in rows {
            leases.push(CacheWriterLease {
                writer_id: row.try_get("writer_id").map_err(StorageError::backend("read writer_id"))?,
                network: row.try_get("network_id").map_err(StorageError::backend("read network_id"))?,
                table_name: row.try_get("table_name").map_err(StorageError::backend("read table_name"))?,
                created_at: row.try_get("created_at").map_err(StorageError::backend("read created_at"))?,
            });
        }
        Ok(leases)
    }

    /// Drop a writer's staging table, then its lease. A failed drop keeps the
    /// lease so the next pass tries again.
    async fn reap_writer(&self, lease: &CacheWriterLease) -> Result<(), StorageError> {
        // Lease rows are written by this store, but refuse to drop anything
        // outside its own staging namespace.
        if lease.table_name != self.tables().staging_table(&lease.writer_id) {
            return Err(StorageError::InvalidArgument(format!(
                "lease {} names foreign table {}",
                lease.writer_id, lease.table_name
            )));
        }

        sqlx::query(&format!("DROP TABLE IF EXISTS {}", lease.table_name))
            .persistent(false)
            .execute(&self.reader.pool)
            .await
            .map_err(StorageError::backend(format!("drop staging table {}", lease.table_name)))?;
        sqlx::query(&format!(
            "DELETE FROM {} WHERE writer_id = ?",
            self.tables().cache_writers
        ))
        .bind(lease.writer_id.as_str())
        .execute(&self.reader.pool)
        .await
        .map_err(StorageError::backend(format!("delete lease of cache writer {}", lease.writer_id)))?;
        Ok(())
    }
}

#[async_trait]
impl SyncStoreReader for SqlSyncStore {
    async fn initialize(&self) -> Result<(), StorageError> {
        self.reader.initialize().await
    }

    async fn get_digests(
        &self,
        networks: &[String],
        last_updated_before: i64,
        load_leaves: bool,
    ) -> Result<HashMap<String, DigestTree>, StorageError> {
        self.reader
            .get_digests(networks, last_updated_before, load_leaves)
            .await
    }

    async fn get_cached_by_id(&self, network: &str, ids: &[String]) -> Result<Vec<Vec<u8>>, StorageError> {
        self.reader.get_cached_by_id(network, ids).await
    }

    async fn get_cached_by_page(
        &self,
        network: &str,
        token: &str,
        page_size: u64,
    ) -> Result<(Vec<Vec<u8>>, String), StorageError> {
        self.reader.get_cached_by_page(network, token, page_size).await
    }

    async fn get_last_resync(&self, network: &str, gateway: &str) -> Result<i64, StorageError> {
        self.reader.get_last_resync(network, gateway).await
    }
}

#[async_trait]
impl SyncStore for SqlSyncStore {
    #[instrument(skip(self, digests), fields(leaves = digests.leaf_digests.len()))]
    async fn set_digest(&self, network: &str, digests: &DigestTree) -> Result<(), StorageError> {
        let _timer = LatencyTimer::new("set_digest");
        metrics::observe("set_digest", self.write_digest(network, digests).await)
    }

    #[instrument(skip(self))]
    async fn update_cache(&self, network: &str) -> Result<Box<dyn CacheWriter>, StorageError> {
        let writer = metrics::observe("update_cache", self.create_cache_writer(network).await)?;
        Ok(Box::new(writer))
    }

    #[instrument(skip(self))]
    async fn record_resync(&self, network: &str, gateway: &str, t: i64) -> Result<(), StorageError> {
        metrics::observe("record_resync", self.write_resync(network, gateway, t).await)
    }

    #[instrument(skip(self, tracked_networks), fields(tracked = tracked_networks.len()))]
    async fn collect_garbage(&self, tracked_networks: &[String]) -> GcReport {
        let _timer = LatencyTimer::new("collect_garbage");
        let mut report = GcReport::default();
        let tracked: HashSet<&str> = tracked_networks.iter().map(String::as_str).collect();

        for table in self.tables().network_scoped() {
            match self.sweep_table(table, &tracked).await {
                Ok(rows) => {
                    metrics::record_gc_deleted(table, rows);
                    report.deleted_rows.insert(table.to_string(), rows);
                }
                Err(e) => {
                    error!(table, error = %e, "network sweep failed");
                    metrics::record_gc_failure("network_sweep");
                    report.failures.push(e.to_string());
                }
            }
        }

        match self.list_leases().await {
            Ok(leases) => {
                let now = self.clock.now();
                for lease in leases
                    .iter()
                    .filter(|l| l.is_reapable(&tracked, now, self.cache_writer_valid_interval_secs))
                {
                    match self.reap_writer(lease).await {
                        Ok(()) => {
                            debug!(writer_id = %lease.writer_id, network = %lease.network, "reaped cache writer");
                            metrics::record_gc_reaped_writer();
                            report.reaped_writers.push(lease.writer_id.clone());
                        }
                        Err(e) => {
                            warn!(writer_id = %lease.writer_id, error = %e, "failed to reap cache writer");
                            metrics::record_gc_failure("lease_sweep");
                            report.failures.push(e.to_string());
                        }
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "listing cache writer leases failed");
                metrics::record_gc_failure("lease_sweep");
                report.failures.push(e.to_string());
            }
        }

        info!(
            deleted_rows = report.total_deleted_rows(),
            reaped_writers = report.reaped_writers.len(),
            failures = report.failures.len(),
            "garbage collection finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::path::PathBuf;

    fn temp_db_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("syncstore_test_{}_{}.db", name, Uuid::new_v4().simple()))
    }

    async fn new_store(name: &str, clock: &ManualClock) -> (SqlSyncStore, PathBuf) {
        let db_path = temp_db_path(name);
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        let store = SqlSyncStore::connect(&url, &SyncStoreConfig::new("subscriber"))
            .await
            .unwrap()
            .with_clock(Arc::new(clock.clone()));
        (store, db_path)
    }

    fn objs(pairs: &[(&str, &str)]) -> HashMap<String, Vec<u8>> {
        pairs
            .iter()
            .map(|(id, v)| (id.to_string(), v.as_bytes().to_vec()))
            .collect()
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let clock = ManualClock::new(1000);
        let (store, db_path) = new_store("init", &clock).await;
        store.initialize().await.unwrap();
        store.initialize().await.unwrap();
        let _ = std::fs::remove_file(&db_path);
    }

    #[tokio::test]
    async fn test_digest_staleness_filter() {
        let clock = ManualClock::new(1000);
        let (store, db_path) = new_store("staleness", &clock).await;
        let tree = DigestTree::from_objects(&objs(&[("a", "1"), ("b", "2")]));
        store.set_digest("n1", &tree).await.unwrap();
        let n1 = vec!["n1".to_string()];

        assert!(store.get_digests(&n1, 999, true).await.unwrap().is_empty());

        let got = store.get_digests(&n1, 1000, true).await.unwrap();
        assert_eq!(got.get("n1"), Some(&tree));

        let roots_only = store.get_digests(&[], 5000, false).await.unwrap();
        assert_eq!(roots_only["n1"].root_digest, tree.root_digest);
        assert!(roots_only["n1"].leaf_digests.is_empty());
        let _ = std::fs::remove_file(&db_path);
    }

    #[tokio::test]
    async fn test_set_digest_overwrites() {
        let clock = ManualClock::new(1000);
        let (store, db_path) = new_store("overwrite", &clock).await;
        store
            .set_digest("n1", &DigestTree::from_objects(&objs(&[("a", "1")])))
            .await
            .unwrap();
        clock.advance(10);
        let newer = DigestTree::from_objects(&objs(&[("a", "2")]));
        store.set_digest("n1", &newer).await.unwrap();

        // Timestamp moved forward with the update
        assert!(store.get_digests(&[], 1005, true).await.unwrap().is_empty());
        assert_eq!(store.get_digests(&[], 1010, true).await.unwrap()["n1"], newer);
        let _ = std::fs::remove_file(&db_path);
    }

    #[tokio::test]
    async fn test_last_resync_defaults_to_zero() {
        let clock = ManualClock::new(1000);
        let (store, db_path) = new_store("resync", &clock).await;
        assert_eq!(store.get_last_resync("n1", "g1").await.unwrap(), 0);
        store.record_resync("n1", "g1", 42).await.unwrap();
        store.record_resync("n1", "g1", 43).await.unwrap();
        assert_eq!(store.get_last_resync("n1", "g1").await.unwrap(), 43);
        assert_eq!(store.get_last_resync("n1", "g2").await.unwrap(), 0);
        let _ = std::fs::remove_file(&db_path);
    }

    #[tokio::test]
    async fn test_cached_by_id_sorted_and_skips_missing() {
        let clock = ManualClock::new(1000);
        let (store, db_path) = new_store("by_id", &clock).await;
        let mut writer = store.update_cache("n1").await.unwrap();
        writer
            .insert_many(objs(&[("c", "3"), ("a", "1"), ("b", "2")]))
            .await
            .unwrap();
        writer.apply().await.unwrap();

        let ids = vec!["c".to_string(), "zz".to_string(), "a".to_string()];
        let got = store.get_cached_by_id("n1", &ids).await.unwrap();
        assert_eq!(got, vec![b"1".to_vec(), b"3".to_vec()]);
        assert!(store.get_cached_by_id("n1", &[]).await.unwrap().is_empty());
        assert!(store.get_cached_by_id("other", &ids).await.unwrap().is_empty());
        let _ = std::fs::remove_file(&db_path);
    }

    #[tokio::test]
    async fn test_page_size_zero_rejected() {
        let clock = ManualClock::new(1000);
        let (store, db_path) = new_store("page_zero", &clock).await;
        assert!(matches!(
            store.get_cached_by_page("n1", "", 0).await,
            Err(StorageError::InvalidArgument(_))
        ));
        let (objs, token) = store.get_cached_by_page("n1", "", 10).await.unwrap();
        assert!(objs.is_empty());
        assert!(token.is_empty());
        let _ = std::fs::remove_file(&db_path);
    }

    #[tokio::test]
    async fn test_update_cache_records_lease() {
        let clock = ManualClock::new(1000);
        let (store, db_path) = new_store("lease", &clock).await;
        let writer = store.update_cache("n1").await.unwrap();
        let leases = store.list_leases().await.unwrap();
        assert_eq!(leases.len(), 1);
        assert_eq!(leases[0].writer_id, writer.id());
        assert_eq!(leases[0].network, "n1");
        assert_eq!(leases[0].created_at, 1000);
        let _ = std::fs::remove_file(&db_path);
    }

    #[tokio::test]
    async fn test_gc_keeps_fresh_writers_of_tracked_networks() {
        let clock = ManualClock::new(1000);
        let (store, db_path) = new_store("gc_fresh", &clock).await;
        let mut writer = store.update_cache("n1").await.unwrap();
        clock.advance(100);

        let report = store.collect_garbage(&["n1".to_string()]).await;
        assert!(report.is_clean());
        assert!(report.reaped_writers.is_empty());

        writer.insert_many(objs(&[("a", "1")])).await.unwrap();
        writer.apply().await.unwrap();
        assert!(store.list_leases().await.unwrap().is_empty());
        let _ = std::fs::remove_file(&db_path);
    }

    #[tokio::test]
    async fn test_reader_rejects_invalid_prefix() {
        let clock = ManualClock::new(0);
        let (store, db_path) = new_store("bad_prefix", &clock).await;
        assert!(SqlSyncStoreReader::from_pool(store.pool(), true, &SyncStoreConfig::new("a;b")).is_err());
        let _ = std::fs::remove_file(&db_path);
    }

    #[tokio::test]
    async fn test_tracked_lists_beyond_sqlite_variable_limit() {
        let clock = ManualClock::new(1000);
        let (store, db_path) = new_store("huge_tracked", &clock).await;
        let tree = DigestTree::from_objects(&objs(&[("a", "1")]));
        store.set_digest("n0", &tree).await.unwrap();
        store.set_digest("stray", &tree).await.unwrap();

        let tracked: Vec<String> = (0..40_000).map(|i| format!("n{}", i)).collect();
        let report = store.collect_garbage(&tracked).await;
        assert!(report.is_clean(), "{:?}", report.failures);
        assert_eq!(report.deleted_rows[&store.tables().digests], 1);

        let got = store.get_digests(&tracked, i64::MAX, false).await.unwrap();
        assert_eq!(got.len(), 1);
        assert!(got.contains_key("n0"));
        assert!(!store.get_digests(&[], i64::MAX, false).await.unwrap().contains_key("stray"));
        let _ = std::fs::remove_file(&db_path);
    }

    #[tokio::test]
    async fn test_gc_reaps_lease_whose_staging_table_is_missing() {
        let clock = ManualClock::new(1000);
        let (store, db_path) = new_store("lease_no_table", &clock).await;
        let writer = store.update_cache("n1").await.unwrap();
        let staging = store.tables().staging_table(writer.id());
        sqlx::query(&format!("DROP TABLE {}", staging))
            .persistent(false)
            .execute(&store.pool())
            .await
            .unwrap();

        clock.advance(151);
        let report = store.collect_garbage(&["n1".to_string()]).await;
        assert!(report.is_clean(), "{:?}", report.failures);
        assert_eq!(report.reaped_writers, vec![writer.id().to_string()]);
        assert!(store.list_leases().await.unwrap().is_empty());
        let _ = std::fs::remove_file(&db_path);
    }

    #[tokio::test]
    async fn test_gc_refuses_lease_naming_foreign_table() {
        let clock = ManualClock::new(1000);
        let (store, db_path) = new_store("foreign_lease", &clock).await;
        sqlx::query(&format!(
            "INSERT INTO {} (writer_id, network_id, table_name, created_at) VALUES (?, ?, ?, ?)",
            store.tables().cache_writers
        ))
        .bind("w1")
        .bind("gone")
        .bind(store.tables().digests.as_str())
        .bind(0_i64)
        .execute(&store.pool())
        .await
        .unwrap();

        let leases = store.list_leases().await.unwrap();
        assert!(matches!(
            store.reap_writer(&leases[0]).await,
            Err(StorageError::InvalidArgument(_))
        ));

        let report = store.collect_garbage(&["n1".to_string()]).await;
        assert_eq!(report.failures.len(), 1);
        assert!(report.reaped_writers.is_empty());
        assert_eq!(store.list_leases().await.unwrap().len(), 1);
        // Digests table survived
        assert!(store.get_digests(&[], i64::MAX, false).await.is_ok());
        let _ = std::fs::remove_file(&db_path);
    }
}
