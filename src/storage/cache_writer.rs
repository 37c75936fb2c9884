//! Staged, single-use replacement of one network's cached objects.
//!
//! A writer owns a private staging table. Callers fill it with any number of
//! `insert_many` calls (typically one per page of the upstream source), then
//! `apply` swaps the staged set into the shared cache table in one
//! transaction: rows missing from the staging table are deleted, staged rows
//! are upserted, the staging table and the writer's lease are dropped.
//! Readers see either the old or the new set, never a mix.

use async_trait::async_trait;
use sqlx::AnyPool;
use std::collections::HashMap;
use tracing::{debug, instrument};

use super::schema::{self, Tables};
use super::traits::{CacheWriter, StorageError};
use crate::metrics::{self, LatencyTimer};

pub struct SqlCacheWriter {
    pool: AnyPool,
    is_sqlite: bool,
    tables: Tables,
    network: String,
    id: String,
    staging_table: String,
    chunk_size: usize,
    invalidated: bool,
}

impl SqlCacheWriter {
    pub(crate) fn new(
        pool: AnyPool,
        is_sqlite: bool,
        tables: Tables,
        network: String,
        id: String,
        staging_table: String,
        chunk_size: usize,
    ) -> Self {
        Self {
            pool,
            is_sqlite,
            tables,
            network,
            id,
            staging_table,
            chunk_size: chunk_size.max(1),
            invalidated: false,
        }
    }

    pub fn staging_table(&self) -> &str {
        &self.staging_table
    }

    fn ensure_valid(&self, op: &str) -> Result<(), StorageError> {
        if self.invalidated {
            return Err(StorageError::InvalidState(format!(
                "cache writer {} for network {} already applied; {} not allowed",
                self.id, self.network, op
            )));
        }
        Ok(())
    }

    async fn stage(&self, objects: &HashMap<String, Vec<u8>>) -> Result<usize, StorageError> {
        let rows: Vec<(&String, &Vec<u8>)> = objects.iter().collect();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(StorageError::backend("begin insert many"))?;
        for chunk in rows.chunks(self.chunk_size) {
            let sql = schema::insert_staged(&self.staging_table, chunk.len(), self.is_sqlite);
            let mut query = sqlx::query(&sql).persistent(false);
            for (id, obj) in chunk {
                query = query.bind(self.network.as_str()).bind(id.as_str()).bind(obj.to_vec());
            }
            query.execute(&mut *tx).await.map_err(StorageError::backend(format!(
                "insert into staging table {}",
                self.staging_table
            )))?;
        }
        tx.commit().await.map_err(StorageError::backend("commit insert many"))?;
        Ok(rows.len())
    }

    async fn swap_in(&self) -> Result<(u64, u64), StorageError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(StorageError::backend("begin apply"))?;

        // Statements naming the staging table are one-off; keep them out of the statement cache.
        let deleted = sqlx::query(&schema::delete_unstaged(&self.tables.cache, &self.staging_table))
            .persistent(false)
            .bind(self.network.as_str())
            .execute(&mut *tx)
            .await
            .map_err(StorageError::backend(format!(
                "delete stale cached objects of network {}",
                self.network
            )))?
            .rows_affected();

        let upserted = sqlx::query(&schema::upsert_from_staging(
            &self.tables.cache,
            &self.staging_table,
            self.is_sqlite,
        ))
        .persistent(false)
        .execute(&mut *tx)
        .await
        .map_err(StorageError::backend(format!(
            "upsert staged objects of network {}",
            self.network
        )))?
        .rows_affected();

        sqlx::query(&format!("DROP TABLE {}", self.staging_table))
            .persistent(false)
            .execute(&mut *tx)
            .await
            .map_err(StorageError::backend(format!("drop staging table {}", self.staging_table)))?;

        sqlx::query(&format!(
            "DELETE FROM {} WHERE writer_id = ?",
            self.tables.cache_writers
        ))
        .bind(self.id.as_str())
        .execute(&mut *tx)
        .await
        .map_err(StorageError::backend(format!("release lease of cache writer {}", self.id)))?;

        tx.commit().await.map_err(StorageError::backend("commit apply"))?;
        Ok((upserted, deleted))
    }
}

#[async_trait]
impl CacheWriter for SqlCacheWriter {
    fn id(&self) -> &str {
        &self.id
    }

    fn network(&self) -> &str {
        &self.network
    }

    #[instrument(skip(self, objects), fields(network = %self.network, writer_id = %self.id, objects = objects.len()))]
    async fn insert_many(&mut self, objects: HashMap<String, Vec<u8>>) -> Result<(), StorageError> {
        self.ensure_valid("insert_many")?;
        if objects.is_empty() {
            return Ok(());
        }
        let _timer = LatencyTimer::new("insert_many");
        let staged = metrics::observe("insert_many", self.stage(&objects).await)?;
        metrics::record_rows_staged(staged);
        Ok(())
    }

    #[instrument(skip(self), fields(network = %self.network, writer_id = %self.id))]
    async fn apply(&mut self) -> Result<(), StorageError> {
        self.ensure_valid("apply")?;
        // No retry on the same handle, even if the swap fails.
        self.invalidated = true;

        let _timer = LatencyTimer::new("apply");
        let (upserted, deleted) = metrics::observe("apply", self.swap_in().await)?;
        metrics::record_cache_applied(upserted, deleted);
        debug!(upserted, deleted, "cache writer applied");
        Ok(())
    }
}
