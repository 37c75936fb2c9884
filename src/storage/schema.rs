// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Table layout and dialect-specific SQL.
//!
//! Every store owns four tables, all named from one prefix:
//!
//! ```sql
//! CREATE TABLE {prefix}_digests (
//!     network_id      VARCHAR(255) PRIMARY KEY,
//!     root_digest     VARCHAR(255) NOT NULL,
//!     leaf_digests    LONGBLOB,            -- JSON-encoded Vec<LeafDigest>
//!     last_updated_at BIGINT NOT NULL      -- unix seconds
//! );
//! CREATE TABLE {prefix}_cached_objs (
//!     network_id VARCHAR(255), id VARCHAR(255), obj LONGBLOB,
//!     PRIMARY KEY (network_id, id)
//! );
//! CREATE TABLE {prefix}_last_resync (
//!     network_id VARCHAR(255), gateway_id VARCHAR(255), last_resync_time BIGINT,
//!     PRIMARY KEY (network_id, gateway_id)
//! );
//! CREATE TABLE {prefix}_cache_writers (   -- one lease per live writer
//!     writer_id VARCHAR(64) PRIMARY KEY, network_id VARCHAR(255),
//!     table_name VARCHAR(255), created_at BIGINT
//! );
//! ```
//!
//! Each cache writer additionally gets a staging table
//! `{prefix}_cache_tmp_{writer_id}` shaped like the cached objects table.
//!
//! On MySQL every table uses `utf8mb4_bin`, so keys compare bytewise like
//! SQLite's `TEXT` and `ORDER BY id` matches the leaf differ's ordering.
//!
//! Table names are interpolated into SQL, which is why the prefix is
//! restricted to `[A-Za-z0-9_]` and writer ids are simple-format UUIDs.

/// Names of the tables owned by one store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tables {
    pub prefix: String,
    pub digests: String,
    pub cache: String,
    pub last_resync: String,
    pub cache_writers: String,
}

impl Tables {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            digests: format!("{}_digests", prefix),
            cache: format!("{}_cached_objs", prefix),
            last_resync: format!("{}_last_resync", prefix),
            cache_writers: format!("{}_cache_writers", prefix),
        }
    }

    /// Staging table for one cache writer.
    pub fn staging_table(&self, writer_id: &str) -> String {
        format!("{}_cache_tmp_{}", self.prefix, writer_id)
    }

    /// Tables swept by the network-scoped phase of garbage collection.
    pub fn network_scoped(&self) -> [&str; 3] {
        [&self.digests, &self.cache, &self.last_resync]
    }
}

/// `CREATE TABLE IF NOT EXISTS` statements for the persistent tables.
pub fn create_tables(tables: &Tables, is_sqlite: bool) -> Vec<String> {
    if is_sqlite {
        vec![
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    network_id TEXT PRIMARY KEY,
                    root_digest TEXT NOT NULL,
                    leaf_digests BLOB,
                    last_updated_at INTEGER NOT NULL
                )",
                tables.digests
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS idx_{0}_updated ON {0}(last_updated_at)",
                tables.digests
            ),
            cached_objs_ddl(&tables.cache, true),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    network_id TEXT NOT NULL,
                    gateway_id TEXT NOT NULL,
                    last_resync_time INTEGER NOT NULL,
                    PRIMARY KEY (network_id, gateway_id)
                )",
                tables.last_resync
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    writer_id TEXT PRIMARY KEY,
                    network_id TEXT NOT NULL,
                    table_name TEXT NOT NULL,
                    created_at INTEGER NOT NULL
                )",
                tables.cache_writers
            ),
        ]
    } else {
        vec![
            format!(
                "CREATE TABLE IF NOT EXISTS {0} (
                    network_id VARCHAR(255) PRIMARY KEY,
                    root_digest VARCHAR(255) NOT NULL,
                    leaf_digests LONGBLOB,
                    last_updated_at BIGINT NOT NULL,
                    INDEX idx_{0}_updated (last_updated_at)
                ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_bin",
                tables.digests
            ),
            cached_objs_ddl(&tables.cache, false),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    network_id VARCHAR(255) NOT NULL,
                    gateway_id VARCHAR(255) NOT NULL,
                    last_resync_time BIGINT NOT NULL,
                    PRIMARY KEY (network_id, gateway_id)
                ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_bin",
                tables.last_resync
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    writer_id VARCHAR(64) PRIMARY KEY,
                    network_id VARCHAR(255) NOT NULL,
                    table_name VARCHAR(255) NOT NULL,
                    created_at BIGINT NOT NULL
                ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_bin",
                tables.cache_writers
            ),
        ]
    }
}

/// DDL for the shared cache table and for staging tables, which share its shape.
pub fn cached_objs_ddl(table: &str, is_sqlite: bool) -> String {
    if is_sqlite {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (
                network_id TEXT NOT NULL,
                id TEXT NOT NULL,
                obj BLOB NOT NULL,
                PRIMARY KEY (network_id, id)
            )",
            table
        )
    } else {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (
                network_id VARCHAR(255) NOT NULL,
                id VARCHAR(255) NOT NULL,
                obj LONGBLOB NOT NULL,
                PRIMARY KEY (network_id, id)
            ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_bin",
            table
        )
    }
}

pub fn upsert_digest(tables: &Tables, is_sqlite: bool) -> String {
    if is_sqlite {
        format!(
            "INSERT INTO {} (network_id, root_digest, leaf_digests, last_updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(network_id) DO UPDATE SET
                root_digest = excluded.root_digest,
                leaf_digests = excluded.leaf_digests,
                last_updated_at = excluded.last_updated_at",
            tables.digests
        )
    } else {
        format!(
            "INSERT INTO {} (network_id, root_digest, leaf_digests, last_updated_at)
             VALUES (?, ?, ?, ?)
             ON DUPLICATE KEY UPDATE
                root_digest = VALUES(root_digest),
                leaf_digests = VALUES(leaf_digests),
                last_updated_at = VALUES(last_updated_at)",
            tables.digests
        )
    }
}

pub fn upsert_resync(tables: &Tables, is_sqlite: bool) -> String {
    if is_sqlite {
        format!(
            "INSERT INTO {} (network_id, gateway_id, last_resync_time) VALUES (?, ?, ?)
             ON CONFLICT(network_id, gateway_id) DO UPDATE SET
                last_resync_time = excluded.last_resync_time",
            tables.last_resync
        )
    } else {
        format!(
            "INSERT INTO {} (network_id, gateway_id, last_resync_time) VALUES (?, ?, ?)
             ON DUPLICATE KEY UPDATE last_resync_time = VALUES(last_resync_time)",
            tables.last_resync
        )
    }
}

/// Multi-row insert of `rows` objects into a staging table. A repeated id
/// keeps the latest blob.
pub fn insert_staged(staging: &str, rows: usize, is_sqlite: bool) -> String {
    let placeholders = vec!["(?, ?, ?)"; rows].join(", ");
    if is_sqlite {
        format!(
            "INSERT INTO {} (network_id, id, obj) VALUES {}
             ON CONFLICT(network_id, id) DO UPDATE SET obj = excluded.obj",
            staging, placeholders
        )
    } else {
        format!(
            "INSERT INTO {} (network_id, id, obj) VALUES {}
             ON DUPLICATE KEY UPDATE obj = VALUES(obj)",
            staging, placeholders
        )
    }
}

/// Delete cached rows of one network that are absent from the staging table.
pub fn delete_unstaged(cache: &str, staging: &str) -> String {
    format!(
        "DELETE FROM {} WHERE network_id = ? AND id NOT IN (SELECT id FROM {})",
        cache, staging
    )
}

/// Copy every staged row into the cache table, overwriting existing ids.
pub fn upsert_from_staging(cache: &str, staging: &str, is_sqlite: bool) -> String {
    if is_sqlite {
        // `WHERE true` disambiguates ON CONFLICT from a join constraint.
        format!(
            "INSERT INTO {} (network_id, id, obj)
             SELECT network_id, id, obj FROM {} WHERE true
             ON CONFLICT(network_id, id) DO UPDATE SET obj = excluded.obj",
            cache, staging
        )
    } else {
        format!(
            "INSERT INTO {} (network_id, id, obj)
             SELECT s.network_id, s.id, s.obj FROM {} AS s
             ON DUPLICATE KEY UPDATE obj = s.obj",
            cache, staging
        )
    }
}

/// `?, ?, ?` for an IN list of `n` values.
pub fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}
