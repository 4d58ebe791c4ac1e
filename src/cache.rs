//! SQLite cache of successful data-service payloads.
//!
//! Keyed by namespace (which data service answered) plus the trimmed query
//! text. Only payloads are stored; conversation handles are per-session and
//! never cached. All SQLite work runs on the blocking pool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use fs2::FileExt;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::dataservice::QueryPayload;

const SCHEMA: &str = "
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;
    CREATE TABLE IF NOT EXISTS query_cache (
        key_hash   TEXT PRIMARY KEY,
        namespace  TEXT NOT NULL,
        query      TEXT NOT NULL,
        payload    TEXT NOT NULL,
        row_count  INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        hit_count  INTEGER NOT NULL DEFAULT 0
    );
    CREATE INDEX IF NOT EXISTS query_cache_updated ON query_cache (updated_at);
";

const DEFAULT_PATH: &str = ".deck_query_cache.sqlite";

#[derive(Debug, Clone)]
pub struct QueryCacheKey {
    pub namespace: String,
    pub query: String,
    /// blake3 over the namespace and trimmed query, hex encoded.
    pub key_hash: String,
}

impl QueryCacheKey {
    pub fn new(namespace: &str, query: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        for part in [namespace, query.trim()] {
            // length prefix keeps ("ab", "c") and ("a", "bc") apart
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        Self {
            namespace: namespace.to_string(),
            query: query.to_string(),
            key_hash: hasher.finalize().to_hex().to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("stored payload is not valid JSON: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("cache connection lock poisoned")]
    Poisoned,
    #[error("blocking cache task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[async_trait]
pub trait QueryCache: Send + Sync {
    async fn get(&self, key: &QueryCacheKey) -> Result<Option<QueryPayload>, CacheError>;
    async fn put(&self, key: &QueryCacheKey, payload: &QueryPayload) -> Result<(), CacheError>;
}

#[derive(Clone)]
pub struct SqliteQueryCache {
    path: PathBuf,
    conn: Arc<Mutex<Connection>>,
}

/// One exported cache entry, as written by [`SqliteQueryCache::export_jsonl`].
#[derive(Debug, Serialize)]
pub struct CacheExportRow {
    pub key_hash: String,
    pub namespace: String,
    pub query: String,
    pub row_count: i64,
    pub payload: serde_json::Value,
    pub created_at: i64,
    pub updated_at: i64,
    pub hit_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CachePruneStats {
    pub deleted: usize,
    pub remaining: usize,
}

impl SqliteQueryCache {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let conn = Connection::open(&path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// `DECK_QUERY_CACHE_PATH`, else a file in the working directory.
    pub fn default_path() -> PathBuf {
        std::env::var_os("DECK_QUERY_CACHE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PATH))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Advisory lock on a sibling `.lock` file, held until the guard drops.
    /// Taken by maintenance commands so two processes don't prune at once.
    pub fn lock_exclusive(&self) -> Result<CacheLock, CacheError> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(self.path.with_extension("lock"))?;
        file.lock_exclusive()?;
        Ok(CacheLock { _file: file })
    }

    async fn blocking<R, F>(&self, f: F) -> Result<R, CacheError>
    where
        R: Send + 'static,
        F: FnOnce(&Connection) -> Result<R, CacheError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| CacheError::Poisoned)?;
            f(&guard)
        })
        .await?
    }

    /// Writes every entry, most recently touched first. Returns the line count.
    pub async fn export_jsonl(&self, path: impl AsRef<Path>) -> Result<usize, CacheError> {
        let path = path.as_ref().to_path_buf();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT key_hash, namespace, query, row_count, payload,
                        created_at, updated_at, hit_count
                 FROM query_cache ORDER BY updated_at DESC, key_hash",
            )?;
            let entries = stmt.query_map([], |row| {
                Ok((
                    CacheExportRow {
                        key_hash: row.get(0)?,
                        namespace: row.get(1)?,
                        query: row.get(2)?,
                        row_count: row.get(3)?,
                        payload: serde_json::Value::Null,
                        created_at: row.get(5)?,
                        updated_at: row.get(6)?,
                        hit_count: row.get(7)?,
                    },
                    row.get::<_, String>(4)?,
                ))
            })?;

            let mut out = std::io::BufWriter::new(std::fs::File::create(path)?);
            let mut written = 0;
            for entry in entries {
                let (mut record, raw) = entry?;
                record.payload = serde_json::from_str(&raw)?;
                serde_json::to_writer(&mut out, &record)?;
                out.write_all(b"\n")?;
                written += 1;
            }
            out.flush()?;
            Ok(written)
        })
        .await
    }

    /// Drops entries untouched for `max_age_days`, then keeps only the
    /// `max_rows` most recently touched.
    pub async fn prune(
        &self,
        max_age_days: Option<u64>,
        max_rows: Option<usize>,
    ) -> Result<CachePruneStats, CacheError> {
        self.blocking(move |conn| {
            let mut deleted = 0;
            if let Some(days) = max_age_days {
                let cutoff = now_epoch().saturating_sub((days as i64).saturating_mul(86_400));
                deleted += conn.execute(
                    "DELETE FROM query_cache WHERE updated_at < ?1",
                    params![cutoff],
                )?;
            }
            if let Some(keep) = max_rows {
                deleted += conn.execute(
                    "DELETE FROM query_cache WHERE key_hash IN (
                        SELECT key_hash FROM query_cache
                        ORDER BY updated_at DESC, key_hash
                        LIMIT -1 OFFSET ?1
                     )",
                    params![keep as i64],
                )?;
            }
            let remaining: i64 =
                conn.query_row("SELECT COUNT(*) FROM query_cache", [], |row| row.get(0))?;
            Ok(CachePruneStats {
                deleted,
                remaining: remaining.max(0) as usize,
            })
        })
        .await
    }
}

#[async_trait]
impl QueryCache for SqliteQueryCache {
    async fn get(&self, key: &QueryCacheKey) -> Result<Option<QueryPayload>, CacheError> {
        let key_hash = key.key_hash.clone();
        self.blocking(move |conn| {
            let raw: Option<String> = conn
                .query_row(
                    "UPDATE query_cache
                     SET hit_count = hit_count + 1, updated_at = ?1
                     WHERE key_hash = ?2
                     RETURNING payload",
                    params![now_epoch(), key_hash],
                    |row| row.get(0),
                )
                .optional()?;
            raw.map(|raw| serde_json::from_str(&raw))
                .transpose()
                .map_err(CacheError::from)
        })
        .await
    }

    async fn put(&self, key: &QueryCacheKey, payload: &QueryPayload) -> Result<(), CacheError> {
        let key = key.clone();
        let raw = serde_json::to_string(payload)?;
        let row_count = payload.row_count() as i64;
        self.blocking(move |conn| {
            let now = now_epoch();
            conn.execute(
                "INSERT INTO query_cache
                    (key_hash, namespace, query, payload, row_count, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                 ON CONFLICT(key_hash) DO UPDATE SET
                    payload = excluded.payload,
                    row_count = excluded.row_count,
                    updated_at = excluded.updated_at",
                params![key.key_hash, key.namespace, key.query, raw, row_count, now],
            )?;
            Ok(())
        })
        .await
    }
}

#[derive(Debug)]
pub struct CacheLock {
    _file: std::fs::File,
}

fn now_epoch() -> i64 {
    Utc::now().timestamp()
}
