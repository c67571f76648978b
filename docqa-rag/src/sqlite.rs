//! SQLite-backed response cache store.
//!
//! Provides [`SqliteCacheStore`], a [`CacheStore`] that keeps cached answers
//! in a `response_cache` table so they survive restarts.
//!
//! # Example
//!
//! ```rust,ignore
//! use docqa_rag::sqlite::SqliteCacheStore;
//!
//! let store = SqliteCacheStore::connect("sqlite://data/cache.db?mode=rwc").await?;
//! let cache = ResponseCache::new(Arc::new(store), 36_000);
//! ```

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use tracing::debug;

use crate::cache::CacheStore;
use crate::error::{RagError, Result};

/// A [`CacheStore`] persisted in SQLite.
///
/// Rows are `(query_hash PRIMARY KEY, response, timestamp, expiration)` with
/// both times stored as Unix milliseconds.
pub struct SqliteCacheStore {
    pool: SqlitePool,
}

impl SqliteCacheStore {
    /// Connect to `database_url` and create the table if needed.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(Self::map_err)?;
        Self::from_pool(pool).await
    }

    /// Use an existing pool and create the table if needed.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS response_cache (\
                query_hash TEXT PRIMARY KEY, \
                response TEXT NOT NULL, \
                timestamp INTEGER NOT NULL, \
                expiration INTEGER NOT NULL\
            )",
        )
        .execute(&pool)
        .await
        .map_err(Self::map_err)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS response_cache_expiration ON response_cache (expiration)",
        )
        .execute(&pool)
        .await
        .map_err(Self::map_err)?;

        debug!("response_cache table ready");
        Ok(Self { pool })
    }

    fn map_err(e: sqlx::Error) -> RagError {
        RagError::CacheError(format!("sqlite: {e}"))
    }

    fn now_millis() -> i64 {
        Utc::now().timestamp_millis()
    }
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        sqlx::query_scalar::<_, String>(
            "SELECT response FROM response_cache WHERE query_hash = ? AND expiration >= ?",
        )
        .bind(key)
        .bind(Self::now_millis())
        .fetch_optional(&self.pool)
        .await
        .map_err(Self::map_err)
    }

    async fn put(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let now = Self::now_millis();
        let ttl_millis = i64::try_from(ttl_secs).unwrap_or(i64::MAX).saturating_mul(1000);
        sqlx::query(
            "INSERT INTO response_cache (query_hash, response, timestamp, expiration) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT (query_hash) DO UPDATE SET \
                response = excluded.response, \
                timestamp = excluded.timestamp, \
                expiration = excluded.expiration",
        )
        .bind(key)
        .bind(value)
        .bind(now)
        .bind(now.saturating_add(ttl_millis))
        .execute(&self.pool)
        .await
        .map_err(Self::map_err)?;
        Ok(())
    }

    async fn invalidate_all(&self) -> Result<usize> {
        let done = sqlx::query("DELETE FROM response_cache")
            .execute(&self.pool)
            .await
            .map_err(Self::map_err)?;
        Ok(done.rows_affected() as usize)
    }

    async fn purge_expired(&self) -> Result<usize> {
        let done = sqlx::query("DELETE FROM response_cache WHERE expiration < ?")
            .bind(Self::now_millis())
            .execute(&self.pool)
            .await
            .map_err(Self::map_err)?;
        Ok(done.rows_affected() as usize)
    }
}
