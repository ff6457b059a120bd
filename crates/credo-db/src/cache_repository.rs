use chrono::{DateTime, Utc};
use credo_core::cache::CacheEntry;
use credo_core::error::AppError;
use credo_core::traits::CacheStore;
use sqlx::SqlitePool;

/// [`CacheStore`] persisted in the `ratings_cache` table.
///
/// Timestamps are stored as epoch milliseconds.
#[derive(Clone)]
pub struct SqliteCacheStore {
    pool: SqlitePool,
}

impl SqliteCacheStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Number of rows currently stored, expired or not.
    pub async fn count(&self) -> Result<u64, AppError> {
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM ratings_cache")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(n.max(0) as u64)
    }
}

/// Connection-level failures mean the cache is unreachable; the rest are
/// query or data problems.
pub(crate) fn map_sqlx_error(e: sqlx::Error) -> AppError {
    match e {
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::WorkerCrashed => AppError::CacheUnavailable(e.to_string()),
        other => AppError::DatabaseError(other.to_string()),
    }
}

#[derive(sqlx::FromRow)]
struct CacheRow {
    cache_key: String,
    company_name: String,
    country: Option<String>,
    response_data: String,
    created_at: i64,
    expires_at: i64,
}

fn from_millis(column: &str, millis: i64) -> Result<DateTime<Utc>, AppError> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        AppError::DatabaseError(format!("{column} out of range: {millis}"))
    })
}

impl TryFrom<CacheRow> for CacheEntry {
    type Error = AppError;

    fn try_from(row: CacheRow) -> Result<Self, Self::Error> {
        Ok(CacheEntry {
            fingerprint: row.cache_key,
            company_name: row.company_name,
            country: row.country,
            payload: row.response_data,
            created_at: from_millis("created_at", row.created_at)?,
            expires_at: from_millis("expires_at", row.expires_at)?,
        })
    }
}

impl CacheStore for SqliteCacheStore {
    async fn load(&self, key: &str) -> Result<Option<CacheEntry>, AppError> {
        let row = sqlx::query_as::<_, CacheRow>(
            r#"
            SELECT cache_key, company_name, country, response_data, created_at, expires_at
            FROM ratings_cache
            WHERE cache_key = ?
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(CacheEntry::try_from).transpose()
    }

    async fn upsert(&self, entry: &CacheEntry) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO ratings_cache (cache_key, company_name, country, response_data, created_at, expires_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(cache_key) DO UPDATE SET
                company_name = excluded.company_name,
                country = excluded.country,
                response_data = excluded.response_data,
                created_at = excluded.created_at,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(&entry.fingerprint)
        .bind(&entry.company_name)
        .bind(&entry.country)
        .bind(&entry.payload)
        .bind(entry.created_at.timestamp_millis())
        .bind(entry.expires_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM ratings_cache WHERE cache_key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_expired(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM ratings_cache WHERE expires_at < ?")
            .bind(now.timestamp_millis())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }

    async fn clear(&self) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM ratings_cache")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }
}
