use chrono::{DateTime, TimeDelta, Utc};
use credo_core::cache::CacheEntry;
use credo_db::{Database, DatabaseConfig};
use tempfile::TempDir;

/// Opens a fresh, migrated cache database inside a temporary directory.
///
/// The `TempDir` must be kept in scope for the test duration; dropping it
/// deletes the database file.
pub async fn setup_test_db() -> (Database, TempDir) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let db = open_at(&dir).await;
    (db, dir)
}

/// Opens (and migrates) the database file inside `dir`.
pub async fn open_at(dir: &TempDir) -> Database {
    let path = dir.path().join("nested").join("cache.db");
    let config = DatabaseConfig::new(format!("sqlite://{}", path.display()));
    let db = Database::connect(&config)
        .await
        .expect("Failed to open cache database");
    db.migrate().await.expect("Failed to run migrations");
    db
}

pub fn entry(key: &str, created_at: DateTime<Utc>, ttl: TimeDelta) -> CacheEntry {
    CacheEntry {
        fingerprint: key.to_string(),
        company_name: format!("Company {key}"),
        country: Some("BR".into()),
        payload: serde_json::json!({"key": key}).to_string(),
        created_at,
        expires_at: created_at + ttl,
    }
}
