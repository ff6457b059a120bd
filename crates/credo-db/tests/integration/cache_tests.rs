use std::time::Duration;

use chrono::{TimeDelta, Utc};
use credo_core::cache::{Fingerprint, ResultCache};
use credo_core::models::{AggregateResult, Agency, SourceResult};
use credo_core::traits::CacheStore;

use crate::integration::common::{entry, open_at, setup_test_db};

#[tokio::test]
async fn upsert_and_load_round_trip_preserves_millis() {
    let (db, _dir) = setup_test_db().await;
    let store = db.cache_store();

    let created = Utc::now();
    let row = entry("k1", created, TimeDelta::days(7));
    store.upsert(&row).await.unwrap();

    let loaded = store.load("k1").await.unwrap().expect("row should exist");
    assert_eq!(loaded.company_name, "Company k1");
    assert_eq!(loaded.country.as_deref(), Some("BR"));
    assert_eq!(loaded.payload, row.payload);
    assert_eq!(
        loaded.created_at.timestamp_millis(),
        created.timestamp_millis()
    );
    assert_eq!(
        loaded.expires_at.timestamp_millis(),
        row.expires_at.timestamp_millis()
    );
}

#[tokio::test]
async fn upsert_replaces_existing_row() {
    let (db, _dir) = setup_test_db().await;
    let store = db.cache_store();

    let mut row = entry("k1", Utc::now(), TimeDelta::days(7));
    store.upsert(&row).await.unwrap();
    row.payload = r#"{"v":2}"#.into();
    row.country = None;
    store.upsert(&row).await.unwrap();

    let loaded = store.load("k1").await.unwrap().unwrap();
    assert_eq!(loaded.payload, r#"{"v":2}"#);
    assert!(loaded.country.is_none());
    assert_eq!(store.count().await.unwrap(), 1);
}

#[tokio::test]
async fn remove_expired_only_deletes_past_rows() {
    let (db, _dir) = setup_test_db().await;
    let store = db.cache_store();

    let now = Utc::now();
    store
        .upsert(&entry("old", now - TimeDelta::days(8), TimeDelta::days(7)))
        .await
        .unwrap();
    store
        .upsert(&entry("fresh", now, TimeDelta::days(7)))
        .await
        .unwrap();

    assert_eq!(store.remove_expired(now).await.unwrap(), 1);
    assert!(store.load("old").await.unwrap().is_none());
    assert!(store.load("fresh").await.unwrap().is_some());
}

#[tokio::test]
async fn remove_and_clear_report_counts() {
    let (db, _dir) = setup_test_db().await;
    let store = db.cache_store();

    for key in ["a", "b", "c"] {
        store
            .upsert(&entry(key, Utc::now(), TimeDelta::days(1)))
            .await
            .unwrap();
    }

    assert!(store.remove("a").await.unwrap());
    assert!(!store.remove("a").await.unwrap());
    assert_eq!(store.clear().await.unwrap(), 2);
    assert_eq!(store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn cached_result_survives_reopen() {
    let (db, dir) = setup_test_db().await;
    let fp = Fingerprint::for_query("Petrobras", Some("BR")).unwrap();

    let mut by_source = std::collections::BTreeMap::new();
    by_source.insert(Agency::Fitch, SourceResult::NotFound);
    let result = AggregateResult {
        query: "Petrobras".into(),
        country: Some("BR".into()),
        resolved: None,
        by_source,
        notes: vec![],
        served_from_cache: false,
        timestamp: Utc::now(),
    };

    let cache = ResultCache::new(db.cache_store(), Duration::from_secs(3600)).unwrap();
    cache.set(&fp, &result).await;
    db.close().await;

    let reopened = open_at(&dir).await;
    let cache = ResultCache::new(reopened.cache_store(), Duration::from_secs(3600)).unwrap();
    let hit = cache.get(&fp).await.expect("entry should persist across restarts");

    assert!(hit.served_from_cache);
    assert_eq!(hit.query, "Petrobras");
    assert_eq!(hit.by_source.get(&Agency::Fitch), Some(&SourceResult::NotFound));
}

#[tokio::test]
async fn migrations_are_idempotent() {
    let (db, _dir) = setup_test_db().await;
    db.migrate().await.unwrap();
    db.ping().await.unwrap();
}
