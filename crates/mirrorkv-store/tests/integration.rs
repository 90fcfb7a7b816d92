//! Integration tests for the mirrorkv-store crate.
//!
//! These run the SQLite backend against a real database file on disk
//! (via tempfile) and check that data survives reopening.

use std::sync::Arc;

use mirrorkv_store::{
    Backend, BackendProvider, CacheSettings, CachingProvider, Database, MemoryProvider,
    SqliteProvider,
};
use serde_json::json;

// ═══════════════════════════════════════════════════════════════════════
//  Database lifecycle
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn database_open_and_migrate_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("kv.db");

    let first = Database::open_and_migrate(db_path.clone()).await.unwrap();
    drop(first);

    let second = Database::open_and_migrate(db_path.clone()).await.unwrap();
    let count: i64 = second
        .execute(|conn| {
            let c: i64 = conn.query_row("SELECT count(*) FROM kv_items", [], |row| row.get(0))?;
            Ok(c)
        })
        .await
        .unwrap();
    assert_eq!(count, 0);
    assert!(db_path.exists());
}

// ═══════════════════════════════════════════════════════════════════════
//  Durability
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn values_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("kv.db");

    {
        let provider = SqliteProvider::open_path(db_path.clone()).await.unwrap();
        let backend = provider.open("prefs").unwrap();
        backend
            .set_item("layout", &json!({"sidebar": {"width": 240, "open": true}}))
            .await
            .unwrap();
        backend.set_item("count", &json!(5)).await.unwrap();
    }

    let provider = SqliteProvider::open_path(db_path).await.unwrap();
    let backend = provider.open("prefs").unwrap();
    assert_eq!(
        backend.get_item("layout").await.unwrap(),
        Some(json!({"sidebar": {"width": 240, "open": true}}))
    );
    assert_eq!(backend.get_item("count").await.unwrap(), Some(json!(5)));
    assert_eq!(backend.keys().await.unwrap(), vec!["count", "layout"]);
}

#[tokio::test]
async fn concurrent_independent_keys() {
    let dir = tempfile::tempdir().unwrap();
    let provider = SqliteProvider::open_path(dir.path().join("kv.db"))
        .await
        .unwrap();
    let backend = provider.open("ns").unwrap();

    let writes = (0..20).map(|i| {
        let backend = Arc::clone(&backend);
        async move { backend.set_item(&format!("k{i:02}"), &json!(i)).await }
    });
    for result in futures::future::join_all(writes).await {
        result.unwrap();
    }

    assert_eq!(backend.len().await.unwrap(), 20);
    assert_eq!(backend.get_item("k07").await.unwrap(), Some(json!(7)));
}

// ═══════════════════════════════════════════════════════════════════════
//  Providers
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn caching_provider_over_sqlite() {
    let db = Database::open_in_memory().unwrap();
    db.run_migrations().await.unwrap();
    let sqlite: Arc<dyn BackendProvider> = Arc::new(SqliteProvider::new(db));
    let provider = CachingProvider::new(Arc::clone(&sqlite), CacheSettings::default());

    let cached = provider.open("ns").unwrap();
    let direct = sqlite.open("ns").unwrap();

    cached.set_item("k", &json!([1, 2, 3])).await.unwrap();
    assert_eq!(direct.get_item("k").await.unwrap(), Some(json!([1, 2, 3])));

    cached.remove_item("k").await.unwrap();
    assert!(direct.get_item("k").await.unwrap().is_none());
    assert!(cached.get_item("k").await.unwrap().is_none());
    assert_eq!(provider.kind(), "sqlite");
}

#[tokio::test]
async fn global_memory_provider_is_shared() {
    let a = MemoryProvider::global().open("it-global-shared").unwrap();
    let b = MemoryProvider::global().open("it-global-shared").unwrap();

    a.set_item("k", &json!("v")).await.unwrap();
    assert_eq!(b.get_item("k").await.unwrap(), Some(json!("v")));
    b.clear().await.unwrap();
    assert!(a.get_item("k").await.unwrap().is_none());
}
