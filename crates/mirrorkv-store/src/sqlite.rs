//! SQLite-backed persistence.
//!
//! Every namespace shares one `kv_items` table; rows are keyed by
//! `(namespace, key)` and values are stored as JSON text.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::backend::{Backend, BackendProvider};
use crate::db::Database;
use crate::error::{StoreError, StoreResult};

/// One namespace of a SQLite [`Database`].
#[derive(Clone, Debug)]
pub struct SqliteBackend {
    db: Database,
    namespace: Arc<str>,
}

impl SqliteBackend {
    /// Create a backend for `namespace` on an already migrated `db`.
    pub fn new(db: Database, namespace: impl Into<Arc<str>>) -> Self {
        Self {
            db,
            namespace: namespace.into(),
        }
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    #[instrument(skip(self), fields(namespace = %self.namespace))]
    async fn get_item(&self, key: &str) -> StoreResult<Option<Value>> {
        let namespace = self.namespace.to_string();
        let key = key.to_string();
        let raw: Option<String> = self
            .db
            .execute(move |conn| {
                let result = conn.query_row(
                    "SELECT value FROM kv_items WHERE namespace = ?1 AND key = ?2",
                    rusqlite::params![namespace, key],
                    |row| row.get(0),
                );
                match result {
                    Ok(value) => Ok(Some(value)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await?;

        match raw {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, value), fields(namespace = %self.namespace))]
    async fn set_item(&self, key: &str, value: &Value) -> StoreResult<()> {
        let namespace = self.namespace.to_string();
        let key = key.to_string();
        let text = serde_json::to_string(value)?;
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO kv_items (namespace, key, value, updated_at) VALUES (?1, ?2, ?3, ?4) \
                     ON CONFLICT(namespace, key) DO UPDATE SET \
                        value = excluded.value, updated_at = excluded.updated_at",
                    rusqlite::params![
                        namespace,
                        key,
                        text,
                        chrono::Utc::now().timestamp_millis()
                    ],
                )?;
                debug!(key = %key, "kv item stored");
                Ok(())
            })
            .await
    }

    #[instrument(skip(self), fields(namespace = %self.namespace))]
    async fn remove_item(&self, key: &str) -> StoreResult<()> {
        let namespace = self.namespace.to_string();
        let key = key.to_string();
        self.db
            .execute(move |conn| {
                let deleted = conn.execute(
                    "DELETE FROM kv_items WHERE namespace = ?1 AND key = ?2",
                    rusqlite::params![namespace, key],
                )?;
                debug!(key = %key, existed = deleted > 0, "kv item removed");
                Ok(())
            })
            .await
    }

    async fn keys(&self) -> StoreResult<Vec<String>> {
        let namespace = self.namespace.to_string();
        self.db
            .execute(move |conn| {
                let mut stmt =
                    conn.prepare("SELECT key FROM kv_items WHERE namespace = ?1 ORDER BY key")?;
                let rows = stmt.query_map(rusqlite::params![namespace], |row| row.get(0))?;
                let mut keys: Vec<String> = Vec::new();
                for row in rows {
                    keys.push(row?);
                }
                Ok(keys)
            })
            .await
    }

    #[instrument(skip(self), fields(namespace = %self.namespace))]
    async fn clear(&self) -> StoreResult<()> {
        let namespace = self.namespace.to_string();
        self.db
            .execute(move |conn| {
                let deleted = conn.execute(
                    "DELETE FROM kv_items WHERE namespace = ?1",
                    rusqlite::params![namespace],
                )?;
                debug!(deleted, "namespace cleared");
                Ok(())
            })
            .await
    }

    async fn len(&self) -> StoreResult<usize> {
        let namespace = self.namespace.to_string();
        let count: i64 = self
            .db
            .execute(move |conn| {
                Ok(conn.query_row(
                    "SELECT count(*) FROM kv_items WHERE namespace = ?1",
                    rusqlite::params![namespace],
                    |row| row.get(0),
                )?)
            })
            .await?;
        usize::try_from(count).map_err(|_| StoreError::InvalidArgument(format!("bad row count {count}")))
    }
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Hands out [`SqliteBackend`]s that all share one [`Database`].
#[derive(Clone, Debug)]
pub struct SqliteProvider {
    db: Database,
}

impl SqliteProvider {
    /// Wrap an already migrated database.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Open the database file at `path`, migrate it, and wrap it.
    pub async fn open_path(
        path: impl AsRef<std::path::Path> + Send + 'static,
    ) -> StoreResult<Self> {
        let db = Database::open_and_migrate(path).await?;
        info!("sqlite provider ready");
        Ok(Self::new(db))
    }

    /// The underlying database handle.
    pub fn database(&self) -> &Database {
        &self.db
    }
}

impl BackendProvider for SqliteProvider {
    fn kind(&self) -> &'static str {
        "sqlite"
    }

    fn open(&self, namespace: &str) -> StoreResult<Arc<dyn Backend>> {
        if namespace.is_empty() {
            return Err(StoreError::InvalidArgument("namespace must not be empty".into()));
        }
        Ok(Arc::new(SqliteBackend::new(self.db.clone(), namespace)))
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn setup() -> SqliteProvider {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();
        SqliteProvider::new(db)
    }

    #[tokio::test]
    async fn get_nonexistent_returns_none() {
        let provider = setup().await;
        let backend = provider.open("ns").unwrap();
        assert!(backend.get_item("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_overwrites() {
        let provider = setup().await;
        let backend = provider.open("ns").unwrap();

        backend.set_item("k", &json!("old")).await.unwrap();
        backend.set_item("k", &json!({"new": true})).await.unwrap();
        assert_eq!(backend.get_item("k").await.unwrap(), Some(json!({"new": true})));
        assert_eq!(backend.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn namespaces_are_isolated() {
        let provider = setup().await;
        let a = provider.open("a").unwrap();
        let b = provider.open("b").unwrap();

        a.set_item("k", &json!(1)).await.unwrap();
        assert!(b.get_item("k").await.unwrap().is_none());

        b.set_item("k", &json!(2)).await.unwrap();
        a.clear().await.unwrap();
        assert!(a.get_item("k").await.unwrap().is_none());
        assert_eq!(b.get_item("k").await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let provider = setup().await;
        let backend = provider.open("ns").unwrap();

        backend.set_item("k", &json!(true)).await.unwrap();
        backend.remove_item("k").await.unwrap();
        backend.remove_item("k").await.unwrap();
        assert!(backend.get_item("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn keys_are_sorted() {
        let provider = setup().await;
        let backend = provider.open("ns").unwrap();
        for key in ["zeta", "alpha", "mid"] {
            backend.set_item(key, &Value::Null).await.unwrap();
        }
        assert_eq!(backend.keys().await.unwrap(), vec!["alpha", "mid", "zeta"]);
    }
}
