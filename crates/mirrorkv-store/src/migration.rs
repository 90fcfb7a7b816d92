//! Schema migrations.
//!
//! Migrations are static SQL keyed by version.  Applied versions are
//! recorded in a `_migrations` table so running them again is a no-op.

use rusqlite::{Connection, TransactionBehavior};
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// All migrations in order.  Append only.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "namespaced key-value rows",
        sql: r#"
            CREATE TABLE kv_items (
                namespace  TEXT NOT NULL,
                key        TEXT NOT NULL,
                value      TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (namespace, key)
            ) WITHOUT ROWID;
        "#,
    },
    Migration {
        version: 2,
        description: "kv_items recency index for namespace dumps",
        sql: r#"
            CREATE INDEX idx_kv_items_updated ON kv_items(namespace, updated_at);
        "#,
    },
];

/// Bring `conn` up to the latest schema version.  Blocking.
pub fn run_all(conn: &mut Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version     INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at  INTEGER NOT NULL
        );",
    )
    .map_err(|e| failed(0, "create _migrations", e))?;

    let from = current_version(conn)?;
    let mut applied = 0;
    for migration in MIGRATIONS.iter().filter(|m| m.version > from) {
        apply(conn, migration)?;
        applied += 1;
    }

    if applied == 0 {
        debug!(version = from, "schema is up to date");
    } else {
        info!(from, to = from + applied, "schema migrated");
    }
    Ok(())
}

/// Highest applied version, 0 for a fresh database.
pub fn current_version(conn: &Connection) -> StoreResult<u32> {
    conn.query_row("SELECT COALESCE(MAX(version), 0) FROM _migrations", [], |row| row.get(0))
        .map_err(|e| failed(0, "read version", e))
}

/// One migration per transaction; a failure leaves the previous version
/// in place.
fn apply(conn: &mut Connection, migration: &Migration) -> StoreResult<()> {
    let version = migration.version;
    debug!(version, description = migration.description, "applying migration");

    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| failed(version, "begin", e))?;
    if let Err(e) = tx.execute_batch(migration.sql) {
        warn!(version, error = %e, "migration rolled back");
        return Err(failed(version, "apply", e));
    }
    tx.execute(
        "INSERT INTO _migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![version, migration.description, chrono::Utc::now().timestamp()],
    )
    .map_err(|e| failed(version, "record", e))?;
    tx.commit().map_err(|e| failed(version, "commit", e))
}

fn failed(version: u32, stage: &str, e: rusqlite::Error) -> StoreError {
    StoreError::Migration {
        version,
        message: format!("{stage}: {e}"),
    }
}

// ── tests ────────────────────────────────────────────────────────────
