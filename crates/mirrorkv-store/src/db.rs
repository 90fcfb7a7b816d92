//! SQLite connection handle.
//!
//! [`Database`] owns one `rusqlite::Connection` shared by every clone of the
//! handle.  All statements run on tokio's blocking pool so a backend call
//! never parks an async worker.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::migration;

/// Where a [`Database`] keeps its pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    File(PathBuf),
    /// Private to this handle and its clones; gone when the last one drops.
    Memory,
}

/// Cloneable handle to one SQLite connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    location: Arc<Location>,
}

impl Database {
    /// Open or create the file at `path`.  Does blocking I/O; async callers
    /// want [`Database::open_and_migrate`].
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        info!(path = %path.display(), "database opened");
        Self::wrap(conn, Location::File(path.to_path_buf()))
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        debug!("in-memory database opened");
        Self::wrap(conn, Location::Memory)
    }

    /// Open `path` on the blocking pool, then bring the schema up to date.
    pub async fn open_and_migrate(path: impl AsRef<Path> + Send + 'static) -> StoreResult<Self> {
        let db = tokio::task::spawn_blocking(move || Self::open(path)).await??;
        db.run_migrations().await?;
        Ok(db)
    }

    pub async fn run_migrations(&self) -> StoreResult<()> {
        self.execute_mut(migration::run_all).await
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Run a read or single-statement closure against the connection.
    pub async fn execute<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        self.execute_mut(move |conn| f(conn)).await
    }

    /// Like [`Database::execute`], with the mutable access that
    /// `Connection::transaction` needs.
    pub async fn execute_mut<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = lock(&conn)?;
            f(&mut guard)
        })
        .await?
    }

    fn wrap(conn: Connection, location: Location) -> StoreResult<Self> {
        // Readers never wait on the writer; a second process on the same
        // file waits up to five seconds for the write lock.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            location: Arc::new(location),
        })
    }
}

fn lock(conn: &Mutex<Connection>) -> StoreResult<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|_| StoreError::TaskJoin("database connection mutex poisoned".into()))
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

// ── tests ────────────────────────────────────────────────────────────
