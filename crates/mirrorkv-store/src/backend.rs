//! Core persistence traits.
//!
//! A [`Backend`] is one namespace of a durable key-value store.  A
//! [`BackendProvider`] hands out backends by namespace name; opening the
//! same namespace twice yields two views of the same data.
//!
//! Both traits are object safe and are used as `Arc<dyn Backend>` /
//! `Arc<dyn BackendProvider>` so the engine never depends on a concrete
//! storage technology.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StoreResult;

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// A namespaced, asynchronous key-value store.
///
/// Implementations must tolerate concurrent independent key operations:
/// batch operations in the engine issue per-key calls without ordering
/// among themselves.
#[async_trait]
pub trait Backend: Send + Sync {
    /// The namespace this backend reads and writes.
    fn namespace(&self) -> &str;

    /// Load the value stored under `key`, or `None` if nothing is stored.
    async fn get_item(&self, key: &str) -> StoreResult<Option<Value>>;

    /// Store `value` under `key`, replacing any previous value.
    async fn set_item(&self, key: &str, value: &Value) -> StoreResult<()>;

    /// Delete `key`.  Deleting a missing key is not an error.
    async fn remove_item(&self, key: &str) -> StoreResult<()>;

    /// All keys currently stored in this namespace, sorted.
    async fn keys(&self) -> StoreResult<Vec<String>>;

    /// Delete every key in this namespace.
    async fn clear(&self) -> StoreResult<()>;

    /// Number of keys currently stored in this namespace.
    async fn len(&self) -> StoreResult<usize> {
        Ok(self.keys().await?.len())
    }
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Creates [`Backend`] instances keyed by namespace name.
pub trait BackendProvider: Send + Sync {
    /// Short, human-readable name of the storage technology (for logs).
    fn kind(&self) -> &'static str;

    /// Open (or create) the backend for `namespace`.
    fn open(&self, namespace: &str) -> StoreResult<Arc<dyn Backend>>;
}
