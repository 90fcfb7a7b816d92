//! In-process backend.
//!
//! Values are kept as serialized JSON text so the persisted copy is always
//! independent of the caller's value, the same way a real durable store
//! behaves.  Namespaces live in a [`DashMap`] owned by the provider; every
//! backend opened on the same provider and namespace shares one map.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tracing::debug;

use crate::backend::{Backend, BackendProvider};
use crate::error::{StoreError, StoreResult};

type Namespace = Arc<Mutex<BTreeMap<String, String>>>;

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// A [`Backend`] held entirely in memory.
#[derive(Clone)]
pub struct MemoryBackend {
    namespace: String,
    items: Namespace,
}

impl MemoryBackend {
    /// Create a standalone backend that shares nothing with other instances.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            items: Arc::default(),
        }
    }

    fn with_items<T>(&self, f: impl FnOnce(&mut BTreeMap<String, String>) -> T) -> StoreResult<T> {
        let mut items = self
            .items
            .lock()
            .map_err(|e| StoreError::TaskJoin(format!("mutex poisoned: {e}")))?;
        Ok(f(&mut items))
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn get_item(&self, key: &str) -> StoreResult<Option<Value>> {
        let raw = self.with_items(|items| items.get(key).cloned())?;
        debug!(namespace = %self.namespace, key, hit = raw.is_some(), "memory get");
        match raw {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    async fn set_item(&self, key: &str, value: &Value) -> StoreResult<()> {
        let text = serde_json::to_string(value)?;
        self.with_items(|items| items.insert(key.to_string(), text))?;
        debug!(namespace = %self.namespace, key, "memory set");
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> StoreResult<()> {
        self.with_items(|items| items.remove(key))?;
        debug!(namespace = %self.namespace, key, "memory remove");
        Ok(())
    }

    async fn keys(&self) -> StoreResult<Vec<String>> {
        self.with_items(|items| items.keys().cloned().collect())
    }

    async fn clear(&self) -> StoreResult<()> {
        let dropped = self.with_items(|items| {
            let n = items.len();
            items.clear();
            n
        })?;
        debug!(namespace = %self.namespace, dropped, "memory clear");
        Ok(())
    }

    async fn len(&self) -> StoreResult<usize> {
        self.with_items(|items| items.len())
    }
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Hands out [`MemoryBackend`]s that share data per namespace.
#[derive(Clone, Default)]
pub struct MemoryProvider {
    namespaces: Arc<DashMap<String, Namespace>>,
}

impl MemoryProvider {
    /// Create an isolated provider.  Useful for tests.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide provider used when no other backend is configured.
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<MemoryProvider>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(MemoryProvider::new())))
    }

    /// Names of every namespace opened on this provider.
    pub fn namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self.namespaces.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl BackendProvider for MemoryProvider {
    fn kind(&self) -> &'static str {
        "memory"
    }

    fn open(&self, namespace: &str) -> StoreResult<Arc<dyn Backend>> {
        if namespace.is_empty() {
            return Err(StoreError::InvalidArgument("namespace must not be empty".into()));
        }
        let items = Arc::clone(
            self.namespaces
                .entry(namespace.to_string())
                .or_default()
                .value(),
        );
        Ok(Arc::new(MemoryBackend {
            namespace: namespace.to_string(),
            items,
        }))
    }
}

// ── tests ────────────────────────────────────────────────────────────
