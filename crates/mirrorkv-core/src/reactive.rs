//! Reactive field registry.
//!
//! Every key gets exactly one [`watch`] cell the first time it is declared.
//! The cell outlives removal, so subscribers keep their receiver and see the
//! reset to `null` and any later re-set.  Store-wide changes are described
//! by [`FieldChange`] and fanned out by the engine over a broadcast channel.
//!
//! Write interceptors run before a value reaches its cell and may rewrite
//! or veto it.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;

/// Plain mapping of key to value, as returned by snapshots and restores.
pub type Fields = serde_json::Map<String, Value>;

// ---------------------------------------------------------------------------
// Change events
// ---------------------------------------------------------------------------

/// What happened to a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// The key joined the key set (first declaration or re-set after removal).
    Add,
    /// An existing key changed value.
    Update,
    /// The key was removed and its value reset to `null`.
    Remove,
}

/// A single observed change to one field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChange {
    pub key: String,
    pub kind: ChangeKind,
    pub old: Value,
    pub new: Value,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Ordered key set plus one reactive cell per key ever declared.
#[derive(Debug, Default)]
pub(crate) struct FieldRegistry {
    keys: Vec<String>,
    cells: HashMap<String, watch::Sender<Value>>,
    removed: HashSet<String>,
}

impl FieldRegistry {
    /// Make `key` known with a `null` value if it has never been declared.
    /// Removed keys stay removed.
    pub fn declare(&mut self, key: &str) -> Option<FieldChange> {
        if self.cells.contains_key(key) {
            return None;
        }
        self.cells
            .insert(key.to_string(), watch::Sender::new(Value::Null));
        self.keys.push(key.to_string());
        Some(FieldChange {
            key: key.to_string(),
            kind: ChangeKind::Add,
            old: Value::Null,
            new: Value::Null,
        })
    }

    /// Store `value` under `key`, listing the key again if it was removed.
    ///
    /// Returns the change, or `None` when the key was already listed and
    /// the value is unchanged (subscribers are not woken in that case).
    pub fn write(&mut self, key: &str, value: Value) -> Option<FieldChange> {
        let listed = self.cells.contains_key(key) && !self.removed.contains(key);
        if !self.cells.contains_key(key) {
            self.cells
                .insert(key.to_string(), watch::Sender::new(Value::Null));
        }
        if !listed {
            self.removed.remove(key);
            self.keys.push(key.to_string());
        }

        let cell = self.cells.get(key)?;
        let old = cell.borrow().clone();
        if listed && old == value {
            return None;
        }
        if old != value {
            cell.send_replace(value.clone());
        }
        Some(FieldChange {
            key: key.to_string(),
            kind: if listed { ChangeKind::Update } else { ChangeKind::Add },
            old,
            new: value,
        })
    }

    /// Unlist `key` and reset its value to `null`.  Returns `None` if the
    /// key was not listed.
    pub fn remove(&mut self, key: &str) -> Option<FieldChange> {
        let position = self.keys.iter().position(|k| k == key)?;
        self.keys.remove(position);
        self.removed.insert(key.to_string());

        let old = self
            .cells
            .get(key)
            .map(|cell| cell.send_replace(Value::Null))
            .unwrap_or(Value::Null);
        Some(FieldChange {
            key: key.to_string(),
            kind: ChangeKind::Remove,
            old,
            new: Value::Null,
        })
    }

    /// Current value of `key`, `null` if unknown.
    pub fn value(&self, key: &str) -> Value {
        self.cells
            .get(key)
            .map(|cell| cell.borrow().clone())
            .unwrap_or(Value::Null)
    }

    /// Listed keys in insertion order.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Whether `key` is currently listed.
    pub fn is_listed(&self, key: &str) -> bool {
        self.cells.contains_key(key) && !self.removed.contains(key)
    }

    /// Whether `key` was removed and not re-set since.
    pub fn is_removed(&self, key: &str) -> bool {
        self.removed.contains(key)
    }

    /// A receiver for `key`'s cell, if the key was ever declared.
    pub fn subscribe(&self, key: &str) -> Option<watch::Receiver<Value>> {
        self.cells.get(key).map(watch::Sender::subscribe)
    }

    /// Deep copy of every listed field.
    pub fn snapshot(&self) -> Fields {
        self.keys
            .iter()
            .map(|key| (key.clone(), self.value(key)))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Interceptors
// ---------------------------------------------------------------------------

/// Handler run on every write before it is applied.  Return the value to
/// store (possibly rewritten), or `None` to veto the write.
pub type InterceptFn = dyn Fn(&str, Value) -> Option<Value> + Send + Sync;

/// Handle returned by [`crate::Store::intercept`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterceptorId(u64);

#[derive(Default)]
pub(crate) struct Interceptors {
    next_id: AtomicU64,
    handlers: RwLock<Vec<(InterceptorId, Arc<InterceptFn>)>>,
}

impl Interceptors {
    pub fn add(&self, handler: Arc<InterceptFn>) -> InterceptorId {
        let id = InterceptorId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, handler));
        id
    }

    pub fn remove(&self, id: InterceptorId) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        handlers.len() != before
    }

    /// Run every handler in registration order.  Handlers are called
    /// without any lock held, so they may read the store.
    pub fn apply(&self, key: &str, value: Value) -> Option<Value> {
        let handlers: Vec<Arc<InterceptFn>> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();
        handlers
            .iter()
            .try_fold(value, |value, handler| handler(key, value))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
