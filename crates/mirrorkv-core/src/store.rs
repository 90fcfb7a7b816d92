//! Reconciliation engine.
//!
//! [`Store`] owns the ordered key set, one reactive cell per key, and the
//! merge policy between in-memory values and a namespaced [`Backend`].
//!
//! # Readiness lifecycle
//!
//! ```text
//! Constructing ──▶ PopulatingDefaults ──▶ RestoringFromBackend ──▶ Ready
//!                          │                        └────────────▶ Failed
//!                          └──────────── (no backend) ───────────▶ Ready
//! ```
//!
//! `RestoringFromBackend` is only entered when the store has a name.  The
//! restore runs on a spawned task; [`Store::ready`] resolves once it
//! settles.
//!
//! # Merge policy
//!
//! A value read from the backend replaces the in-memory value only when it
//! is present and not `null`.  Otherwise the in-memory value (a default or
//! something assigned before the restore finished) is kept.
//!
//! # Skip-null writes
//!
//! A `null` value is never written to the backend, so declaring a field
//! cannot erase a value persisted earlier.
//!
//! # Write ordering
//!
//! Every backend write and delete for a key goes through the store's
//! [`Debouncer`], which runs at most one of them per key at a time.  A
//! `remove_item` or an immediate write issued while an earlier write is
//! still in flight waits for it, so the backend ends in call order.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use futures::future::try_join_all;
use mirrorkv_store::{Backend, BackendProvider, MemoryProvider};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, trace, warn};

use crate::debounce::Debouncer;
use crate::error::{MirrorError, MirrorResult, unshare};
use crate::options::{SetOptions, StoreOptions};
use crate::reactive::{FieldChange, FieldRegistry, Fields, InterceptorId, Interceptors};

/// Capacity of the store-wide change channel.  Slow observers that fall
/// further behind receive `RecvError::Lagged`.
const CHANGE_CAPACITY: usize = 256;

type PersistResult = Result<(), Arc<MirrorError>>;

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// Where a store is in its readiness lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Constructing,
    PopulatingDefaults,
    RestoringFromBackend,
    Ready,
    /// The initial restore hit a backend error.
    Failed,
}

impl Phase {
    /// Whether the lifecycle has reached a terminal phase.
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Ready | Self::Failed)
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// An observable key-value store mirrored into a persistent backend.
///
/// Cheap to clone; every clone is a handle to the same store.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Inner>,
}

struct Inner {
    name: Option<String>,
    options: StoreOptions,
    backend: Option<Arc<dyn Backend>>,
    /// Keys declared at construction; the default scope of `save`.
    original_keys: Vec<String>,
    fields: Mutex<FieldRegistry>,
    interceptors: Interceptors,
    changes: broadcast::Sender<Arc<FieldChange>>,
    phase: watch::Sender<Phase>,
    ready_flag: watch::Sender<bool>,
    outcome: OnceLock<Result<Fields, Arc<MirrorError>>>,
    /// Present exactly when `backend` is.
    persister: Option<Debouncer<String, Value, PersistResult>>,
}

impl Store {
    // ── construction ────────────────────────────────────────────────

    /// Declare `keys` with `null` values.
    ///
    /// With a name, the store restores every key from the backend in the
    /// background; await [`Store::ready`] for the reconciled values.
    pub fn from_keys<I, S>(keys: I, options: StoreOptions) -> MirrorResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let declared = keys.into_iter().map(|k| (k.into(), Value::Null)).collect();
        Self::build(declared, options)
    }

    /// Declare every key of `defaults` with its default value.
    ///
    /// Defaults are visible immediately.  With a name, they are reconciled
    /// against persisted values in the background; defaults are never
    /// written to the backend by construction.
    pub fn from_defaults<I, S>(defaults: I, options: StoreOptions) -> MirrorResult<Self>
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        let declared = defaults.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Self::build(declared, options)
    }

    /// A store with no declared keys.
    pub fn empty(options: StoreOptions) -> MirrorResult<Self> {
        Self::build(Vec::new(), options)
    }

    fn build(declared: Vec<(String, Value)>, options: StoreOptions) -> MirrorResult<Self> {
        let backend = match &options.name {
            Some(name) => {
                let provider: Arc<dyn BackendProvider> = match &options.provider {
                    Some(provider) => Arc::clone(provider),
                    None => MemoryProvider::global(),
                };
                Some(provider.open(name)?)
            }
            None => None,
        };

        // The restore is spawned, so a named store needs a runtime.
        let runtime = match backend {
            Some(_) => Some(
                tokio::runtime::Handle::try_current().map_err(|_| MirrorError::NoRuntime)?,
            ),
            None => None,
        };

        let persister = backend.as_ref().map(|backend| {
            let delay = options.debounce.unwrap_or(Duration::ZERO);
            Self::debounced_writer(Arc::clone(backend), delay)
        });

        let mut original_keys: Vec<String> = Vec::with_capacity(declared.len());
        for (key, _) in &declared {
            if !original_keys.contains(key) {
                original_keys.push(key.clone());
            }
        }

        let store = Self {
            inner: Arc::new(Inner {
                name: options.name.clone(),
                options,
                backend,
                original_keys,
                fields: Mutex::new(FieldRegistry::default()),
                interceptors: Interceptors::default(),
                changes: broadcast::channel(CHANGE_CAPACITY).0,
                phase: watch::Sender::new(Phase::Constructing),
                ready_flag: watch::Sender::new(false),
                outcome: OnceLock::new(),
                persister,
            }),
        };

        store.enter(Phase::PopulatingDefaults);
        {
            let mut fields = store.fields();
            for (key, value) in declared {
                fields.write(&key, value);
            }
        }

        info!(
            name = store.inner.name.as_deref().unwrap_or("<unnamed>"),
            keys = store.inner.original_keys.len(),
            persisted = store.inner.backend.is_some(),
            "store constructed"
        );

        match runtime {
            Some(runtime) => {
                store.enter(Phase::RestoringFromBackend);
                let task_store = store.clone();
                runtime.spawn(async move {
                    let outcome = task_store.restore(None).await;
                    task_store.settle(outcome);
                });
            }
            None => {
                let snapshot = store.to_snapshot();
                store.settle(Ok(snapshot));
            }
        }

        Ok(store)
    }

    fn debounced_writer(
        backend: Arc<dyn Backend>,
        delay: Duration,
    ) -> Debouncer<String, Value, PersistResult> {
        Debouncer::new(delay, move |key: String, value: Value| {
            let backend = Arc::clone(&backend);
            async move {
                backend
                    .set_item(&key, &value)
                    .await
                    .map_err(|e| Arc::new(MirrorError::from(e)))
            }
        })
    }

    fn enter(&self, phase: Phase) {
        trace!(?phase, "store phase");
        self.inner.phase.send_replace(phase);
    }

    fn settle(&self, outcome: MirrorResult<Fields>) {
        match outcome {
            Ok(fields) => {
                let _ = self.inner.outcome.set(Ok(fields));
                self.inner.ready_flag.send_replace(true);
                self.enter(Phase::Ready);
                info!(name = self.inner.name.as_deref().unwrap_or("<unnamed>"), "store ready");
            }
            Err(err) => {
                error!(name = self.inner.name.as_deref().unwrap_or("<unnamed>"), %err, "initial restore failed");
                let _ = self.inner.outcome.set(Err(Arc::new(err)));
                self.enter(Phase::Failed);
            }
        }
    }

    // ── readiness ───────────────────────────────────────────────────

    /// Wait for the initial restore and return the reconciled fields.
    ///
    /// Resolves immediately for unnamed stores.  May be awaited any number
    /// of times; every awaiter sees the same outcome.
    pub async fn ready(&self) -> MirrorResult<Fields> {
        let mut phase = self.inner.phase.subscribe();
        phase
            .wait_for(|p| p.is_settled())
            .await
            .map_err(|_| MirrorError::Cancelled)?;

        match self.inner.outcome.get() {
            Some(Ok(fields)) => Ok(fields.clone()),
            Some(Err(err)) => Err(MirrorError::Shared(Arc::clone(err))),
            None => Err(MirrorError::Cancelled),
        }
    }

    /// Whether the store has reached [`Phase::Ready`].
    pub fn is_ready(&self) -> bool {
        *self.inner.ready_flag.borrow()
    }

    /// The readiness flag as an observable cell: `false` until the store
    /// is ready, then `true`.  Never persisted and never listed as a key.
    pub fn watch_ready(&self) -> watch::Receiver<bool> {
        self.inner.ready_flag.subscribe()
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        *self.inner.phase.borrow()
    }

    // ── introspection ───────────────────────────────────────────────

    /// The namespace name, if the store is persisted.
    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    pub fn options(&self) -> &StoreOptions {
        &self.inner.options
    }

    /// Whether a backend is attached.
    pub fn has_backend(&self) -> bool {
        self.inner.backend.is_some()
    }

    /// The attached backend, if any.
    pub fn backend(&self) -> Option<&Arc<dyn Backend>> {
        self.inner.backend.as_ref()
    }

    /// Every listed key, in the order it was first declared or re-set.
    pub fn keys(&self) -> Vec<String> {
        self.fields().keys().to_vec()
    }

    /// The keys declared at construction.
    pub fn original_keys(&self) -> &[String] {
        &self.inner.original_keys
    }

    /// Whether `key` is currently listed.
    pub fn contains_key(&self, key: &str) -> bool {
        self.fields().is_listed(key)
    }

    /// Current in-memory value of `key` (`null` if unknown or removed).
    pub fn get(&self, key: &str) -> Value {
        self.fields().value(key)
    }

    /// A plain deep copy of every listed field.
    pub fn to_snapshot(&self) -> Fields {
        self.fields().snapshot()
    }

    // ── observation ─────────────────────────────────────────────────

    /// Subscribe to one field.  The receiver yields the current value and
    /// wakes on every change, including removal (reset to `null`).
    pub fn subscribe(&self, key: &str) -> MirrorResult<watch::Receiver<Value>> {
        self.fields()
            .subscribe(key)
            .ok_or_else(|| MirrorError::NotFound { key: key.to_string() })
    }

    /// Subscribe to every change on this store.
    ///
    /// Changes made before this call are not replayed.
    pub fn observe(&self) -> broadcast::Receiver<Arc<FieldChange>> {
        self.inner.changes.subscribe()
    }

    /// Register a handler run on every write before it is applied.  The
    /// handler may return a rewritten value, or `None` to veto the write
    /// (memory, observers and backend are then left untouched).
    pub fn intercept<F>(&self, handler: F) -> InterceptorId
    where
        F: Fn(&str, Value) -> Option<Value> + Send + Sync + 'static,
    {
        self.inner.interceptors.add(Arc::new(handler))
    }

    /// Unregister an interceptor.  Returns whether it was registered.
    pub fn remove_interceptor(&self, id: InterceptorId) -> bool {
        self.inner.interceptors.remove(id)
    }

    // ── field operations ────────────────────────────────────────────

    /// Write `key` and, unless `options.save` is false, persist it.
    ///
    /// With `value == None` the current in-memory value is persisted
    /// instead ("force persist").  A removed key is not persisted this way
    /// until it is set again.  `null` values are never persisted.
    pub async fn set_item(
        &self,
        key: &str,
        value: Option<Value>,
        options: SetOptions,
    ) -> MirrorResult<()> {
        let value = match value {
            Some(value) => match self.write_field(key, value) {
                Some(applied) => applied,
                None => return Ok(()),
            },
            None => match self.current_for_persist(key) {
                Some(current) => current,
                None => return Ok(()),
            },
        };

        if !options.save {
            return Ok(());
        }
        self.persist(key, value, options).await
    }

    /// Read `key` from the backend and reconcile it into memory.
    ///
    /// A present, non-null stored value replaces the in-memory value
    /// (without writing it back).  Otherwise the in-memory value is kept.
    /// Returns the reconciled value.
    ///
    /// Fails with [`MirrorError::NoBackend`] on an unnamed store.
    pub async fn get_item(&self, key: &str) -> MirrorResult<Value> {
        let backend = self.require_backend()?;
        let declared = self.fields().declare(key);
        self.publish(declared);

        match backend.get_item(key).await? {
            Some(stored) if !stored.is_null() => {
                debug!(key, "restored value from backend");
                self.set_item(key, Some(stored), SetOptions::no_save()).await?;
            }
            _ => debug!(key, "nothing stored, keeping in-memory value"),
        }
        Ok(self.get(key))
    }

    /// Unlist `key`, reset it to `null`, drop any pending debounced write
    /// for it, and delete it from the backend.  Idempotent.
    ///
    /// A write for `key` that is already running finishes before the
    /// delete is issued.
    pub async fn remove_item(&self, key: &str) -> MirrorResult<()> {
        let change = self.fields().remove(key);
        if change.is_some() {
            debug!(key, "field removed");
        }
        self.publish(change);

        let (Some(persister), Some(backend)) = (&self.inner.persister, &self.inner.backend) else {
            return Ok(());
        };
        let key = key.to_string();
        let _running = persister.lock(&key).await;
        if persister.discard(&key, Ok(())) {
            trace!(%key, "pending write dropped");
        }
        backend.remove_item(&key).await?;
        Ok(())
    }

    // ── batch operations ────────────────────────────────────────────

    /// Reconcile `keys` (default: every listed key) from the backend,
    /// concurrently.  The first backend error aborts the whole restore.
    ///
    /// Fails with [`MirrorError::NoBackend`] on an unnamed store.
    pub async fn restore(&self, keys: Option<&[&str]>) -> MirrorResult<Fields> {
        self.require_backend()?;
        let keys: Vec<String> = match keys {
            Some(keys) => keys.iter().map(|k| k.to_string()).collect(),
            None => self.keys(),
        };

        let values = try_join_all(keys.iter().map(|key| self.get_item(key))).await?;
        Ok(keys.into_iter().zip(values).collect())
    }

    /// [`Store::set_item`] every entry of `state`, concurrently.
    pub async fn set_state<I, S>(&self, state: I, options: SetOptions) -> MirrorResult<()>
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        let entries: Vec<(String, Value)> =
            state.into_iter().map(|(k, v)| (k.into(), v)).collect();
        try_join_all(
            entries
                .iter()
                .map(|(key, value)| self.set_item(key, Some(value.clone()), options)),
        )
        .await?;
        Ok(())
    }

    /// [`Store::remove_item`] every listed key, concurrently.  The key set
    /// is emptied; values are reset to `null`.
    pub async fn clear(&self) -> MirrorResult<()> {
        let keys = self.keys();
        try_join_all(keys.iter().map(|key| self.remove_item(key))).await?;
        Ok(())
    }

    /// Persist `keys` now, bypassing the debounce window.  Without `keys`,
    /// persists the keys declared at construction; keys added later are
    /// only included when passed explicitly or via [`Store::save_all`].
    pub async fn save(&self, keys: Option<&[&str]>) -> MirrorResult<()> {
        let keys: Vec<String> = match keys {
            Some(keys) => keys.iter().map(|k| k.to_string()).collect(),
            None => self.inner.original_keys.clone(),
        };
        self.persist_now(&keys).await
    }

    /// Persist every listed key except `except`, bypassing the debounce
    /// window.
    pub async fn save_all(&self, except: &[&str]) -> MirrorResult<()> {
        let keys: Vec<String> = self
            .keys()
            .into_iter()
            .filter(|key| !except.contains(&key.as_str()))
            .collect();
        self.persist_now(&keys).await
    }

    /// Run every pending debounced write now.
    pub async fn flush(&self) -> MirrorResult<()> {
        let Some(persister) = &self.inner.persister else {
            return Ok(());
        };
        for result in persister.flush().await {
            result.map_err(unshare)?;
        }
        Ok(())
    }

    // ── internals ───────────────────────────────────────────────────

    fn fields(&self) -> MutexGuard<'_, FieldRegistry> {
        // Every registry method leaves it consistent, so a panic elsewhere
        // cannot have left a half-applied write behind.
        self.inner
            .fields
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, change: Option<FieldChange>) {
        if let Some(change) = change {
            // No observers is fine.
            let _ = self.inner.changes.send(Arc::new(change));
        }
    }

    fn require_backend(&self) -> MirrorResult<Arc<dyn Backend>> {
        self.inner
            .backend
            .as_ref()
            .map(Arc::clone)
            .ok_or(MirrorError::NoBackend)
    }

    /// Run interceptors, then apply the write.  `None` if vetoed.
    fn write_field(&self, key: &str, value: Value) -> Option<Value> {
        let Some(value) = self.inner.interceptors.apply(key, value) else {
            warn!(key, "write vetoed by interceptor");
            return None;
        };
        let change = self.fields().write(key, value.clone());
        if let Some(change) = &change {
            trace!(key, kind = ?change.kind, "field written");
        }
        self.publish(change);
        Some(value)
    }

    /// The value a force-persist of `key` would write, declaring the key if
    /// it is new.  `None` for removed keys.
    fn current_for_persist(&self, key: &str) -> Option<Value> {
        let (change, current) = {
            let mut fields = self.fields();
            if fields.is_removed(key) {
                debug!(key, "removed key is not persisted until set again");
                return None;
            }
            (fields.declare(key), fields.value(key))
        };
        self.publish(change);
        Some(current)
    }

    async fn persist(&self, key: &str, value: Value, options: SetOptions) -> MirrorResult<()> {
        let Some(persister) = &self.inner.persister else {
            return Ok(());
        };
        if value.is_null() {
            debug!(key, "null value, leaving stored copy untouched");
            return Ok(());
        }

        if options.bypasses_debounce() || self.inner.options.debounce.is_none() {
            return persister
                .call_now(key.to_string(), value)
                .await
                .map_err(unshare);
        }
        match persister.call(key.to_string(), value).await {
            Some(result) => result.map_err(unshare),
            None => Err(MirrorError::Cancelled),
        }
    }

    async fn persist_now(&self, keys: &[String]) -> MirrorResult<()> {
        try_join_all(
            keys.iter()
                .map(|key| self.set_item(key, None, SetOptions::immediate())),
        )
        .await?;
        Ok(())
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("name", &self.inner.name)
            .field("keys", &self.keys())
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::ChangeKind;
    use serde_json::json;

    fn isolated(name: &str) -> StoreOptions {
        StoreOptions::named(name)
            .with_provider(Arc::new(MemoryProvider::new()))
            .with_debounce(None)
    }

    #[tokio::test]
    async fn unnamed_store_is_ready_immediately() {
        let store = Store::from_keys(["a", "b"], StoreOptions::new()).unwrap();
        assert!(store.is_ready());
        assert_eq!(store.phase(), Phase::Ready);

        let fields = store.ready().await.unwrap();
        assert_eq!(fields.get("a"), Some(&Value::Null));
        assert_eq!(store.keys(), vec!["a", "b"]);
        assert!(!store.has_backend());
    }

    #[test]
    fn unnamed_store_needs_no_runtime() {
        let store = Store::from_defaults([("n", json!(1))], StoreOptions::new()).unwrap();
        assert_eq!(store.get("n"), json!(1));
    }

    #[test]
    fn named_store_needs_a_runtime() {
        let err = Store::from_keys(["a"], isolated("no-runtime")).unwrap_err();
        assert!(matches!(err, MirrorError::NoRuntime));
    }

    #[tokio::test]
    async fn duplicate_keys_collapse() {
        let store = Store::from_keys(["a", "b", "a"], StoreOptions::new()).unwrap();
        assert_eq!(store.keys(), vec!["a", "b"]);
        assert_eq!(store.original_keys(), ["a", "b"]);
    }

    #[tokio::test]
    async fn get_item_and_restore_need_a_backend() {
        let store = Store::empty(StoreOptions::new()).unwrap();
        assert!(store.get_item("k").await.unwrap_err().is_no_backend());
        assert!(store.restore(None).await.unwrap_err().is_no_backend());

        // Writes silently skip persistence.
        store
            .set_item("k", Some(json!(1)), SetOptions::immediate())
            .await
            .unwrap();
        store.save(None).await.unwrap();
        assert_eq!(store.get("k"), json!(1));
    }

    #[tokio::test]
    async fn set_item_without_value_persists_current() {
        let store = Store::from_keys(["k"], isolated("force")).unwrap();
        store.ready().await.unwrap();

        store
            .set_item("k", Some(json!("v")), SetOptions::no_save())
            .await
            .unwrap();
        let backend = store.backend().unwrap();
        assert!(backend.get_item("k").await.unwrap().is_none());

        store.set_item("k", None, SetOptions::default()).await.unwrap();
        assert_eq!(backend.get_item("k").await.unwrap(), Some(json!("v")));
    }

    #[tokio::test]
    async fn null_writes_never_reach_the_backend() {
        let store = Store::from_keys(["k"], isolated("skip-null")).unwrap();
        store.ready().await.unwrap();

        store.set_item("k", Some(json!(42)), SetOptions::default()).await.unwrap();
        store.set_item("k", Some(Value::Null), SetOptions::default()).await.unwrap();

        assert_eq!(store.get("k"), Value::Null);
        assert_eq!(
            store.backend().unwrap().get_item("k").await.unwrap(),
            Some(json!(42))
        );
    }

    #[tokio::test]
    async fn removed_keys_stay_out_of_storage() {
        let store = Store::from_defaults([("k", json!(1))], isolated("removed")).unwrap();
        store.ready().await.unwrap();
        store.save(None).await.unwrap();

        store.remove_item("k").await.unwrap();
        assert!(!store.contains_key("k"));
        assert_eq!(store.get("k"), Value::Null);

        store.save(Some(&["k"][..])).await.unwrap();
        assert!(!store.contains_key("k"));
        assert!(store.backend().unwrap().get_item("k").await.unwrap().is_none());

        // Removing again is fine.
        store.remove_item("k").await.unwrap();
    }

    #[tokio::test]
    async fn get_item_registers_key_and_keeps_memory_on_miss() {
        let store = Store::empty(isolated("get-miss")).unwrap();
        store.ready().await.unwrap();

        assert_eq!(store.get_item("fresh").await.unwrap(), Value::Null);
        assert_eq!(store.keys(), vec!["fresh"]);

        store
            .set_item("fresh", Some(json!("mem")), SetOptions::no_save())
            .await
            .unwrap();
        assert_eq!(store.get_item("fresh").await.unwrap(), json!("mem"));
    }

    #[tokio::test]
    async fn stored_value_wins_over_memory() {
        let store = Store::from_defaults([("k", json!("default"))], isolated("get-hit")).unwrap();
        store.ready().await.unwrap();

        store
            .backend()
            .unwrap()
            .set_item("k", &json!("stored"))
            .await
            .unwrap();
        assert_eq!(store.get_item("k").await.unwrap(), json!("stored"));
        assert_eq!(store.get("k"), json!("stored"));
    }

    #[tokio::test]
    async fn set_state_and_clear() {
        let store = Store::empty(isolated("state")).unwrap();
        store.ready().await.unwrap();

        store
            .set_state([("a", json!(1)), ("b", json!(2))], SetOptions::default())
            .await
            .unwrap();
        assert_eq!(store.to_snapshot(), json!({"a": 1, "b": 2}).as_object().cloned().unwrap());

        store.clear().await.unwrap();
        assert!(store.keys().is_empty());
        assert_eq!(store.get("a"), Value::Null);
        assert_eq!(store.backend().unwrap().len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn save_defaults_to_original_keys() {
        let store = Store::from_keys(["declared"], isolated("save-scope")).unwrap();
        store.ready().await.unwrap();

        store
            .set_state(
                [("declared", json!(1)), ("later", json!(2))],
                SetOptions::no_save(),
            )
            .await
            .unwrap();
        store.save(None).await.unwrap();

        let backend = store.backend().unwrap();
        assert_eq!(backend.get_item("declared").await.unwrap(), Some(json!(1)));
        assert!(backend.get_item("later").await.unwrap().is_none());

        store.save_all(&["declared"]).await.unwrap();
        assert_eq!(backend.get_item("later").await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn subscribers_see_changes_and_removal() {
        let store = Store::from_keys(["k"], StoreOptions::new()).unwrap();
        let mut rx = store.subscribe("k").unwrap();
        assert!(store.subscribe("unknown").is_err());

        store.set_item("k", Some(json!(1)), SetOptions::default()).await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), json!(1));

        store.remove_item("k").await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), Value::Null);
    }

    #[tokio::test]
    async fn observe_reports_each_change() {
        let store = Store::empty(StoreOptions::new()).unwrap();
        let mut changes = store.observe();

        store.set_item("k", Some(json!("a")), SetOptions::default()).await.unwrap();
        store.set_item("k", Some(json!("a")), SetOptions::default()).await.unwrap();
        store.set_item("k", Some(json!("b")), SetOptions::default()).await.unwrap();
        store.remove_item("k").await.unwrap();

        let kinds: Vec<ChangeKind> = (0..3)
            .map(|_| changes.try_recv().unwrap().kind)
            .collect();
        assert_eq!(kinds, vec![ChangeKind::Add, ChangeKind::Update, ChangeKind::Remove]);
        assert!(changes.try_recv().is_err());
    }

    #[tokio::test]
    async fn interceptors_rewrite_and_veto() {
        let store = Store::from_keys(["name", "locked"], isolated("intercept")).unwrap();
        store.ready().await.unwrap();

        let trim = store.intercept(|_key, value| match value {
            Value::String(s) => Some(Value::String(s.trim().to_string())),
            other => Some(other),
        });
        store.intercept(|key, value| (key != "locked").then_some(value));

        store
            .set_item("name", Some(json!("  ada  ")), SetOptions::immediate())
            .await
            .unwrap();
        store
            .set_item("locked", Some(json!(true)), SetOptions::immediate())
            .await
            .unwrap();

        let backend = store.backend().unwrap();
        assert_eq!(store.get("name"), json!("ada"));
        assert_eq!(backend.get_item("name").await.unwrap(), Some(json!("ada")));
        assert_eq!(store.get("locked"), Value::Null);
        assert!(backend.get_item("locked").await.unwrap().is_none());

        assert!(store.remove_interceptor(trim));
        store
            .set_item("name", Some(json!(" x ")), SetOptions::no_save())
            .await
            .unwrap();
        assert_eq!(store.get("name"), json!(" x "));
    }

    #[tokio::test]
    async fn ready_flag_flips_once() {
        let store = Store::from_keys(["k"], isolated("flag")).unwrap();
        let mut flag = store.watch_ready();
        flag.wait_for(|ready| *ready).await.unwrap();

        assert!(store.is_ready());
        assert!(!store.keys().iter().any(|k| k.contains("ready")));
        assert!(store.backend().unwrap().keys().await.unwrap().is_empty());
    }
}
