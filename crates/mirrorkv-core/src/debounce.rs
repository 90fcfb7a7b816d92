//! Trailing-edge debounce scheduler.
//!
//! A [`Debouncer`] wraps one async function.  Calls are grouped into
//! windows per key: every call pushes the window's deadline `delay` into
//! the future and replaces the pending argument.  When a window closes the
//! wrapped function runs once with the **latest** argument and every caller
//! coalesced into that window receives the same result.
//!
//! ```text
//! call(k, 1) ─┐
//! call(k, 2) ─┼─ delay ─▶ f(k, 3) ─▶ result to all three callers
//! call(k, 3) ─┘
//! ```
//!
//! [`Debouncer::call_now`] bypasses the delay.  It absorbs any window that
//! is still pending for the same key, so an older argument can never land
//! after a newer immediate one.
//!
//! Invocations for one key never overlap.  Each runs under the key's write
//! lock, and a closed window or `call_now` waits for the invocation that is
//! already running.  Callers that must order their own work against the
//! wrapped function (deleting the key, say) take the same lock with
//! [`Debouncer::lock`].

use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::{Mutex, OwnedMutexGuard, oneshot};
use tokio::time::Instant;
use tracing::trace;

type Task<K, V, R> = Arc<dyn Fn(K, V) -> BoxFuture<'static, R> + Send + Sync>;

/// One open debounce window.
struct Window<V, R> {
    deadline: Instant,
    latest: V,
    waiters: Vec<oneshot::Sender<R>>,
}

/// Coalesces repeated calls per key into a single trailing invocation.
pub struct Debouncer<K, V, R> {
    delay: Duration,
    task: Task<K, V, R>,
    windows: Arc<DashMap<K, Window<V, R>>>,
    locks: Arc<DashMap<K, Arc<Mutex<()>>>>,
}

impl<K, V, R> Clone for Debouncer<K, V, R> {
    fn clone(&self) -> Self {
        Self {
            delay: self.delay,
            task: Arc::clone(&self.task),
            windows: Arc::clone(&self.windows),
            locks: Arc::clone(&self.locks),
        }
    }
}

impl<K, V, R> Debouncer<K, V, R>
where
    K: Eq + Hash + Clone + Send + Sync + std::fmt::Debug + 'static,
    V: Send + Sync + 'static,
    R: Clone + Send + 'static,
{
    /// Wrap `f` with a trailing debounce of `delay`.
    pub fn new<F, Fut>(delay: Duration, f: F) -> Self
    where
        F: Fn(K, V) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        Self {
            delay,
            task: Arc::new(move |key: K, value: V| -> BoxFuture<'static, R> { f(key, value).boxed() }),
            windows: Arc::new(DashMap::new()),
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Number of windows waiting to fire.
    pub fn pending(&self) -> usize {
        self.windows.len()
    }

    /// Schedule `f(key, value)` at the trailing edge of the key's window.
    ///
    /// The window is registered when this method is called, not when the
    /// returned future is first polled.  The future resolves to `None` only
    /// if the window was dropped without running (the runtime shut down).
    pub fn call(&self, key: K, value: V) -> impl Future<Output = Option<R>> + Send + use<K, V, R> {
        let (tx, rx) = oneshot::channel();
        let deadline = Instant::now() + self.delay;

        let opened = match self.windows.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                let window = entry.get_mut();
                window.deadline = deadline;
                window.latest = value;
                window.waiters.push(tx);
                trace!(?key, coalesced = window.waiters.len(), "debounce window extended");
                false
            }
            Entry::Vacant(entry) => {
                entry.insert(Window {
                    deadline,
                    latest: value,
                    waiters: vec![tx],
                });
                true
            }
        };

        if opened {
            let this = self.clone();
            tokio::spawn(async move { this.run_timer(key).await });
        }

        async move { rx.await.ok() }
    }

    /// Run `f(key, value)` right away, resolving any pending window for
    /// the same key with the same result.  Waits for an invocation already
    /// running for `key` to finish first.
    pub async fn call_now(&self, key: K, value: V) -> R {
        let _running = self.lock(&key).await;
        let superseded = self.windows.remove(&key).map(|(_, w)| w.waiters);
        let result = (self.task)(key, value).await;
        if let Some(waiters) = superseded {
            for tx in waiters {
                let _ = tx.send(result.clone());
            }
        }
        result
    }

    /// Drop the pending window for `key` without running `f`, resolving its
    /// callers with `outcome`.  Returns whether a window was pending.
    ///
    /// An invocation that is already running is not affected; hold
    /// [`Debouncer::lock`] to wait it out.
    pub fn discard(&self, key: &K, outcome: R) -> bool {
        match self.windows.remove(key) {
            Some((_, window)) => {
                trace!(?key, "debounce window discarded");
                Self::resolve(window.waiters, outcome);
                true
            }
            None => false,
        }
    }

    /// Close every pending window now, concurrently, and return each
    /// invocation's result.
    pub async fn flush(&self) -> Vec<R> {
        let keys: Vec<K> = self.windows.iter().map(|e| e.key().clone()).collect();
        let runs = keys.into_iter().map(|key| {
            let this = self.clone();
            async move {
                let _running = this.lock(&key).await;
                let window = this.windows.remove(&key).map(|(_, w)| w)?;
                Some(this.fire(key, window).await)
            }
        });
        futures::future::join_all(runs)
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    /// Wait until no invocation for `key` is running, and keep new ones
    /// from starting until the guard is dropped.
    pub async fn lock(&self, key: &K) -> OwnedMutexGuard<()> {
        let lock = Arc::clone(self.locks.entry(key.clone()).or_default().value());
        lock.lock_owned().await
    }

    /// Sleep until the key's window closes, then fire it.  Windows may be
    /// extended while sleeping, or taken by `call_now`/`flush`/`discard`.
    async fn run_timer(self, key: K) {
        loop {
            let deadline = match self.windows.get(&key) {
                Some(window) => window.deadline,
                None => return,
            };
            tokio::time::sleep_until(deadline).await;

            // The window stays registered until the lock is ours, so calls
            // made meanwhile still coalesce into it.
            let _running = self.lock(&key).await;
            let now = Instant::now();
            if let Some((_, window)) = self.windows.remove_if(&key, |_, w| w.deadline <= now) {
                trace!(?key, coalesced = window.waiters.len(), "debounce window closed");
                let result = (self.task)(key, window.latest).await;
                Self::resolve(window.waiters, result);
                return;
            }
        }
    }

    async fn fire(&self, key: K, window: Window<V, R>) -> R {
        trace!(?key, coalesced = window.waiters.len(), "debounce window flushed");
        let result = (self.task)(key, window.latest).await;
        Self::resolve(window.waiters, result.clone());
        result
    }

    /// Hand `result` to every waiter; the last one receives the original
    /// so a lone caller gets an unshared value.
    fn resolve(mut waiters: Vec<oneshot::Sender<R>>, result: R) {
        let last = waiters.pop();
        for tx in waiters {
            let _ = tx.send(result.clone());
        }
        if let Some(tx) = last {
            let _ = tx.send(result);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
