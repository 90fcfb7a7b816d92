//! Engine error types.
//!
//! Every public operation of the engine returns [`MirrorError`] via
//! [`MirrorResult`].  Backend failures are carried unmodified in
//! [`MirrorError::Backend`]; nothing is retried or suppressed.

use std::sync::Arc;

use mirrorkv_store::StoreError;

/// Unified error type for the mirrorkv engine.
#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    /// The operation needs persistence but the store was built without a
    /// name, so no backend exists.
    #[error("a unique store name is required for data persistence")]
    NoBackend,

    /// The persistence backend failed.
    #[error(transparent)]
    Backend(#[from] StoreError),

    /// The key has never been declared on this store.
    #[error("unknown key: {key}")]
    NotFound { key: String },

    /// A field value could not be converted to or from the requested type.
    #[error("value conversion failed: {0}")]
    Json(#[from] serde_json::Error),

    /// A named store was built outside a tokio runtime, so the initial
    /// restore cannot be scheduled.
    #[error("a tokio runtime is required to restore a named store")]
    NoRuntime,

    /// A pending operation was dropped before it completed (the runtime
    /// shut down underneath it).
    #[error("operation was cancelled before it completed")]
    Cancelled,

    /// Configuration could not be read or is inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// One failure delivered to several waiters (coalesced debounced
    /// saves, or every awaiter of a failed readiness future).
    #[error(transparent)]
    Shared(Arc<MirrorError>),
}

impl MirrorError {
    /// Whether this error (or the shared error it wraps) is
    /// [`MirrorError::NoBackend`].
    pub fn is_no_backend(&self) -> bool {
        match self {
            Self::NoBackend => true,
            Self::Shared(inner) => inner.is_no_backend(),
            _ => false,
        }
    }
}

/// Take a shared error back out of its `Arc` when this is the last
/// holder, so a lone caller sees the original error.
pub(crate) fn unshare(err: Arc<MirrorError>) -> MirrorError {
    Arc::try_unwrap(err).unwrap_or_else(MirrorError::Shared)
}

/// Convenience alias used throughout the engine crate.
pub type MirrorResult<T> = std::result::Result<T, MirrorError>;
