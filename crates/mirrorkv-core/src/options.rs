//! Store and write options.
//!
//! [`StoreOptions`] is fixed at construction.  Defaults are provided via
//! [`Default`], and `with_*` methods customise individual fields fluently.
//! [`SetOptions`] controls a single [`crate::Store::set_item`] call.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use mirrorkv_store::BackendProvider;

/// Default debounce window for persistence writes.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

// ---------------------------------------------------------------------------
// Autosave
// ---------------------------------------------------------------------------

/// Which direct writes ([`crate::Store::set`]) persist on their own.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Autosave {
    /// Direct writes only update memory; persist with `save`/`save_all`.
    #[default]
    Off,
    /// Every direct write persists.
    All,
    /// Only direct writes to these keys persist.
    Keys(Vec<String>),
}

impl Autosave {
    /// Whether a direct write to `key` should persist.
    pub fn covers(&self, key: &str) -> bool {
        match self {
            Self::Off => false,
            Self::All => true,
            Self::Keys(keys) => keys.iter().any(|k| k == key),
        }
    }
}

impl From<bool> for Autosave {
    fn from(enabled: bool) -> Self {
        if enabled { Self::All } else { Self::Off }
    }
}

// ---------------------------------------------------------------------------
// StoreOptions
// ---------------------------------------------------------------------------

/// Construction-time configuration for a [`crate::Store`].
#[derive(Clone)]
pub struct StoreOptions {
    /// Namespace identity.  `None` disables persistence entirely.
    pub name: Option<String>,

    /// Where the namespace is opened.  `None` means the process-wide
    /// in-memory provider.
    pub provider: Option<Arc<dyn BackendProvider>>,

    /// Autosave policy for direct writes.
    ///
    /// Default: [`Autosave::Off`].
    pub autosave: Autosave,

    /// Trailing debounce for persistence writes; `None` writes through
    /// immediately.
    ///
    /// Default: **500 ms**.
    pub debounce: Option<Duration>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            name: None,
            provider: None,
            autosave: Autosave::Off,
            debounce: Some(DEFAULT_DEBOUNCE),
        }
    }
}

impl StoreOptions {
    /// Options with default values and no name (no persistence).
    pub fn new() -> Self {
        Self::default()
    }

    /// Options for a persisted store named `name`.
    pub fn named(name: impl Into<String>) -> Self {
        Self::default().with_name(name)
    }

    /// Set the namespace name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Open the namespace on `provider` instead of the in-memory default.
    pub fn with_provider(mut self, provider: Arc<dyn BackendProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Set the autosave policy.
    pub fn with_autosave(mut self, autosave: impl Into<Autosave>) -> Self {
        self.autosave = autosave.into();
        self
    }

    /// Set the debounce window (`None` disables debouncing).
    pub fn with_debounce(mut self, delay: Option<Duration>) -> Self {
        self.debounce = delay.filter(|d| !d.is_zero());
        self
    }
}

impl fmt::Debug for StoreOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreOptions")
            .field("name", &self.name)
            .field("provider", &self.provider.as_ref().map(|p| p.kind()))
            .field("autosave", &self.autosave)
            .field("debounce", &self.debounce)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// SetOptions
// ---------------------------------------------------------------------------

/// Per-call options for [`crate::Store::set_item`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetOptions {
    /// Persist the value (subject to the skip-null rule).  Default: `true`.
    pub save: bool,
    /// Bypass the debounce window.  Default: `false`.
    pub immediate: bool,
    /// Allow debouncing.  `false` behaves like `immediate`.  Default: `true`.
    pub debounce: bool,
}

impl Default for SetOptions {
    fn default() -> Self {
        Self {
            save: true,
            immediate: false,
            debounce: true,
        }
    }
}

impl SetOptions {
    /// Update memory and observers only.
    pub fn no_save() -> Self {
        Self {
            save: false,
            ..Self::default()
        }
    }

    /// Persist right away, skipping the debounce window.
    pub fn immediate() -> Self {
        Self {
            immediate: true,
            ..Self::default()
        }
    }

    /// Set whether the value is persisted.
    pub fn with_save(mut self, save: bool) -> Self {
        self.save = save;
        self
    }

    pub(crate) fn bypasses_debounce(&self) -> bool {
        self.immediate || !self.debounce
    }
}
