//! # mirrorkv-core
//!
//! An observable in-memory key-value store whose fields are mirrored into a
//! namespaced persistent [`Backend`](mirrorkv_store::Backend).
//!
//! - [`Store`] is the reconciliation engine: it restores fields from the
//!   backend on construction, keeps a `watch` cell per key, and persists
//!   writes through a per-key [`Debouncer`].
//! - [`Store::set`] / [`Store::get_as`] are the typed accessors; direct
//!   writes only persist when the [`Autosave`] policy covers the key.
//! - [`MirrorConfig`] reads backend and store settings from TOML.
//!
//! ```ignore
//! use mirrorkv_core::{SetOptions, Store, StoreOptions};
//! use serde_json::json;
//!
//! let store = Store::from_defaults([("theme", json!("light"))], StoreOptions::named("prefs"))?;
//! store.ready().await?;
//! store.set_item("theme", Some(json!("dark")), SetOptions::default()).await?;
//! ```

pub mod config;
pub mod debounce;
pub mod error;
pub mod interceptor;
pub mod options;
pub mod reactive;
pub mod store;

pub use config::{AutosaveSetting, BackendConfig, BackendKind, LogConfig, MirrorConfig, StoreSection};
pub use debounce::Debouncer;
pub use error::{MirrorError, MirrorResult};
pub use options::{Autosave, DEFAULT_DEBOUNCE, SetOptions, StoreOptions};
pub use reactive::{ChangeKind, FieldChange, Fields, InterceptFn, InterceptorId};
pub use store::{Phase, Store};
