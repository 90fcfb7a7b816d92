//! # mirrorkv-store
//!
//! Persistence adapters for mirrorkv.
//!
//! A [`Backend`] is one namespace of an asynchronous, durable key-value
//! store holding JSON values.  A [`BackendProvider`] opens backends by
//! namespace name.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  CachedBackend (moka read-through)      │
//! ├────────────────────┬────────────────────┤
//! │  MemoryBackend     │  SqliteBackend     │
//! │  (JSON text, RAM)  │  (kv_items table)  │
//! ├────────────────────┴────────────────────┤
//! │            Database (rusqlite WAL)      │
//! │            Migrations (versioned)       │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```ignore
//! use mirrorkv_store::{BackendProvider, SqliteProvider};
//!
//! let provider = SqliteProvider::open_path("data/mirrorkv.db").await?;
//! let backend = provider.open("settings")?;
//! backend.set_item("theme", &serde_json::json!("dark")).await?;
//! ```

pub mod backend;
pub mod cache;
pub mod db;
pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;

// ── re-exports ───────────────────────────────────────────────────────

pub use backend::{Backend, BackendProvider};
pub use cache::{CacheSettings, CacheStats, CachedBackend, CachingProvider};
pub use db::{Database, Location};
pub use error::{StoreError, StoreResult};
pub use memory::{MemoryBackend, MemoryProvider};
pub use sqlite::{SqliteBackend, SqliteProvider};
