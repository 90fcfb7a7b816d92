//! File configuration.
//!
//! A TOML file selects the backend and the store defaults:
//!
//! ```toml
//! [backend]
//! kind = "sqlite"            # or "memory"
//! path = "data/mirrorkv.db"
//! cache_capacity = 1000      # optional moka read-through cache
//! cache_ttl_seconds = 60
//!
//! [store]
//! debounce_ms = 500          # 0 disables debouncing
//! autosave = ["theme"]       # or true / false
//!
//! [log]
//! level = "info"
//! ```
//!
//! `MIRRORKV_DB_PATH` and `MIRRORKV_DEBOUNCE_MS` override the file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use mirrorkv_store::{
    BackendProvider, CacheSettings, CachingProvider, MemoryProvider, SqliteProvider,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{MirrorError, MirrorResult};
use crate::options::{Autosave, DEFAULT_DEBOUNCE, StoreOptions};
use crate::store::Store;

/// Overrides `[backend] path` and forces the SQLite backend.
pub const ENV_DB_PATH: &str = "MIRRORKV_DB_PATH";
/// Overrides `[store] debounce_ms`.
pub const ENV_DEBOUNCE_MS: &str = "MIRRORKV_DEBOUNCE_MS";

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    pub backend: BackendConfig,
    pub store: StoreSection,
    pub log: LogConfig,
}

/// Which backend implementation to open namespaces on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Process-wide in-memory provider; nothing outlives the process.
    #[default]
    Memory,
    Sqlite,
}

/// `[backend]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,
    /// Database file; required for `sqlite`.
    pub path: Option<PathBuf>,
    /// Wrap the backend in a read-through cache of this many entries.
    pub cache_capacity: Option<u64>,
    pub cache_ttl_seconds: Option<u64>,
}

/// `[store]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub debounce_ms: u64,
    pub autosave: AutosaveSetting,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE.as_millis() as u64,
            autosave: AutosaveSetting::default(),
        }
    }
}

/// `autosave = true | false | ["key", ...]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AutosaveSetting {
    Enabled(bool),
    Keys(Vec<String>),
}

impl Default for AutosaveSetting {
    fn default() -> Self {
        Self::Enabled(false)
    }
}

impl From<&AutosaveSetting> for Autosave {
    fn from(setting: &AutosaveSetting) -> Self {
        match setting {
            AutosaveSetting::Enabled(enabled) => Autosave::from(*enabled),
            AutosaveSetting::Keys(keys) => Autosave::Keys(keys.clone()),
        }
    }
}

/// `[log]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default `tracing` filter directive; `RUST_LOG` takes precedence.
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

impl MirrorConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> MirrorResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| MirrorError::InvalidConfig(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate the file at `path`.
    pub fn load(path: impl AsRef<Path>) -> MirrorResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            MirrorError::InvalidConfig(format!("failed to read {}: {e}", path.display()))
        })?;
        let config = Self::from_toml_str(&content)?;
        info!(path = %path.display(), backend = ?config.backend.kind, "configuration loaded");
        Ok(config)
    }

    /// Apply `MIRRORKV_*` environment overrides.
    pub fn apply_env_overrides(&mut self) -> MirrorResult<()> {
        self.apply_overrides_from(|name| std::env::var(name).ok().filter(|v| !v.is_empty()))
    }

    /// Apply overrides read through `lookup` instead of the process
    /// environment.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> MirrorResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_DB_PATH) {
            debug!(%path, "database path overridden from environment");
            self.backend.kind = BackendKind::Sqlite;
            self.backend.path = Some(PathBuf::from(path));
        }
        if let Some(raw) = lookup(ENV_DEBOUNCE_MS) {
            self.store.debounce_ms = raw.trim().parse().map_err(|_| {
                MirrorError::InvalidConfig(format!("{ENV_DEBOUNCE_MS} must be a whole number of milliseconds, got {raw:?}"))
            })?;
        }
        self.validate()
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> MirrorResult<()> {
        if self.backend.kind == BackendKind::Sqlite && self.backend.path.is_none() {
            return Err(MirrorError::InvalidConfig(
                "backend kind \"sqlite\" requires a path".into(),
            ));
        }
        if self.backend.cache_capacity == Some(0) {
            return Err(MirrorError::InvalidConfig(
                "cache_capacity must be greater than zero".into(),
            ));
        }
        if self.backend.cache_ttl_seconds == Some(0) {
            return Err(MirrorError::InvalidConfig(
                "cache_ttl_seconds must be greater than zero".into(),
            ));
        }
        if self.log.level.trim().is_empty() {
            return Err(MirrorError::InvalidConfig("log level must not be empty".into()));
        }
        Ok(())
    }

    /// The configured debounce window; `None` when `debounce_ms` is 0.
    pub fn debounce(&self) -> Option<Duration> {
        Some(Duration::from_millis(self.store.debounce_ms)).filter(|d| !d.is_zero())
    }

    /// Build the configured provider, opening and migrating the database
    /// for `sqlite`.
    pub async fn provider(&self) -> MirrorResult<Arc<dyn BackendProvider>> {
        let base: Arc<dyn BackendProvider> = match self.backend.kind {
            BackendKind::Memory => MemoryProvider::global(),
            BackendKind::Sqlite => {
                let path = self.backend.path.clone().ok_or_else(|| {
                    MirrorError::InvalidConfig("backend kind \"sqlite\" requires a path".into())
                })?;
                Arc::new(SqliteProvider::open_path(path).await?)
            }
        };

        let Some(max_capacity) = self.backend.cache_capacity else {
            return Ok(base);
        };
        let mut settings = CacheSettings {
            max_capacity,
            ..CacheSettings::default()
        };
        if let Some(ttl) = self.backend.cache_ttl_seconds {
            settings.ttl = Duration::from_secs(ttl);
        }
        debug!(max_capacity, ttl = ?settings.ttl, "caching backend enabled");
        Ok(Arc::new(CachingProvider::new(base, settings)))
    }

    /// Store options for namespace `name` on `provider`, with this
    /// configuration's autosave and debounce settings.
    pub fn store_options(
        &self,
        name: impl Into<String>,
        provider: Arc<dyn BackendProvider>,
    ) -> StoreOptions {
        StoreOptions::named(name)
            .with_provider(provider)
            .with_autosave(&self.store.autosave)
            .with_debounce(self.debounce())
    }

    /// Build the provider and open an empty store on namespace `name`.
    /// Await [`Store::ready`] before reading.
    pub async fn open_store(&self, name: impl Into<String>) -> MirrorResult<Store> {
        let provider = self.provider().await?;
        Store::empty(self.store_options(name, provider))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let config = MirrorConfig::from_toml_str("").unwrap();
        assert_eq!(config, MirrorConfig::default());
        assert_eq!(config.backend.kind, BackendKind::Memory);
        assert_eq!(config.debounce(), Some(Duration::from_millis(500)));
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn full_document_parses() {
        let config = MirrorConfig::from_toml_str(
            r#"
            [backend]
            kind = "sqlite"
            path = "/tmp/kv.db"
            cache_capacity = 100
            cache_ttl_seconds = 5

            [store]
            debounce_ms = 0
            autosave = ["theme", "layout"]

            [log]
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.backend.kind, BackendKind::Sqlite);
        assert_eq!(config.backend.path.as_deref(), Some(Path::new("/tmp/kv.db")));
        assert_eq!(config.debounce(), None);
        assert_eq!(
            Autosave::from(&config.store.autosave),
            Autosave::Keys(vec!["theme".into(), "layout".into()])
        );
        assert_eq!(config.log.level, "debug");
    }

    #[test]
    fn autosave_accepts_a_bool() {
        let config = MirrorConfig::from_toml_str("[store]\nautosave = true\n").unwrap();
        assert_eq!(Autosave::from(&config.store.autosave), Autosave::All);
    }

    #[test]
    fn sqlite_without_path_is_rejected() {
        let err = MirrorConfig::from_toml_str("[backend]\nkind = \"sqlite\"\n").unwrap_err();
        assert!(matches!(err, MirrorError::InvalidConfig(_)));
    }

    #[test]
    fn malformed_toml_is_rejected() {
        let err = MirrorConfig::from_toml_str("[backend\nkind = 3").unwrap_err();
        assert!(matches!(err, MirrorError::InvalidConfig(_)));
    }

    #[test]
    fn overrides_switch_to_sqlite() {
        let mut config = MirrorConfig::default();
        config
            .apply_overrides_from(|name| match name {
                ENV_DB_PATH => Some("/var/lib/kv.db".into()),
                ENV_DEBOUNCE_MS => Some("25".into()),
                _ => None,
            })
            .unwrap();

        assert_eq!(config.backend.kind, BackendKind::Sqlite);
        assert_eq!(config.backend.path, Some(PathBuf::from("/var/lib/kv.db")));
        assert_eq!(config.debounce(), Some(Duration::from_millis(25)));
    }

    #[test]
    fn bad_debounce_override_is_rejected() {
        let mut config = MirrorConfig::default();
        let err = config
            .apply_overrides_from(|name| (name == ENV_DEBOUNCE_MS).then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, MirrorError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn sqlite_provider_with_cache() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = MirrorConfig::default();
        config.backend.kind = BackendKind::Sqlite;
        config.backend.path = Some(dir.path().join("kv.db"));
        config.backend.cache_capacity = Some(10);

        let provider = config.provider().await.unwrap();
        assert_eq!(provider.kind(), "sqlite");

        let options = config.store_options("prefs", Arc::clone(&provider));
        assert_eq!(options.name.as_deref(), Some("prefs"));
        assert_eq!(options.debounce, Some(Duration::from_millis(500)));
    }

    #[tokio::test]
    async fn open_store_on_memory_backend() {
        let config = MirrorConfig::from_toml_str("[store]\ndebounce_ms = 0\n").unwrap();
        let store = config.open_store("config-open-store").await.unwrap();
        store.ready().await.unwrap();
        assert!(store.has_backend());
        assert!(store.options().debounce.is_none());
    }
}
