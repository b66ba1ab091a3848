//! Configuration loading.
//!
//! Configuration is loaded from TOML with the following resolution order:
//! 1. explicit path (`--config <path>` / `HOTBUNDLE_CONFIG`)
//! 2. `~/.hotbundle/config.toml` (user)
//! 3. built-in defaults
//!
//! Every field is optional:
//!
//! ```toml
//! [cache]
//! directory = "/var/cache/myapp/bundles"
//! max_size_bytes = 33554432
//! memory_bytes = 0
//!
//! [network]
//! timeout_secs = 10
//!
//! [loader]
//! application = "myapp"
//! concurrency = 8
//! embedded_dir = "/usr/share/myapp/bundles"
//! prune_after_load = true
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::cache::{CacheStoreConfig, DEFAULT_MAX_SIZE_BYTES, DEFAULT_MEMORY_BYTES};
use crate::{HotbundleError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub loader: LoaderConfig,
}

/// Module cache settings.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Cache directory (default: `<user cache dir>/hotbundle`).
    #[serde(default = "default_cache_dir")]
    pub directory: PathBuf,
    /// Budget for unpinned entries (default: 64 MiB).
    #[serde(default = "default_max_size")]
    pub max_size_bytes: u64,
    /// In-memory tier size; 0 disables it (default: 8 MiB).
    #[serde(default = "default_memory")]
    pub memory_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: default_cache_dir(),
            max_size_bytes: default_max_size(),
            memory_bytes: default_memory(),
        }
    }
}

impl CacheConfig {
    pub fn store_config(&self) -> CacheStoreConfig {
        CacheStoreConfig::new(&self.directory)
            .max_size_bytes(self.max_size_bytes)
            .memory_bytes(self.memory_bytes)
    }
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("hotbundle")
}

fn default_max_size() -> u64 {
    DEFAULT_MAX_SIZE_BYTES
}

fn default_memory() -> u64 {
    DEFAULT_MEMORY_BYTES
}

/// HTTP settings.
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    /// Per-request timeout in seconds (default: 30).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
        }
    }
}

impl NetworkConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_timeout() -> u64 {
    30
}

/// Loader settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LoaderConfig {
    /// Name the active manifest is recorded under (default: "default").
    #[serde(default = "default_application")]
    pub application: String,
    /// Module fetches in flight at once (default: 4, minimum 1).
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Bundled fallback assets, tried after the network.
    #[serde(default)]
    pub embedded_dir: Option<PathBuf>,
    /// Prune the cache to budget after every successful load (default: true).
    #[serde(default = "default_prune_after_load")]
    pub prune_after_load: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            application: default_application(),
            concurrency: default_concurrency(),
            embedded_dir: None,
            prune_after_load: default_prune_after_load(),
        }
    }
}

fn default_application() -> String {
    "default".to_string()
}

fn default_concurrency() -> usize {
    4
}

fn default_prune_after_load() -> bool {
    true
}

impl Config {
    /// Load configuration from the standard locations.
    ///
    /// Resolution order:
    /// 1. Explicit path (if provided; must exist)
    /// 2. `~/.hotbundle/config.toml`
    /// 3. Built-in defaults
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        match Self::resolve_config_path(explicit_path)? {
            Some(path) => Self::from_file(&path),
            None => Ok(Self::default()),
        }
    }

    /// Parse a specific config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            HotbundleError::Configuration(format!(
                "failed to read config file {}: {e}",
                path.display()
            ))
        })?;
        Self::from_toml(&content).map_err(|e| {
            HotbundleError::Configuration(format!("{}: {e}", path.display()))
        })
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| HotbundleError::Configuration(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.loader.concurrency == 0 {
            return Err(HotbundleError::Configuration(
                "loader.concurrency must be at least 1".to_string(),
            ));
        }
        if self.network.timeout_secs == 0 {
            return Err(HotbundleError::Configuration(
                "network.timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(Some(path.to_path_buf()));
            }
            return Err(HotbundleError::Configuration(format!(
                "config file not found: {}",
                path.display()
            )));
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".hotbundle").join("config.toml");
            if user_config.exists() {
                return Ok(Some(user_config));
            }
        }

        Ok(None)
    }
}
