//! Hotbundle - verified, cached delivery of script module bundles
//!
//! A bundle is a set of compiled script modules described by a manifest:
//! each module's URL, SHA-256 and dependencies. This crate resolves the
//! manifest, fetches every module through a fallback chain of sources,
//! verifies content hashes, keeps what it downloaded in a bounded
//! content-addressable cache, and hands the modules to a script engine in
//! dependency order.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use hotbundle::{CacheStore, CacheStoreConfig, Engine, Loader, ScriptError};
//!
//! struct MyEngine;
//!
//! impl Engine for MyEngine {
//!     fn evaluate(&mut self, bytecode: &[u8], module_name: &str) -> Result<(), ScriptError> {
//!         println!("evaluating {module_name} ({} bytes)", bytecode.len());
//!         Ok(())
//!     }
//!
//!     fn compile(&mut self, source: &str, _file_name: &str) -> Result<Vec<u8>, ScriptError> {
//!         Ok(source.as_bytes().to_vec())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> hotbundle::Result<()> {
//!     let cache = CacheStore::open(CacheStoreConfig::new("/tmp/hotbundle")).await?;
//!     let loader = Loader::builder()
//!         .cache(Arc::new(cache))
//!         .embedded_dir("/usr/share/myapp/bundles")
//!         .build()?;
//!
//!     let mut engine = MyEngine;
//!     let result = loader
//!         .load(&mut engine, "https://cdn.example.com/myapp/manifest.json")
//!         .await?;
//!     println!("loaded {:?}", result.order());
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod fetcher;
pub mod loader;
pub mod manifest;
pub mod patch;
pub mod telemetry;
pub mod types;
pub mod version;

// Re-export main types at crate root
pub use cache::{CacheStats, CacheStore, CacheStoreConfig, PruneSummary};
pub use config::Config;
pub use engine::{Engine, ScriptError};
pub use error::{AttemptOutcome, FetchAttempt, HotbundleError, Result};
pub use fetcher::{CachingFetcher, EmbeddedFetcher, Fetcher, FetcherChain, NetworkFetcher};
pub use loader::{
    DownloadResult, LoadResult, LoadState, LoadedModule, Loader, LoaderBuilder, ModuleSource,
    PREBUILT_MANIFEST_FILE_NAME,
};
pub use manifest::{Manifest, ManifestDelta, ManifestResolver, Module};
pub use types::Sha256Hash;
pub use version::PKG_VERSION;
