//! Builder for configuring loader instances

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{LoadState, Loader};
use crate::cache::CacheStore;
use crate::config::Config;
use crate::fetcher::{
    CachingFetcher, EmbeddedFetcher, Fetcher, FetcherChain, NetworkFetcher, http_client,
};
use crate::manifest::ManifestResolver;
use crate::{HotbundleError, Result};

const DEFAULT_APPLICATION: &str = "default";
const DEFAULT_CONCURRENCY: usize = 4;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Builder for configuring loader instances.
///
/// Without explicit fetchers the chain is assembled from what is configured:
/// the network (behind the cache when one is set), then the embedded
/// directory when one is set.
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use hotbundle::{CacheStore, CacheStoreConfig, Loader};
/// # async fn example() -> hotbundle::Result<()> {
/// let cache = Arc::new(CacheStore::open(CacheStoreConfig::new("/tmp/bundles")).await?);
/// let loader = Loader::builder()
///     .cache(cache)
///     .embedded_dir("/usr/share/myapp/bundles")
///     .application("myapp")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct LoaderBuilder {
    cache: Option<Arc<CacheStore>>,
    embedded_dir: Option<PathBuf>,
    fetchers: Vec<Arc<dyn Fetcher>>,
    client: Option<reqwest::Client>,
    timeout: Duration,
    application: String,
    concurrency: usize,
    prune_after_load: bool,
}

impl Default for LoaderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LoaderBuilder {
    pub fn new() -> Self {
        Self {
            cache: None,
            embedded_dir: None,
            fetchers: Vec::new(),
            client: None,
            timeout: DEFAULT_TIMEOUT,
            application: DEFAULT_APPLICATION.to_string(),
            concurrency: DEFAULT_CONCURRENCY,
            prune_after_load: true,
        }
    }

    /// Start from a [`Config`], opening its cache store.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let cache = CacheStore::open(config.cache.store_config()).await?;
        let mut builder = Self::new()
            .cache(Arc::new(cache))
            .timeout(config.network.timeout())
            .application(config.loader.application.clone())
            .concurrency(config.loader.concurrency)
            .prune_after_load(config.loader.prune_after_load);
        if let Some(dir) = &config.loader.embedded_dir {
            builder = builder.embedded_dir(dir.clone());
        }
        Ok(builder)
    }

    /// Cache module bytes in `cache`, and pin the active version there.
    pub fn cache(mut self, cache: Arc<CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Fall back to bundled assets in `dir`.
    pub fn embedded_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.embedded_dir = Some(dir.into());
        self
    }

    /// Append a fetcher to an explicit chain.
    ///
    /// Once any fetcher is added, the default chain is not assembled.
    pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetchers.push(fetcher);
        self
    }

    /// Use this HTTP client instead of building one.
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Per-request timeout for the built-in client (default: 30s).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Name the active manifest is recorded under in the cache.
    pub fn application(mut self, name: impl Into<String>) -> Self {
        self.application = name.into();
        self
    }

    /// Module fetches in flight at once (default: 4).
    pub fn concurrency(mut self, n: usize) -> Self {
        self.concurrency = n;
        self
    }

    /// Prune the cache to budget after each successful load (default: true).
    pub fn prune_after_load(mut self, enabled: bool) -> Self {
        self.prune_after_load = enabled;
        self
    }

    pub fn build(self) -> Result<Loader> {
        if self.concurrency == 0 {
            return Err(HotbundleError::Configuration(
                "concurrency must be at least 1".to_string(),
            ));
        }

        let client = match self.client {
            Some(client) => client,
            None => http_client(self.timeout)?,
        };
        let network = NetworkFetcher::new(client.clone());

        let chain = if self.fetchers.is_empty() {
            let mut chain = FetcherChain::new();
            let primary: Arc<dyn Fetcher> = Arc::new(network.clone());
            match &self.cache {
                Some(cache) => chain.push(Arc::new(CachingFetcher::new(cache.clone(), primary))),
                None => chain.push(primary),
            }
            if let Some(dir) = self.embedded_dir {
                chain.push(Arc::new(EmbeddedFetcher::new(dir)));
            }
            chain
        } else {
            self.fetchers
                .into_iter()
                .fold(FetcherChain::new(), FetcherChain::with)
        };

        Ok(Loader {
            resolver: ManifestResolver::new(client),
            chain,
            network,
            cache: self.cache,
            application: self.application,
            concurrency: self.concurrency,
            prune_after_load: self.prune_after_load,
            busy: tokio::sync::Mutex::new(()),
            state: Mutex::new(LoadState::Idle),
            active: Mutex::new(None),
        })
    }
}
