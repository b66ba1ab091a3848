//! Cache decorator for another fetcher.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use super::Fetcher;
use crate::cache::CacheStore;
use crate::types::Sha256Hash;
use crate::{HotbundleError, Result};

/// Serves modules from a [`CacheStore`], filling misses from a delegate.
///
/// The delegate knows nothing about caching; wrapping a [`NetworkFetcher`]
/// gives "network, but keep what was downloaded".
///
/// [`NetworkFetcher`]: super::NetworkFetcher
pub struct CachingFetcher {
    cache: Arc<CacheStore>,
    delegate: Arc<dyn Fetcher>,
    name: String,
}

impl CachingFetcher {
    pub fn new(cache: Arc<CacheStore>, delegate: Arc<dyn Fetcher>) -> Self {
        let name = format!("caching({})", delegate.name());
        Self {
            cache,
            delegate,
            name,
        }
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }
}

#[async_trait]
impl Fetcher for CachingFetcher {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(
        &self,
        id: &str,
        sha256: &Sha256Hash,
        url: &str,
        file_name_override: Option<&str>,
    ) -> Result<Option<Bytes>> {
        let delegate = &self.delegate;
        let filled = self
            .cache
            .get_or_put(sha256, || async move {
                match delegate.fetch(id, sha256, url, file_name_override).await {
                    Ok(Some(bytes)) => Ok(bytes),
                    Ok(None) => Err(HotbundleError::ModuleNotFound { id: id.to_string() }),
                    Err(e) => Err(e),
                }
            })
            .await;

        match filled {
            Ok(bytes) => Ok(Some(bytes)),
            Err(HotbundleError::ModuleNotFound { .. }) => Ok(None),
            Err(e) => Err(e.with_module_id(id)),
        }
    }
}
