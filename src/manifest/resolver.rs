//! Manifest fetching.
//!
//! Manifests always come straight from the network. They are never served
//! from the module cache or the embedded fetcher, so every load sees the
//! latest published pointer.

use tracing::{debug, instrument};

use super::{Manifest, ManifestDelta};
use crate::{HotbundleError, Result};

/// Fetches, parses and validates manifests.
#[derive(Debug, Clone)]
pub struct ManifestResolver {
    client: reqwest::Client,
}

/// A freshly resolved manifest, with its delta against the prior load.
#[derive(Debug, Clone)]
pub struct ResolvedManifest {
    pub manifest: Manifest,
    pub delta: Option<ManifestDelta>,
}

impl ManifestResolver {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Fetch and validate the manifest at `manifest_url`.
    ///
    /// Relative module URLs are resolved against `manifest_url`.
    #[instrument(skip(self), fields(operation = "resolve_manifest"))]
    pub async fn resolve(&self, manifest_url: &str) -> Result<Manifest> {
        let body = self.fetch(manifest_url).await?;
        let manifest = Manifest::from_json(&body)?.with_base_url(manifest_url)?;
        debug!(modules = manifest.len(), "manifest resolved");
        Ok(manifest)
    }

    /// Like [`resolve`](Self::resolve), also diffing against `prior` when given.
    pub async fn resolve_against(
        &self,
        manifest_url: &str,
        prior: Option<&Manifest>,
    ) -> Result<ResolvedManifest> {
        let manifest = self.resolve(manifest_url).await?;
        let delta = prior.map(|prior| manifest.diff(prior));
        Ok(ResolvedManifest { manifest, delta })
    }

    async fn fetch(&self, url: &str) -> Result<String> {
        let fetch_error = |message: String| HotbundleError::ManifestFetch {
            url: url.to_string(),
            message,
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| fetch_error(e.to_string()))?;

        if !response.status().is_success() {
            return Err(fetch_error(format!("HTTP {}", response.status())));
        }

        response
            .text()
            .await
            .map_err(|e| fetch_error(format!("failed to read response body: {e}")))
    }
}
