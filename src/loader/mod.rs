//! Load orchestration: manifest → ordered, verified modules → engine.
//!
//! A load runs in four phases:
//!
//! 1. resolve the manifest (always from the network) and diff it against
//!    the previously loaded one;
//! 2. fetch every module through the fetcher chain, trying a patch against
//!    the previous version first where the manifest offers one;
//! 3. verify every module against its declared hash;
//! 4. evaluate the modules in dependency order.
//!
//! Nothing reaches the engine until every module has been fetched and
//! verified, so fetch and integrity failures never leave a half-loaded
//! engine behind. A [`ScriptError`](crate::ScriptError) during phase 4 does
//! leave earlier modules evaluated; callers should discard the engine.
//!
//! While a load runs, its module hashes are held in the cache so that
//! budget-driven eviction cannot remove them. After a successful load they
//! are pinned, hashes only the previous version used are unpinned, and the
//! manifest is recorded so the next process can patch against it.

mod builder;
mod download;
mod state;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::cache::CacheStore;
use crate::engine::Engine;
use crate::fetcher::{FetcherChain, NetworkFetcher};
use crate::manifest::{Manifest, ManifestResolver, Module};
use crate::patch::apply_patch;
use crate::telemetry;
use crate::types::Sha256Hash;
use crate::{HotbundleError, Result};

pub use builder::LoaderBuilder;
pub use download::PREBUILT_MANIFEST_FILE_NAME;
pub use state::{DownloadResult, LoadResult, LoadState, LoadedModule, ModuleSource};

/// Module bytes obtained during the fetch phase.
struct FetchedModule {
    id: String,
    sha256: Sha256Hash,
    bytes: Bytes,
    source: ModuleSource,
}

impl FetchedModule {
    fn summary(&self) -> LoadedModule {
        LoadedModule {
            id: self.id.clone(),
            sha256: self.sha256,
            size: self.bytes.len(),
            source: self.source.clone(),
        }
    }
}

/// Loads script bundles described by a manifest into an [`Engine`].
///
/// A loader serves one operation at a time: a `load` or `download` started
/// while another is running fails immediately with
/// [`HotbundleError::LoaderBusy`]. No operation retries internally.
pub struct Loader {
    resolver: ManifestResolver,
    chain: FetcherChain,
    /// Used for patch downloads, which bypass the chain.
    network: NetworkFetcher,
    cache: Option<Arc<CacheStore>>,
    application: String,
    concurrency: usize,
    prune_after_load: bool,
    busy: tokio::sync::Mutex<()>,
    state: Mutex<LoadState>,
    active: Mutex<Option<Manifest>>,
}

impl std::fmt::Debug for Loader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loader")
            .field("chain", &self.chain)
            .field("application", &self.application)
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

impl Loader {
    pub fn builder() -> LoaderBuilder {
        LoaderBuilder::new()
    }

    /// State of the current or most recent operation.
    pub fn state(&self) -> LoadState {
        self.state.lock().map(|s| *s).unwrap_or(LoadState::Failed)
    }

    /// The manifest of the last successful load in this process.
    pub fn active_manifest(&self) -> Option<Manifest> {
        self.active.lock().ok().and_then(|m| m.clone())
    }

    pub fn cache(&self) -> Option<&Arc<CacheStore>> {
        self.cache.as_ref()
    }

    pub fn chain(&self) -> &FetcherChain {
        &self.chain
    }

    /// Load the bundle at `manifest_url` into `engine`.
    pub async fn load(&self, engine: &mut dyn Engine, manifest_url: &str) -> Result<LoadResult> {
        self.load_with_cancel(engine, manifest_url, &CancellationToken::new())
            .await
    }

    /// [`load`](Self::load), stopping early once `cancel` fires.
    ///
    /// Cancellation is checked before the manifest fetch, before each module
    /// fetch starts and before evaluation. Module fetches already running are
    /// allowed to finish (and land in the cache). A cancelled load never
    /// touches the engine.
    #[instrument(skip(self, engine, cancel), fields(operation = "load"))]
    pub async fn load_with_cancel(
        &self,
        engine: &mut dyn Engine,
        manifest_url: &str,
        cancel: &CancellationToken,
    ) -> Result<LoadResult> {
        let _busy = self.busy.try_lock().map_err(|_| HotbundleError::LoaderBusy)?;
        let start = Instant::now();
        let outcome = self.run_load(engine, manifest_url, cancel, start).await;
        self.finish("load", start, outcome.is_ok());
        outcome
    }

    async fn run_load(
        &self,
        engine: &mut dyn Engine,
        manifest_url: &str,
        cancel: &CancellationToken,
        start: Instant,
    ) -> Result<LoadResult> {
        checkpoint(cancel)?;
        self.transition(LoadState::ResolvingManifest);
        let prior = self.prior_manifest();
        let resolved = self
            .resolver
            .resolve_against(manifest_url, prior.as_ref())
            .await?;
        if let Some(delta) = &resolved.delta {
            info!(
                added = delta.added.len(),
                changed = delta.changed.len(),
                unchanged = delta.unchanged.len(),
                removed = delta.removed.len(),
                "manifest delta"
            );
        }
        let manifest = resolved.manifest;
        checkpoint(cancel)?;

        // Modules stay unpinned until activation; hold them until then so
        // inserts later in this load cannot evict them.
        let _hold = match &self.cache {
            Some(cache) => Some(cache.hold(manifest.hashes())?),
            None => None,
        };

        self.transition(LoadState::FetchingModules);
        let fetched = self.fetch_all(&manifest, prior.as_ref(), cancel).await?;

        self.transition(LoadState::Verifying);
        for module in &fetched {
            verify(module)?;
        }
        checkpoint(cancel)?;

        self.transition(LoadState::Evaluating);
        for module in &fetched {
            engine
                .evaluate(&module.bytes, &module.id)
                .map_err(|e| HotbundleError::Script {
                    module: module.id.clone(),
                    message: e.message,
                })?;
            debug!(module = %module.id, "module evaluated");
        }

        self.activate(&manifest, prior.as_ref()).await;
        self.transition(LoadState::Done);
        info!(modules = fetched.len(), "bundle loaded");

        Ok(LoadResult {
            modules: fetched.iter().map(FetchedModule::summary).collect(),
            manifest,
            delta: resolved.delta,
            elapsed: start.elapsed(),
        })
    }

    // ========================================================================
    // Fetch phase
    // ========================================================================

    /// Fetch every module, in load order, with bounded concurrency.
    ///
    /// The first hard failure stops modules that have not started yet; those
    /// already running complete. The reported error is the first failure in
    /// load order that is not itself a cancellation.
    async fn fetch_all(
        &self,
        manifest: &Manifest,
        prior: Option<&Manifest>,
        cancel: &CancellationToken,
    ) -> Result<Vec<FetchedModule>> {
        let stop = cancel.child_token();
        let stop = &stop;
        let results: Vec<Result<FetchedModule>> = stream::iter(manifest.ordered())
            .map(|(id, module)| async move {
                checkpoint(stop)?;
                let result = self.obtain(id, module, prior).await;
                if result.is_err() {
                    stop.cancel();
                }
                result
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut fetched = Vec::with_capacity(results.len());
        let mut cancelled = false;
        for result in results {
            match result {
                Ok(module) => fetched.push(module),
                Err(HotbundleError::Cancelled) => cancelled = true,
                Err(e) => return Err(e),
            }
        }
        if cancelled {
            return Err(HotbundleError::Cancelled);
        }
        Ok(fetched)
    }

    async fn obtain(
        &self,
        id: &str,
        module: &Module,
        prior: Option<&Manifest>,
    ) -> Result<FetchedModule> {
        if let Some(bytes) = self.try_patch(id, module, prior).await {
            return Ok(FetchedModule {
                id: id.to_string(),
                sha256: module.sha256,
                bytes,
                source: ModuleSource::Patch,
            });
        }

        let fetched = self
            .chain
            .fetch(id, &module.sha256, &module.url, None)
            .await?;
        Ok(FetchedModule {
            id: id.to_string(),
            sha256: module.sha256,
            bytes: fetched.bytes,
            source: ModuleSource::Fetcher(fetched.fetcher),
        })
    }

    /// Rebuild a module from its previous version when the manifest offers a
    /// patch and the previous bytes are cached. `None` means "fetch in full".
    async fn try_patch(&self, id: &str, module: &Module, prior: Option<&Manifest>) -> Option<Bytes> {
        let (Some(from), Some(patch_url)) = (&module.patch_from, &module.patch_url) else {
            return None;
        };
        let cache = self.cache.as_ref()?;
        let base_hash = prior?.module(from)?.sha256;
        if base_hash == module.sha256 || cache.contains(&module.sha256).unwrap_or(false) {
            return None;
        }

        match self
            .patch_from_cache(cache, module, &base_hash, patch_url)
            .await
        {
            Ok(bytes) => {
                metrics::counter!(telemetry::PATCHES_APPLIED_TOTAL).increment(1);
                debug!(module = %id, base = %base_hash, "module rebuilt from patch");
                Some(bytes)
            }
            Err(e) => {
                warn!(module = %id, error = %e, "patch unusable, fetching full module");
                None
            }
        }
    }

    async fn patch_from_cache(
        &self,
        cache: &CacheStore,
        module: &Module,
        base_hash: &Sha256Hash,
        patch_url: &str,
    ) -> Result<Bytes> {
        let base = cache.get(base_hash).await?.ok_or_else(|| {
            HotbundleError::Patch(format!("base {base_hash} is no longer cached"))
        })?;
        let patch = self.network.get(patch_url).await?;
        let rebuilt = Bytes::from(apply_patch(&base, &patch)?);

        let actual = Sha256Hash::digest(&rebuilt);
        if actual != module.sha256 {
            metrics::counter!(telemetry::INTEGRITY_FAILURES_TOTAL, "stage" => "patch")
                .increment(1);
            return Err(HotbundleError::Patch(format!(
                "patched bytes hash to {actual}, expected {}",
                module.sha256
            )));
        }
        cache
            .get_or_put(&module.sha256, || std::future::ready(Ok(rebuilt)))
            .await
    }

    // ========================================================================
    // Bookkeeping
    // ========================================================================

    /// The manifest to diff and patch against: this process's last load, or
    /// the one recorded in the cache by an earlier process.
    fn prior_manifest(&self) -> Option<Manifest> {
        if let Some(active) = self.active_manifest() {
            return Some(active);
        }
        let cache = self.cache.as_ref()?;
        let json = match cache.manifest(&self.application) {
            Ok(json) => json?,
            Err(e) => {
                warn!(error = %e, "failed to read recorded manifest");
                return None;
            }
        };
        match Manifest::from_json(&json) {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                warn!(application = %self.application, error = %e, "ignoring unreadable recorded manifest");
                None
            }
        }
    }

    /// Pin the new version, release the old one and record the manifest.
    ///
    /// Failures here only affect future loads, so they are logged.
    async fn activate(&self, manifest: &Manifest, prior: Option<&Manifest>) {
        if let Some(cache) = &self.cache {
            for hash in manifest.hashes() {
                if let Err(e) = cache.pin(&hash).await {
                    warn!(hash = %hash, error = %e, "failed to pin module");
                }
            }

            if let Some(prior) = prior {
                let current: HashSet<Sha256Hash> = manifest.hashes().collect();
                for hash in prior.hashes().filter(|h| !current.contains(h)) {
                    if let Err(e) = cache.unpin(&hash).await {
                        warn!(hash = %hash, error = %e, "failed to unpin superseded module");
                    }
                }
            }

            match manifest.to_json() {
                Ok(json) => {
                    if let Err(e) = cache.record_manifest(&self.application, &json).await {
                        warn!(error = %e, "failed to record active manifest");
                    }
                }
                Err(e) => warn!(error = %e, "failed to serialise active manifest"),
            }

            if self.prune_after_load {
                match cache.prune(cache.max_size_bytes()).await {
                    Ok(summary) if summary.evicted > 0 => {
                        info!(
                            evicted = summary.evicted,
                            bytes_freed = summary.bytes_freed,
                            "pruned superseded modules"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "cache prune failed"),
                }
            }
        }

        if let Ok(mut active) = self.active.lock() {
            *active = Some(manifest.clone());
        }
    }

    fn transition(&self, next: LoadState) {
        if let Ok(mut state) = self.state.lock() {
            let previous = *state;
            debug!(from = %previous, to = %next, "loader state");
            *state = next;
        }
    }

    fn finish(&self, operation: &'static str, start: Instant, ok: bool) {
        if !ok {
            self.transition(LoadState::Failed);
        }
        let status = if ok { "ok" } else { "error" };
        metrics::counter!(telemetry::LOADS_TOTAL,
            "operation" => operation,
            "status" => status,
        )
        .increment(1);
        metrics::histogram!(telemetry::LOAD_DURATION_SECONDS, "operation" => operation)
            .record(start.elapsed().as_secs_f64());
    }
}

fn checkpoint(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(HotbundleError::Cancelled);
    }
    Ok(())
}

fn verify(module: &FetchedModule) -> Result<()> {
    let actual = Sha256Hash::digest(&module.bytes);
    if actual == module.sha256 {
        return Ok(());
    }
    metrics::counter!(telemetry::INTEGRITY_FAILURES_TOTAL, "stage" => "loader").increment(1);
    Err(HotbundleError::Integrity {
        id: module.id.clone(),
        expected: module.sha256.to_hex(),
        actual: actual.to_hex(),
    })
}
