//! Writing a bundle to a directory instead of an engine.

use std::path::{Path, PathBuf};
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use super::{LoadState, Loader, verify};
use super::state::DownloadResult;
use crate::{HotbundleError, Result};

/// File name the manifest is written under by [`Loader::download`].
pub const PREBUILT_MANIFEST_FILE_NAME: &str = "manifest.json";

impl Loader {
    /// Resolve, fetch and verify the bundle at `manifest_url`, then write it
    /// to `dir`: one file per module named by its hex hash, plus
    /// [`PREBUILT_MANIFEST_FILE_NAME`].
    ///
    /// Nothing is written unless every module verified. The manifest is
    /// written last, so its presence marks a complete download. The
    /// directory can be served directly by an
    /// [`EmbeddedFetcher`](crate::EmbeddedFetcher).
    #[instrument(skip(self, dir), fields(operation = "download", dir = %dir.display()))]
    pub async fn download(&self, manifest_url: &str, dir: &Path) -> Result<DownloadResult> {
        let _busy = self.busy.try_lock().map_err(|_| HotbundleError::LoaderBusy)?;
        let start = Instant::now();
        let outcome = self.run_download(manifest_url, dir, start).await;
        self.finish("download", start, outcome.is_ok());
        outcome
    }

    async fn run_download(
        &self,
        manifest_url: &str,
        dir: &Path,
        start: Instant,
    ) -> Result<DownloadResult> {
        self.transition(LoadState::ResolvingManifest);
        let manifest = self.resolver.resolve(manifest_url).await?;

        self.transition(LoadState::FetchingModules);
        let fetched = self
            .fetch_all(&manifest, None, &CancellationToken::new())
            .await?;

        self.transition(LoadState::Verifying);
        for module in &fetched {
            verify(module)?;
        }

        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| HotbundleError::cache_io(format!("create {}", dir.display()), e))?;

        let mut module_paths = Vec::with_capacity(fetched.len());
        for module in &fetched {
            let path = dir.join(module.sha256.to_hex());
            write_atomic(&path, &module.bytes).await?;
            module_paths.push(path);
        }

        let manifest_path = dir.join(PREBUILT_MANIFEST_FILE_NAME);
        write_atomic(&manifest_path, manifest.to_json()?.as_bytes()).await?;

        self.transition(LoadState::Done);
        info!(modules = module_paths.len(), "bundle downloaded");
        Ok(DownloadResult {
            manifest,
            manifest_path,
            module_paths,
            elapsed: start.elapsed(),
        })
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);
    tokio::fs::write(&tmp_path, bytes)
        .await
        .map_err(|e| HotbundleError::cache_io(format!("write {}", tmp_path.display()), e))?;
    tokio::fs::rename(&tmp_path, path).await.map_err(|e| {
        HotbundleError::cache_io(format!("rename into {}", path.display()), e)
    })
}
