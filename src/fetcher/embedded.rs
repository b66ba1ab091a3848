//! Read-only assets shipped alongside the application.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use super::Fetcher;
use crate::types::Sha256Hash;
use crate::{HotbundleError, Result};

/// Looks modules up in a bundled directory by hex hash (or an explicit
/// file name). A missing file is "not found", never an error, so this
/// fetcher can close out a chain as the last resort.
///
/// A directory written by [`Loader::download`](crate::Loader::download)
/// has exactly this layout.
#[derive(Debug, Clone)]
pub struct EmbeddedFetcher {
    dir: PathBuf,
}

impl EmbeddedFetcher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn directory(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl Fetcher for EmbeddedFetcher {
    fn name(&self) -> &str {
        "embedded"
    }

    async fn fetch(
        &self,
        id: &str,
        sha256: &Sha256Hash,
        _url: &str,
        file_name_override: Option<&str>,
    ) -> Result<Option<Bytes>> {
        let file_name = match file_name_override {
            Some(name) if name.contains(['/', '\\']) || name == ".." => {
                return Err(HotbundleError::InvalidInput(format!(
                    "embedded file name must not contain a path: '{name}'"
                )));
            }
            Some(name) => name.to_string(),
            None => sha256.to_hex(),
        };
        let path = self.dir.join(file_name);

        match tokio::fs::read(&path).await {
            Ok(data) => {
                debug!(module = %id, path = %path.display(), "serving embedded module");
                Ok(Some(Bytes::from(data)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(HotbundleError::Fetch {
                url: path.display().to_string(),
                status: None,
                message: e.to_string(),
            }),
        }
    }
}
