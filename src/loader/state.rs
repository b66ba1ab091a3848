//! Load lifecycle and results.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::manifest::{Manifest, ManifestDelta};
use crate::types::Sha256Hash;

/// Where a [`Loader`](super::Loader) is in its current (or last) operation.
///
/// ```text
/// Idle → ResolvingManifest → FetchingModules → Verifying → Evaluating → Done
///              └──────────────────┴──────────────┴────────────┴──→ Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadState {
    #[default]
    Idle,
    ResolvingManifest,
    FetchingModules,
    Verifying,
    Evaluating,
    Done,
    Failed,
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoadState::Idle => "idle",
            LoadState::ResolvingManifest => "resolving_manifest",
            LoadState::FetchingModules => "fetching_modules",
            LoadState::Verifying => "verifying",
            LoadState::Evaluating => "evaluating",
            LoadState::Done => "done",
            LoadState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// How a module's bytes were obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleSource {
    /// Served by the named member of the fetcher chain.
    Fetcher(String),
    /// Rebuilt from the previous version plus a downloaded patch.
    Patch,
}

/// One module handed to the engine (or written to disk).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedModule {
    pub id: String,
    pub sha256: Sha256Hash,
    pub size: usize,
    pub source: ModuleSource,
}

/// Outcome of a successful [`Loader::load`](super::Loader::load).
#[derive(Debug, Clone)]
pub struct LoadResult {
    pub manifest: Manifest,
    /// Difference from the previously loaded manifest, if there was one.
    pub delta: Option<ManifestDelta>,
    /// Modules in evaluation order.
    pub modules: Vec<LoadedModule>,
    pub elapsed: Duration,
}

impl LoadResult {
    /// Module ids in the order they were evaluated.
    pub fn order(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.id.as_str()).collect()
    }
}

/// Outcome of a successful [`Loader::download`](super::Loader::download).
#[derive(Debug, Clone)]
pub struct DownloadResult {
    pub manifest: Manifest,
    pub manifest_path: PathBuf,
    /// Written module files, in load order.
    pub module_paths: Vec<PathBuf>,
    pub elapsed: Duration,
}
