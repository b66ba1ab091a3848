//! Persisted cache metadata.
//!
//! The index lives beside the entry files as `index.json` and is rewritten
//! atomically (tmp + rename) after every mutation.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::Sha256Hash;
use crate::{HotbundleError, Result};

pub(crate) const INDEX_FILE_NAME: &str = "index.json";
const INDEX_TMP_FILE_NAME: &str = "index.json.tmp";

/// Maximum supported index format version.
const INDEX_VERSION: u32 = 1;

/// Metadata for one stored artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub hash: Sha256Hash,
    pub size: u64,
    /// Milliseconds since the Unix epoch of the last read or write.
    pub last_accessed_ms: u64,
    /// Monotonic tiebreaker for entries touched in the same millisecond.
    pub access_seq: u64,
    pub pinned: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct CacheIndex {
    pub(crate) version: u32,
    pub(crate) next_seq: u64,
    pub(crate) entries: BTreeMap<Sha256Hash, CacheEntry>,
    /// Last successfully loaded manifest JSON, keyed by application name.
    #[serde(default)]
    pub(crate) manifests: BTreeMap<String, String>,
}

impl Default for CacheIndex {
    fn default() -> Self {
        Self {
            version: INDEX_VERSION,
            next_seq: 0,
            entries: BTreeMap::new(),
            manifests: BTreeMap::new(),
        }
    }
}

impl CacheIndex {
    /// Load the index from `dir`.
    ///
    /// Returns `None` on a missing or unreadable index (logs a warning when
    /// the file exists but cannot be used).
    pub(crate) async fn load(dir: &Path) -> Option<Self> {
        let path = dir.join(INDEX_FILE_NAME);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read cache index");
                return None;
            }
        };
        match serde_json::from_str::<CacheIndex>(&content) {
            Ok(index) if index.version <= INDEX_VERSION => Some(index),
            Ok(index) => {
                warn!(
                    path = %path.display(),
                    version = index.version,
                    "unsupported cache index version, starting empty"
                );
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "corrupt cache index, starting empty");
                None
            }
        }
    }

    /// Serialise for [`write`](Self::write). Split out so callers can snapshot
    /// under a lock and write without it.
    pub(crate) fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| HotbundleError::cache_io("serialise cache index", e))
    }

    /// Atomically replace the index file in `dir` with `json`.
    pub(crate) async fn write(dir: &Path, json: &[u8]) -> Result<()> {
        let tmp_path = dir.join(INDEX_TMP_FILE_NAME);
        let path = dir.join(INDEX_FILE_NAME);
        tokio::fs::write(&tmp_path, json).await.map_err(|e| {
            HotbundleError::cache_io(format!("write {}", tmp_path.display()), e)
        })?;
        tokio::fs::rename(&tmp_path, &path).await.map_err(|e| {
            HotbundleError::cache_io(
                format!("rename {} to {}", tmp_path.display(), path.display()),
                e,
            )
        })
    }

    /// Refresh an entry's access time. Returns false when absent.
    pub(crate) fn touch(&mut self, hash: &Sha256Hash, now_ms: u64) -> bool {
        let seq = self.next_seq;
        match self.entries.get_mut(hash) {
            Some(entry) => {
                entry.last_accessed_ms = now_ms;
                entry.access_seq = seq;
                self.next_seq += 1;
                true
            }
            None => false,
        }
    }

    pub(crate) fn insert(&mut self, hash: Sha256Hash, size: u64, now_ms: u64) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let pinned = self.entries.get(&hash).is_some_and(|e| e.pinned);
        self.entries.insert(
            hash,
            CacheEntry {
                hash,
                size,
                last_accessed_ms: now_ms,
                access_seq: seq,
                pinned,
            },
        );
    }

    pub(crate) fn unpinned_bytes(&self) -> u64 {
        self.entries
            .values()
            .filter(|e| !e.pinned)
            .map(|e| e.size)
            .sum()
    }
}
