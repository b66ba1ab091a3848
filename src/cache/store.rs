//! Content-addressable disk store.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tokio::sync::{Notify, OnceCell};
use tracing::{debug, instrument, warn};

use super::index::{CacheEntry, CacheIndex, INDEX_FILE_NAME};
use super::memory::MemoryTier;
use crate::telemetry;
use crate::types::Sha256Hash;
use crate::{HotbundleError, Result};

/// Default store budget: 64 MiB of unpinned entries.
pub const DEFAULT_MAX_SIZE_BYTES: u64 = 64 * 1024 * 1024;

/// Default in-memory tier size: 8 MiB.
pub const DEFAULT_MEMORY_BYTES: u64 = 8 * 1024 * 1024;

/// Source of "now" in milliseconds since the Unix epoch.
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

fn system_clock() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Configuration for a [`CacheStore`].
///
/// ```rust
/// # use hotbundle::CacheStoreConfig;
/// let config = CacheStoreConfig::new("/tmp/hotbundle-cache")
///     .max_size_bytes(32 * 1024 * 1024)
///     .memory_bytes(0);
/// assert_eq!(config.memory_bytes, 0);
/// ```
#[derive(Debug, Clone)]
pub struct CacheStoreConfig {
    pub directory: PathBuf,
    /// Budget for unpinned entries. Default: 64 MiB.
    pub max_size_bytes: u64,
    /// In-memory tier capacity; 0 disables it. Default: 8 MiB.
    pub memory_bytes: u64,
}

impl CacheStoreConfig {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            max_size_bytes: DEFAULT_MAX_SIZE_BYTES,
            memory_bytes: DEFAULT_MEMORY_BYTES,
        }
    }

    pub fn max_size_bytes(mut self, n: u64) -> Self {
        self.max_size_bytes = n;
        self
    }

    pub fn memory_bytes(mut self, n: u64) -> Self {
        self.memory_bytes = n;
        self
    }
}

/// Result of a prune pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneSummary {
    pub evicted: usize,
    pub bytes_freed: u64,
}

/// Point-in-time store totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: u64,
    pub pinned_bytes: u64,
}

struct State {
    index: CacheIndex,
    /// Outstanding reads and holds per hash; prune skips these.
    leases: HashMap<Sha256Hash, usize>,
    /// Hashes whose files a prune is still deleting.
    evicting: HashSet<Sha256Hash>,
}

type Flight = Arc<OnceCell<Result<Bytes>>>;

/// Content-addressable store of module bytes keyed by SHA-256.
///
/// One file per entry, named by the hex hash, plus a persisted index.
/// Bytes are verified against their key before they are written and
/// trusted on every later read.
///
/// Concurrent [`get_or_put`](Self::get_or_put) calls for one hash share a
/// single loader invocation. Different hashes never wait on each other
/// except for the brief index rewrite. A fill for a hash that a prune is
/// still deleting waits for that deletion before writing its file.
pub struct CacheStore {
    dir: PathBuf,
    max_size_bytes: u64,
    state: Mutex<State>,
    in_flight: Mutex<HashMap<Sha256Hash, Flight>>,
    /// Serialises index rewrites so the newest snapshot always lands last.
    persist_lock: tokio::sync::Mutex<()>,
    /// Set by a hit whose access time is not yet covered by a queued rewrite.
    access_dirty: AtomicBool,
    eviction_done: Notify,
    memory: Option<MemoryTier>,
    clock: Clock,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("dir", &self.dir)
            .field("max_size_bytes", &self.max_size_bytes)
            .finish_non_exhaustive()
    }
}

impl CacheStore {
    /// Open (or create) a store, reconciling the index with the files on disk.
    pub async fn open(config: CacheStoreConfig) -> Result<Self> {
        Self::open_with_clock(config, Arc::new(system_clock)).await
    }

    /// Open with a custom clock. Access ordering follows this clock.
    pub async fn open_with_clock(config: CacheStoreConfig, clock: Clock) -> Result<Self> {
        let dir = config.directory;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| HotbundleError::cache_io(format!("create {}", dir.display()), e))?;

        let mut index = CacheIndex::load(&dir).await.unwrap_or_default();
        let dirty = reconcile(&dir, &mut index).await?;

        let store = Self {
            memory: (config.memory_bytes > 0).then(|| MemoryTier::new(config.memory_bytes)),
            max_size_bytes: config.max_size_bytes,
            state: Mutex::new(State {
                index,
                leases: HashMap::new(),
                evicting: HashSet::new(),
            }),
            in_flight: Mutex::new(HashMap::new()),
            persist_lock: tokio::sync::Mutex::new(()),
            access_dirty: AtomicBool::new(false),
            eviction_done: Notify::new(),
            clock,
            dir,
        };
        if dirty {
            store.persist().await?;
        }
        Ok(store)
    }

    pub fn directory(&self) -> &Path {
        &self.dir
    }

    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_bytes
    }

    // ========================================================================
    // Reads and writes
    // ========================================================================

    /// Return the stored bytes for `hash`, or fill the entry with `loader`.
    ///
    /// On a hit the access time is refreshed and `loader` is not called.
    /// On a miss exactly one concurrent caller runs its loader; the others
    /// receive a clone of that outcome. Loader output that does not hash to
    /// `hash` is discarded and reported as [`HotbundleError::Integrity`].
    pub async fn get_or_put<F, Fut>(&self, hash: &Sha256Hash, loader: F) -> Result<Bytes>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes>>,
    {
        if let Some(bytes) = self.get(hash).await? {
            metrics::counter!(telemetry::CACHE_HITS_TOTAL).increment(1);
            return Ok(bytes);
        }

        let flight = self.join_flight(hash)?;
        let outcome = flight
            .get_or_init(|| async move {
                // An earlier flight may have landed between our miss and joining.
                if let Some(bytes) = self.get(hash).await? {
                    metrics::counter!(telemetry::CACHE_HITS_TOTAL).increment(1);
                    return Ok(bytes);
                }
                metrics::counter!(telemetry::CACHE_MISSES_TOTAL).increment(1);
                self.fill(hash, loader).await
            })
            .await
            .clone();
        self.leave_flight(hash, &flight);
        outcome
    }

    /// Read an entry without filling it.
    ///
    /// A hit refreshes the access time and rewrites the index so the LRU
    /// order survives restarts. Hits that arrive while a rewrite is already
    /// queued ride on that rewrite and return without waiting for it, so
    /// concurrent hits cost at most one extra index write between them.
    pub async fn get(&self, hash: &Sha256Hash) -> Result<Option<Bytes>> {
        let Some(reader) = self.begin_read(hash)? else {
            return Ok(None);
        };

        let cached = match &self.memory {
            Some(memory) => memory.get(hash).await,
            None => None,
        };
        let bytes = match cached {
            Some(bytes) => bytes,
            None => match tokio::fs::read(self.entry_path(hash)).await {
                Ok(data) => {
                    let bytes = Bytes::from(data);
                    if let Some(memory) = &self.memory {
                        memory.insert(*hash, bytes.clone()).await;
                    }
                    bytes
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    drop(reader);
                    warn!(hash = %hash, "cache entry file missing, dropping entry");
                    self.forget(hash)?;
                    self.persist().await?;
                    return Ok(None);
                }
                Err(e) => {
                    return Err(HotbundleError::cache_io(format!("read entry {hash}"), e));
                }
            },
        };
        drop(reader);

        self.persist_access().await?;
        Ok(Some(bytes))
    }

    pub fn contains(&self, hash: &Sha256Hash) -> Result<bool> {
        Ok(self.lock_state()?.index.entries.contains_key(hash))
    }

    /// Metadata for one entry.
    pub fn entry(&self, hash: &Sha256Hash) -> Result<Option<CacheEntry>> {
        Ok(self.lock_state()?.index.entries.get(hash).cloned())
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let state = self.lock_state()?;
        let entries = &state.index.entries;
        Ok(CacheStats {
            entries: entries.len(),
            total_bytes: entries.values().map(|e| e.size).sum(),
            pinned_bytes: entries.values().filter(|e| e.pinned).map(|e| e.size).sum(),
        })
    }

    // ========================================================================
    // Pinning and eviction
    // ========================================================================

    /// Shield `hashes` from eviction until the returned [`Lease`] drops.
    ///
    /// Unlike a pin, a hold is not persisted and does not need an entry to
    /// exist yet. The loader holds a bundle's hashes for the whole load so
    /// inserts that overflow the budget cannot evict modules it fetched
    /// earlier but has not pinned yet.
    pub fn hold(&self, hashes: impl IntoIterator<Item = Sha256Hash>) -> Result<Lease<'_>> {
        let hashes: Vec<Sha256Hash> = hashes.into_iter().collect();
        let mut state = self.lock_state()?;
        for hash in &hashes {
            *state.leases.entry(*hash).or_insert(0) += 1;
        }
        Ok(Lease { store: self, hashes })
    }

    /// Protect an entry from eviction. Returns false if there is no entry.
    pub async fn pin(&self, hash: &Sha256Hash) -> Result<bool> {
        self.set_pinned(hash, true).await
    }

    /// Make an entry evictable again. Returns false if there is no entry.
    pub async fn unpin(&self, hash: &Sha256Hash) -> Result<bool> {
        self.set_pinned(hash, false).await
    }

    /// Evict least-recently-accessed unpinned entries until the unpinned
    /// total is within `max_size_bytes`.
    ///
    /// Pinned entries, entries being read or held and entries with a fill in
    /// flight are never evicted. Victims stay reserved until their files are
    /// gone, so a concurrent fill of the same hash lands after the deletion.
    /// A file that cannot be deleted is logged and left as an orphan for the
    /// next [`open`](Self::open) to clean up.
    #[instrument(skip(self), fields(operation = "prune"))]
    pub async fn prune(&self, max_size_bytes: u64) -> Result<PruneSummary> {
        let victims = {
            let in_flight: Vec<Sha256Hash> = self.lock_flights()?.keys().copied().collect();
            let mut state = self.lock_state()?;
            let mut unpinned = state.index.unpinned_bytes();
            if unpinned <= max_size_bytes {
                return Ok(PruneSummary::default());
            }

            let mut candidates: Vec<&CacheEntry> = state
                .index
                .entries
                .values()
                .filter(|e| !e.pinned)
                .filter(|e| !in_flight.contains(&e.hash))
                .filter(|e| state.leases.get(&e.hash).copied().unwrap_or(0) == 0)
                .collect();
            candidates.sort_by_key(|e| (e.last_accessed_ms, e.access_seq));

            let mut victims = Vec::new();
            for entry in candidates {
                if unpinned <= max_size_bytes {
                    break;
                }
                unpinned -= entry.size;
                victims.push((entry.hash, entry.size));
            }
            for (hash, _) in &victims {
                state.index.entries.remove(hash);
                state.evicting.insert(*hash);
            }
            victims
        };

        if victims.is_empty() {
            return Ok(PruneSummary::default());
        }
        let _reserved = Evicting {
            store: self,
            hashes: victims.iter().map(|(hash, _)| *hash).collect(),
        };
        self.persist().await?;

        let mut summary = PruneSummary::default();
        for (hash, size) in victims {
            if let Some(memory) = &self.memory {
                memory.invalidate(&hash).await;
            }
            match tokio::fs::remove_file(self.entry_path(&hash)).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(hash = %hash, error = %e, "failed to delete evicted cache file");
                }
            }
            summary.evicted += 1;
            summary.bytes_freed += size;
        }

        metrics::counter!(telemetry::CACHE_EVICTIONS_TOTAL).increment(summary.evicted as u64);
        metrics::counter!(telemetry::CACHE_EVICTED_BYTES_TOTAL).increment(summary.bytes_freed);
        debug!(
            evicted = summary.evicted,
            bytes_freed = summary.bytes_freed,
            "cache pruned"
        );
        Ok(summary)
    }

    // ========================================================================
    // Active manifests
    // ========================================================================

    /// Remember the manifest JSON most recently loaded for `application`.
    pub async fn record_manifest(&self, application: &str, json: &str) -> Result<()> {
        self.lock_state()?
            .index
            .manifests
            .insert(application.to_string(), json.to_string());
        self.persist().await
    }

    /// The manifest JSON most recently recorded for `application`.
    pub fn manifest(&self, application: &str) -> Result<Option<String>> {
        Ok(self.lock_state()?.index.manifests.get(application).cloned())
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn entry_path(&self, hash: &Sha256Hash) -> PathBuf {
        self.dir.join(hash.to_hex())
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| HotbundleError::cache_io("index lock", "poisoned"))
    }

    fn lock_flights(&self) -> Result<MutexGuard<'_, HashMap<Sha256Hash, Flight>>> {
        self.in_flight
            .lock()
            .map_err(|_| HotbundleError::cache_io("in-flight lock", "poisoned"))
    }

    fn join_flight(&self, hash: &Sha256Hash) -> Result<Flight> {
        Ok(self.lock_flights()?.entry(*hash).or_default().clone())
    }

    fn leave_flight(&self, hash: &Sha256Hash, flight: &Flight) {
        if let Ok(mut flights) = self.in_flight.lock() {
            if flights.get(hash).is_some_and(|f| Arc::ptr_eq(f, flight)) {
                flights.remove(hash);
            }
        }
    }

    /// Register a reader and refresh the access time, or `None` if absent.
    fn begin_read(&self, hash: &Sha256Hash) -> Result<Option<Lease<'_>>> {
        let now = (self.clock)();
        let mut state = self.lock_state()?;
        if !state.index.touch(hash, now) {
            return Ok(None);
        }
        *state.leases.entry(*hash).or_insert(0) += 1;
        Ok(Some(Lease {
            store: self,
            hashes: vec![*hash],
        }))
    }

    /// Wait until no prune is deleting the file for `hash`.
    async fn wait_for_eviction(&self, hash: &Sha256Hash) -> Result<()> {
        loop {
            let done = self.eviction_done.notified();
            let evicting = self.lock_state()?.evicting.contains(hash);
            if !evicting {
                return Ok(());
            }
            debug!(hash = %hash, "waiting for eviction to finish before storing");
            done.await;
        }
    }

    fn forget(&self, hash: &Sha256Hash) -> Result<()> {
        self.lock_state()?.index.entries.remove(hash);
        Ok(())
    }

    async fn set_pinned(&self, hash: &Sha256Hash, pinned: bool) -> Result<bool> {
        {
            let mut state = self.lock_state()?;
            match state.index.entries.get_mut(hash) {
                None => return Ok(false),
                Some(entry) if entry.pinned == pinned => return Ok(true),
                Some(entry) => entry.pinned = pinned,
            }
        }
        self.persist().await?;
        Ok(true)
    }

    /// Run `loader`, verify, and store. Called only by the flight leader.
    async fn fill<F, Fut>(&self, hash: &Sha256Hash, loader: F) -> Result<Bytes>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes>>,
    {
        let bytes = loader().await?;
        let actual = Sha256Hash::digest(&bytes);
        if actual != *hash {
            metrics::counter!(telemetry::INTEGRITY_FAILURES_TOTAL, "stage" => "cache")
                .increment(1);
            warn!(expected = %hash, actual = %actual, "discarding bytes with mismatched hash");
            return Err(HotbundleError::Integrity {
                id: hash.to_hex(),
                expected: hash.to_hex(),
                actual: actual.to_hex(),
            });
        }

        self.write_entry(hash, &bytes).await?;
        if let Some(memory) = &self.memory {
            memory.insert(*hash, bytes.clone()).await;
        }

        let over_budget = self.lock_state()?.index.unpinned_bytes() > self.max_size_bytes;
        if over_budget {
            if let Err(e) = self.prune(self.max_size_bytes).await {
                warn!(error = %e, "prune after insert failed");
            }
        }
        Ok(bytes)
    }

    /// Write the file, then publish it in the index. A crash before the index
    /// write leaves only an orphan file, which the next open removes.
    async fn write_entry(&self, hash: &Sha256Hash, bytes: &[u8]) -> Result<()> {
        self.wait_for_eviction(hash).await?;
        let path = self.entry_path(hash);
        let tmp_path = path.with_extension("tmp");
        if let Err(e) = tokio::fs::write(&tmp_path, bytes).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(HotbundleError::cache_io(
                format!("write {}", tmp_path.display()),
                e,
            ));
        }
        tokio::fs::rename(&tmp_path, &path).await.map_err(|e| {
            HotbundleError::cache_io(format!("rename into {}", path.display()), e)
        })?;

        let now = (self.clock)();
        self.lock_state()?
            .index
            .insert(*hash, bytes.len() as u64, now);

        if let Err(e) = self.persist().await {
            self.forget(hash)?;
            let _ = tokio::fs::remove_file(&path).await;
            return Err(e);
        }
        debug!(hash = %hash, size = bytes.len(), "cache entry stored");
        Ok(())
    }

    async fn persist(&self) -> Result<()> {
        let _guard = self.persist_lock.lock().await;
        // Every snapshot taken from here on includes earlier access times.
        self.access_dirty.store(false, Ordering::SeqCst);
        let json = self.lock_state()?.index.to_json()?;
        CacheIndex::write(&self.dir, &json).await
    }

    /// Persist an access-time update unless a rewrite that will include it
    /// is already queued.
    async fn persist_access(&self) -> Result<()> {
        if self.access_dirty.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.persist().await
    }
}

/// Keeps hashes out of prune's reach until dropped.
///
/// Returned by [`CacheStore::hold`]; also taken internally for each read.
pub struct Lease<'a> {
    store: &'a CacheStore,
    hashes: Vec<Sha256Hash>,
}

impl std::fmt::Debug for Lease<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease").field("hashes", &self.hashes).finish()
    }
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.store.state.lock() {
            for hash in &self.hashes {
                if let Some(count) = state.leases.get_mut(hash) {
                    *count -= 1;
                    if *count == 0 {
                        state.leases.remove(hash);
                    }
                }
            }
        }
    }
}

/// Releases a prune's victims once their files are deleted (or the prune
/// is abandoned) and wakes fills waiting on them.
struct Evicting<'a> {
    store: &'a CacheStore,
    hashes: Vec<Sha256Hash>,
}

impl Drop for Evicting<'_> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.store.state.lock() {
            for hash in &self.hashes {
                state.evicting.remove(hash);
            }
        }
        self.store.eviction_done.notify_waiters();
    }
}

/// Bring the index and directory contents into agreement.
///
/// Files the index does not know (including leftover `.tmp` files) are
/// deleted; entries whose file is gone are dropped. Returns whether the
/// index changed.
async fn reconcile(dir: &Path, index: &mut CacheIndex) -> Result<bool> {
    let mut present = std::collections::HashSet::new();
    let mut read_dir = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| HotbundleError::cache_io(format!("list {}", dir.display()), e))?;

    while let Some(item) = read_dir
        .next_entry()
        .await
        .map_err(|e| HotbundleError::cache_io(format!("list {}", dir.display()), e))?
    {
        let is_file = item.file_type().await.map(|t| t.is_file()).unwrap_or(false);
        let name = item.file_name().to_string_lossy().into_owned();
        if !is_file || name == INDEX_FILE_NAME {
            continue;
        }
        match Sha256Hash::from_hex(&name) {
            Ok(hash) if index.entries.contains_key(&hash) => {
                present.insert(hash);
            }
            _ => {
                debug!(file = %name, "removing orphaned cache file");
                if let Err(e) = tokio::fs::remove_file(item.path()).await {
                    warn!(file = %name, error = %e, "failed to remove orphaned cache file");
                }
            }
        }
    }

    let before = index.entries.len();
    index.entries.retain(|hash, _| {
        let keep = present.contains(hash);
        if !keep {
            warn!(hash = %hash, "cache entry file missing, dropping entry");
        }
        keep
    });
    Ok(index.entries.len() != before)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    use super::*;

    fn ticking_clock() -> Clock {
        let now = Arc::new(AtomicU64::new(1_000));
        Arc::new(move || now.fetch_add(1, Ordering::SeqCst))
    }

    async fn open(dir: &Path, max: u64) -> CacheStore {
        CacheStore::open_with_clock(
            CacheStoreConfig::new(dir).max_size_bytes(max).memory_bytes(0),
            ticking_clock(),
        )
        .await
        .unwrap()
    }

    async fn put(store: &CacheStore, body: &'static [u8]) -> Sha256Hash {
        let hash = Sha256Hash::digest(body);
        store
            .get_or_put(&hash, || async move { Ok(Bytes::from_static(body)) })
            .await
            .unwrap();
        hash
    }

    #[tokio::test]
    async fn hit_does_not_call_loader() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path(), 1024).await;
        let hash = put(&store, b"alpha").await;

        let calls = AtomicU64::new(0);
        let bytes = store
            .get_or_put(&hash, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Bytes::from_static(b"other"))
            })
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"alpha");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn mismatched_bytes_are_not_stored() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path(), 1024).await;
        let declared = Sha256Hash::digest(b"expected");

        let err = store
            .get_or_put(&declared, || async { Ok(Bytes::from_static(b"tampered")) })
            .await
            .unwrap_err();
        assert!(matches!(err, HotbundleError::Integrity { .. }));
        assert!(!store.contains(&declared).unwrap());
        assert!(!store.contains(&Sha256Hash::digest(b"tampered")).unwrap());
        assert!(!dir.path().join(declared.to_hex()).exists());
    }

    #[tokio::test]
    async fn prune_evicts_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path(), 1024).await;
        let a = put(&store, b"aaaa").await;
        let b = put(&store, b"bbbb").await;
        let c = put(&store, b"cccc").await;
        // Touch `a` so `b` becomes the oldest.
        store.get(&a).await.unwrap();

        let summary = store.prune(8).await.unwrap();
        assert_eq!(summary, PruneSummary { evicted: 1, bytes_freed: 4 });
        assert!(store.contains(&a).unwrap());
        assert!(!store.contains(&b).unwrap());
        assert!(store.contains(&c).unwrap());
        assert!(!dir.path().join(b.to_hex()).exists());
    }

    #[tokio::test]
    async fn active_reader_blocks_eviction() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path(), 1024).await;
        let a = put(&store, b"aaaa").await;

        let guard = store.begin_read(&a).unwrap().unwrap();
        assert_eq!(store.prune(0).await.unwrap().evicted, 0);
        drop(guard);
        assert_eq!(store.prune(0).await.unwrap().evicted, 1);
    }

    #[tokio::test]
    async fn held_entries_survive_prune_until_released() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path(), 1024).await;
        let a = put(&store, b"aaaa").await;
        let b = put(&store, b"bbbb").await;

        let hold = store.hold([a, Sha256Hash::digest(b"not yet stored")]).unwrap();
        assert_eq!(store.prune(0).await.unwrap().evicted, 1);
        assert!(store.contains(&a).unwrap());
        assert!(!store.contains(&b).unwrap());

        drop(hold);
        assert_eq!(store.prune(0).await.unwrap().evicted, 1);
        assert!(!store.contains(&a).unwrap());
    }

    #[tokio::test]
    async fn fill_during_prune_lands_after_the_deletion() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(open(dir.path(), 1024).await);
        let hash = put(&store, b"aaaa").await;

        // Stall the prune between dropping the entry and deleting its file.
        let index_write = store.persist_lock.lock().await;
        let pruning = tokio::spawn({
            let store = store.clone();
            async move { store.prune(0).await }
        });
        while store.contains(&hash).unwrap() {
            tokio::task::yield_now().await;
        }

        let filling = tokio::spawn({
            let store = store.clone();
            async move {
                store
                    .get_or_put(&hash, || async { Ok(Bytes::from_static(b"aaaa")) })
                    .await
            }
        });
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        drop(index_write);

        assert_eq!(pruning.await.unwrap().unwrap().evicted, 1);
        assert_eq!(&filling.await.unwrap().unwrap()[..], b"aaaa");
        assert!(store.pin(&hash).await.unwrap());
        assert!(dir.path().join(hash.to_hex()).exists());
    }

    #[tokio::test]
    async fn hits_ride_on_a_queued_index_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(open(dir.path(), 1024).await);
        let a = put(&store, b"aaaa").await;
        let b = put(&store, b"bbbb").await;

        let index_write = store.persist_lock.lock().await;
        let first = tokio::spawn({
            let store = store.clone();
            async move { store.get(&b).await }
        });
        while !store.access_dirty.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }

        // The rewrite queued by the first hit will carry this access too.
        let hit = tokio::time::timeout(Duration::from_secs(5), store.get(&a))
            .await
            .expect("hit waited for a queued index write");
        assert!(hit.unwrap().is_some());

        drop(index_write);
        first.await.unwrap().unwrap();

        let reopened = open(dir.path(), 1024).await;
        let a_entry = reopened.entry(&a).unwrap().unwrap();
        let b_entry = reopened.entry(&b).unwrap().unwrap();
        assert!(a_entry.access_seq > b_entry.access_seq);
    }

    #[tokio::test]
    async fn pin_on_missing_entry_reports_false() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path(), 1024).await;
        assert!(!store.pin(&Sha256Hash::digest(b"nope")).await.unwrap());
    }
}
