//! In-memory read tier in front of the disk store.
//!
//! Holds recently read module bodies so repeated loads in one process skip
//! the filesystem. Capacity is weighed in bytes, not entries. The disk index
//! stays authoritative: the store consults it before ever touching this tier
//! and invalidates entries here whenever it evicts from disk.

use bytes::Bytes;
use moka::future::Cache;

use crate::types::Sha256Hash;

pub(crate) struct MemoryTier {
    cache: Cache<Sha256Hash, Bytes>,
}

impl MemoryTier {
    /// Create a tier holding at most `max_bytes` of module bodies.
    pub(crate) fn new(max_bytes: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_bytes)
            .weigher(|_hash: &Sha256Hash, bytes: &Bytes| -> u32 {
                u32::try_from(bytes.len()).unwrap_or(u32::MAX)
            })
            .build();
        Self { cache }
    }

    pub(crate) async fn get(&self, hash: &Sha256Hash) -> Option<Bytes> {
        self.cache.get(hash).await
    }

    pub(crate) async fn insert(&self, hash: Sha256Hash, bytes: Bytes) {
        self.cache.insert(hash, bytes).await;
    }

    pub(crate) async fn invalidate(&self, hash: &Sha256Hash) {
        self.cache.invalidate(hash).await;
    }
}
