//! Local persistence for module bytes.
//!
//! [`CacheStore`] is a content-addressable directory keyed by SHA-256 with a
//! persisted index, LRU eviction and pinning. An optional byte-weighted
//! in-memory tier sits in front of it for repeated reads within a process.

mod index;
mod memory;
mod store;

pub use index::CacheEntry;
pub use store::{
    CacheStats, CacheStore, CacheStoreConfig, Clock, DEFAULT_MAX_SIZE_BYTES,
    DEFAULT_MEMORY_BYTES, Lease, PruneSummary,
};
