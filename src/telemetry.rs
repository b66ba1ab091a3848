//! Metric names.
//!
//! Every counter and histogram the crate emits is named here. The crate only
//! talks to the `metrics` facade, so nothing is recorded until the
//! application installs a recorder.
//!
//! Names start with `hotbundle_`; counters end in `_total` and the duration
//! histogram in `_seconds`.
//!
//! Labels used across several metrics:
//!
//! - `fetcher`: chain member name ("network", "embedded", "caching(network)")
//! - `outcome`: per-attempt result, "ok", "not_found" or "error"
//! - `operation`: "load" or "download"
//! - `status`: operation result, "ok" or "error"

/// Total fetch attempts made by fetcher chains.
///
/// Labels: `fetcher`, `outcome` ("ok" | "not_found" | "error").
pub const FETCH_ATTEMPTS_TOTAL: &str = "hotbundle_fetch_attempts_total";

/// Total cache store reads served from disk or memory.
pub const CACHE_HITS_TOTAL: &str = "hotbundle_cache_hits_total";

/// Total cache store lookups that had to invoke a loader.
pub const CACHE_MISSES_TOTAL: &str = "hotbundle_cache_misses_total";

/// Total entries evicted by prune passes.
pub const CACHE_EVICTIONS_TOTAL: &str = "hotbundle_cache_evictions_total";

/// Total bytes freed by prune passes.
pub const CACHE_EVICTED_BYTES_TOTAL: &str = "hotbundle_cache_evicted_bytes_total";

/// Total byte streams rejected for hashing to the wrong value.
///
/// Labels: `stage` ("cache" | "loader" | "patch").
pub const INTEGRITY_FAILURES_TOTAL: &str = "hotbundle_integrity_failures_total";

/// Total modules reconstructed from a binary patch.
pub const PATCHES_APPLIED_TOTAL: &str = "hotbundle_patches_applied_total";

/// Total load and download operations.
///
/// Labels: `operation` ("load" | "download"), `status` ("ok" | "error").
pub const LOADS_TOTAL: &str = "hotbundle_loads_total";

/// Load and download duration in seconds.
///
/// Labels: `operation`.
pub const LOAD_DURATION_SECONDS: &str = "hotbundle_load_duration_seconds";
