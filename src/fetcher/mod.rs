//! Byte sources for modules, composable into fallback chains.
//!
//! # Fallback chain flow
//!
//! ```text
//! Loader: fetch module "app" (sha256 = 9f2c…)
//!                     │
//!                     ▼
//!         ┌─────────────────────┐
//!         │    FetcherChain     │
//!         └─────────┬───────────┘
//!                   │ try in order
//!                   ▼
//!         ┌─────────────────────┐
//!         │   CachingFetcher    │ ──► cache hit: return stored bytes
//!         │  (NetworkFetcher)   │ ──► miss: GET url, verify, store
//!         └─────────┬───────────┘
//!                   │ network error
//!                   ▼
//!         ┌─────────────────────┐
//!         │   EmbeddedFetcher   │ ──► read <dir>/<sha256 hex>
//!         └─────────────────────┘
//! ```
//!
//! Network errors and "not found" move on to the next fetcher. Integrity and
//! local storage errors end the chain immediately.

mod caching;
mod chain;
mod embedded;
mod network;

use async_trait::async_trait;
use bytes::Bytes;

use crate::Result;
use crate::types::Sha256Hash;

pub use caching::CachingFetcher;
pub use chain::{Fetched, FetcherChain};
pub use embedded::EmbeddedFetcher;
pub use network::{NetworkFetcher, http_client};

/// A source of module bytes.
///
/// Implementations return `Ok(None)` when they simply do not have the
/// module, and an error when they tried and failed. They are not required
/// to verify `sha256`; callers do.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Short name used in logs, metrics and exhaustion reports.
    fn name(&self) -> &str;

    async fn fetch(
        &self,
        id: &str,
        sha256: &Sha256Hash,
        url: &str,
        file_name_override: Option<&str>,
    ) -> Result<Option<Bytes>>;
}
