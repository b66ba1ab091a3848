//! Ordered fallback over several fetchers.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, instrument, warn};

use super::Fetcher;
use crate::error::{AttemptOutcome, FetchAttempt};
use crate::telemetry;
use crate::types::Sha256Hash;
use crate::{HotbundleError, Result};

/// Bytes produced by a chain, with the name of the fetcher that produced them.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub bytes: Bytes,
    pub fetcher: String,
}

/// Fetchers in priority order (index 0 = first tried).
///
/// Each fetcher is tried once. The first one that returns bytes wins;
/// "not found" and network failures move on to the next; anything else
/// ends the chain. When every fetcher has been tried the result is
/// [`HotbundleError::FetchExhausted`] listing each attempt.
#[derive(Clone, Default)]
pub struct FetcherChain {
    fetchers: Vec<Arc<dyn Fetcher>>,
}

impl std::fmt::Debug for FetcherChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl FetcherChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fetcher (lowest priority so far).
    pub fn push(&mut self, fetcher: Arc<dyn Fetcher>) {
        self.fetchers.push(fetcher);
    }

    /// Builder-style [`push`](Self::push).
    pub fn with(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.push(fetcher);
        self
    }

    pub fn len(&self) -> usize {
        self.fetchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fetchers.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.fetchers.iter().map(|f| f.name()).collect()
    }

    #[instrument(skip(self, sha256, file_name_override), fields(operation = "fetch_module"))]
    pub async fn fetch(
        &self,
        id: &str,
        sha256: &Sha256Hash,
        url: &str,
        file_name_override: Option<&str>,
    ) -> Result<Fetched> {
        let mut attempts = Vec::with_capacity(self.fetchers.len());
        for fetcher in &self.fetchers {
            match fetcher.fetch(id, sha256, url, file_name_override).await {
                Ok(Some(bytes)) => {
                    record_attempt(fetcher.name(), "ok");
                    debug!(module = %id, fetcher = fetcher.name(), size = bytes.len(), "module fetched");
                    return Ok(Fetched {
                        bytes,
                        fetcher: fetcher.name().to_string(),
                    });
                }
                Ok(None) => {
                    record_attempt(fetcher.name(), "not_found");
                    attempts.push(FetchAttempt {
                        fetcher: fetcher.name().to_string(),
                        outcome: AttemptOutcome::NotFound,
                    });
                }
                Err(e) if e.is_fallback_trigger() => {
                    record_attempt(fetcher.name(), "error");
                    warn!(module = %id, fetcher = fetcher.name(), error = %e, "fetcher failed, trying next");
                    attempts.push(FetchAttempt {
                        fetcher: fetcher.name().to_string(),
                        outcome: AttemptOutcome::Failed(e.to_string()),
                    });
                }
                Err(e) => {
                    record_attempt(fetcher.name(), "error");
                    return Err(e);
                }
            }
        }
        Err(HotbundleError::FetchExhausted {
            id: id.to_string(),
            attempts,
        })
    }
}

fn record_attempt(fetcher: &str, outcome: &'static str) {
    metrics::counter!(telemetry::FETCH_ATTEMPTS_TOTAL,
        "fetcher" => fetcher.to_owned(),
        "outcome" => outcome,
    )
    .increment(1);
}
