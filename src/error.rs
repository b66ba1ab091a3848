//! Hotbundle error types

use std::fmt;

/// Outcome of one fetcher's attempt inside a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchAttempt {
    /// Name of the fetcher that was tried.
    pub fetcher: String,
    pub outcome: AttemptOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    NotFound,
    Failed(String),
}

impl fmt::Display for FetchAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            AttemptOutcome::NotFound => write!(f, "{}: not found", self.fetcher),
            AttemptOutcome::Failed(message) => write!(f, "{}: {message}", self.fetcher),
        }
    }
}

fn format_attempts(attempts: &[FetchAttempt]) -> String {
    if attempts.is_empty() {
        return "no fetchers configured".to_string();
    }
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Hotbundle error types
///
/// Payloads are plain strings so a single outcome can be cloned out to every
/// caller waiting on the same cache fill.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HotbundleError {
    // Manifest errors
    #[error("failed to fetch manifest from {url}: {message}")]
    ManifestFetch { url: String, message: String },

    #[error("invalid manifest: {0}")]
    ManifestParse(String),

    #[error("manifest dependency cycle between modules: {}", .0.join(", "))]
    ManifestCycle(Vec<String>),

    // Module fetch errors
    #[error("fetch failed for {url}{}: {message}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Fetch {
        url: String,
        status: Option<u16>,
        message: String,
    },

    #[error("every fetcher failed for module '{id}': {}", format_attempts(.attempts))]
    FetchExhausted {
        id: String,
        attempts: Vec<FetchAttempt>,
    },

    /// A fetcher has no bytes for this module.
    /// Chains treat this as a cue to try the next fetcher.
    #[error("module '{id}' not found")]
    ModuleNotFound { id: String },

    #[error("integrity check failed for module '{id}': expected sha256 {expected}, got {actual}")]
    Integrity {
        id: String,
        expected: String,
        actual: String,
    },

    // Local storage
    #[error("cache I/O error ({context}): {message}")]
    CacheIo { context: String, message: String },

    // Engine
    #[error("script error in module '{module}': {message}")]
    Script { module: String, message: String },

    // Loader lifecycle
    #[error("loader is busy with another load")]
    LoaderBusy,

    #[error("load cancelled")]
    Cancelled,

    #[error("patch failed: {0}")]
    Patch(String),

    // Configuration / input
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl HotbundleError {
    /// Whether a fetcher chain should move on to its next member.
    ///
    /// Only transport-level failures and missing assets fall through;
    /// integrity and storage failures stop the chain.
    pub fn is_fallback_trigger(&self) -> bool {
        matches!(
            self,
            HotbundleError::Fetch { .. } | HotbundleError::ModuleNotFound { .. }
        )
    }

    /// Attach a module id to an integrity error raised below the module layer.
    pub fn with_module_id(self, module_id: &str) -> Self {
        match self {
            HotbundleError::Integrity {
                expected, actual, ..
            } => HotbundleError::Integrity {
                id: module_id.to_string(),
                expected,
                actual,
            },
            other => other,
        }
    }

    pub(crate) fn cache_io(context: impl Into<String>, err: impl fmt::Display) -> Self {
        HotbundleError::CacheIo {
            context: context.into(),
            message: err.to_string(),
        }
    }
}

/// Result type alias for Hotbundle operations
pub type Result<T> = std::result::Result<T, HotbundleError>;
