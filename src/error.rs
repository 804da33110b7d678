//! Error types returned by [`crate::Cache::compute_if_absent`].

use std::fmt;
use std::sync::Arc;

/// A loader's error, type-erased so [`crate::Cache`] need not carry a
/// loader-error type parameter — different `compute_if_absent` calls on the
/// same cache may use different loader error types.
#[derive(Debug, Clone)]
pub struct LoaderFailure(pub(crate) Arc<dyn std::error::Error + Send + Sync>);

impl fmt::Display for LoaderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Failure modes surfaced by the single-flight load protocol.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// The loader returned an error. Delivered verbatim to every concurrent
    /// caller of `compute_if_absent` for the same key.
    #[error("loader failed: {0}")]
    Loader(LoaderFailure),
    /// The loader completed with no value.
    #[error("loader produced no value for the requested key")]
    NullLoader,
    /// Reserved for parity with a cooperative-interrupt model; never raised
    /// by this implementation (see DESIGN.md).
    #[error("interrupted while waiting on the cache")]
    Interrupted,
}

impl PartialEq for CacheError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (CacheError::Loader(a), CacheError::Loader(b)) => a.0.to_string() == b.0.to_string(),
            (CacheError::NullLoader, CacheError::NullLoader) => true,
            (CacheError::Interrupted, CacheError::Interrupted) => true,
            _ => false,
        }
    }
}
