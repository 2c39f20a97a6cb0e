use std::time::Duration;

use thiserror::Error;

/// An error that happens while populating a cache entry.
///
/// This error enum is intended for fan-out: when concurrent callers are
/// coalesced onto the same in-flight population, each of them receives its own
/// copy of the failure. It is therefore cheap to clone and carries owned
/// message strings rather than error sources.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The requested artifact does not exist at its source.
    #[error("not found")]
    NotFound,
    /// The population did not finish in time.
    #[error("population timed out after {0:?}")]
    Timeout(Duration),
    /// The population failed for another reason, like a failed download or a
    /// rejected computation.
    ///
    /// The attached string is delivered verbatim to every waiter.
    #[error("population failed: {0}")]
    PopulationFailed(String),
    /// An unexpected error in the cache machinery itself.
    ///
    /// This variant is not intended to be produced by population closures.
    #[error("internal error")]
    InternalError,
}

impl From<std::io::Error> for CacheError {
    #[track_caller]
    fn from(err: std::io::Error) -> Self {
        Self::from_std_error(err)
    }
}

impl CacheError {
    #[track_caller]
    pub fn from_std_error<E: std::error::Error + 'static>(e: E) -> Self {
        let dynerr: &dyn std::error::Error = &e; // tracing expects a `&dyn Error`
        tracing::error!(error = dynerr);
        Self::InternalError
    }
}

/// The contents of a cache lookup or population, either `Ok(T)` or an error
/// denoting the reason why the value could not be produced.
pub type CacheContents<T = ()> = Result<T, CacheError>;
