//! Cache and fetch error types

use stapled_ocsp::OcspError;

/// Errors surfaced by entry construction, initialization, and refresh.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error(transparent)]
    Ocsp(#[from] OcspError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The request-timeout context expired before a usable response arrived
    #[error("request timed out")]
    Timeout,

    /// Entry has nowhere to fetch from
    #[error("no responders configured")]
    NoResponders,

    /// Issuer could not be resolved from the cache or AIA
    #[error("no issuer in cache for request")]
    UnknownIssuer,

    /// Remove of a name the cache does not hold
    #[error("entry '{0}' is not in the cache")]
    NotInCache(String),

    /// An initialized entry unexpectedly holds no response
    #[error("entry '{0}' has no response")]
    EmptyEntry(String),

    /// Certificate file with an unusable name
    #[error("cannot derive an entry name from '{0}'")]
    BadEntryName(String),
}
