//! Crate-wide error type.
//!
//! Invalid ranges, segment overlap, coverage gaps, provider failures, and
//! so on are each a variant here rather than a generic string exception,
//! so callers can match on structured payloads (`MissingRanges { ranges
//! }`, `PartialData { missing }`) instead of parsing messages.

use thiserror::Error;

use crate::types::Instant;

/// Coarse classification used by the retry policy to decide whether an
/// error is worth retrying. Distinct from the `Error` enum itself so that
/// `RetryConfig::retry_on` can be a small, copyable set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    RateLimit,
    ProviderError,
    Cancelled,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid range: t0 {t0} >= t1 {t1}")]
    InvalidRange { t0: Instant, t1: Instant },

    #[error("segment for {symbol}/{data_type:?} overlaps an existing segment")]
    OverlappingSegment {
        symbol: String,
        data_type: crate::types::DataType,
    },

    #[error("{} range(s) missing from cache", ranges.len())]
    MissingRanges { ranges: Vec<(Instant, Instant)> },

    #[error("segment {0} is present in the index but absent from both cache tiers")]
    SegmentDataMissing(String),

    #[error("provider rate limited the request")]
    RateLimit,

    #[error("provider error: {0}")]
    ProviderError(String),

    #[error("{} range(s) could not be filled by the provider", missing.len())]
    PartialData { missing: Vec<(Instant, Instant)> },

    #[error("operation cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl Error {
    /// Retry classification for this error, if any. Logic errors
    /// (`InvalidRange`, `OverlappingSegment`, ...) are never retryable:
    /// retrying them cannot change the outcome.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Error::RateLimit => Some(ErrorKind::RateLimit),
            Error::ProviderError(_) => Some(ErrorKind::ProviderError),
            Error::Cancelled => Some(ErrorKind::Cancelled),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
