//! Error types for the caching layer
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the caching layer.
///
/// Cloneable so a single failed execution can be handed to every caller
/// waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Request parameters can not be fetched (empty fiat currency, ...)
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// Remote call failed (network, timeout, non-success status)
    #[error("Fetch failed: {0}")]
    FetchFailed(String),

    /// Remote call succeeded but the payload could not be decoded
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// A shared producer stream ended or panicked
    #[error("Producer terminated: {0}")]
    ProducerTerminated(String),

    /// A refresh action panicked
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CacheError {
    /// Returns true for failures worth retrying on the next refresh
    /// (network errors, timeouts, 5xx, rate limits).
    pub fn is_transient(&self) -> bool {
        matches!(self, CacheError::FetchFailed(_))
    }
}

// == Conversions ==
impl From<reqwest::Error> for CacheError {
    fn from(err: reqwest::Error) -> Self {
        CacheError::FetchFailed(err.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::MalformedResponse(err.to_string())
    }
}

// == Result Type Alias ==
/// Convenience Result type for the caching layer.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(CacheError::FetchFailed("timeout".to_string()).is_transient());
        assert!(!CacheError::Internal("panicked".to_string()).is_transient());
        assert!(!CacheError::MalformedResponse("eof".to_string()).is_transient());
        assert!(!CacheError::InvalidArguments("empty".to_string()).is_transient());
    }

    #[test]
    fn test_json_error_conversion() {
        let err = serde_json::from_str::<u32>("not a number").unwrap_err();
        let cache_err: CacheError = err.into();
        assert!(matches!(cache_err, CacheError::MalformedResponse(_)));
    }

    #[test]
    fn test_error_display() {
        let err = CacheError::FetchFailed("503".to_string());
        assert_eq!(err.to_string(), "Fetch failed: 503");
    }
}
