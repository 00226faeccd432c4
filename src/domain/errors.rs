use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by market data vendors and the source router.
///
/// `RateLimited` and `Format` are recoverable at the router level (the next
/// adapter is tried); `Unavailable` and `Timeout` are what callers see once
/// every adapter has been exhausted.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    #[error("source unavailable: {0}")]
    Unavailable(String),

    #[error("vendor rate limit: {0}")]
    RateLimited(String),

    #[error("deadline exceeded after {0:?}")]
    Timeout(Duration),

    #[error("row failed canonicalization: {0}")]
    Format(String),

    #[error("transport failure: {0}")]
    Io(String),
}

impl SourceError {
    /// True when retrying the same source later could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SourceError::RateLimited(_) | SourceError::Io(_))
    }
}

/// Result alias for adapter capability calls: a canonical row set or a
/// typed failure. An empty `Vec` is a legitimate "no data" outcome, not
/// an error.
pub type SourceResult<T> = Result<Vec<T>, SourceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(SourceError::RateLimited("quota".into()).is_retryable());
        assert!(SourceError::Io("reset".into()).is_retryable());
        assert!(!SourceError::Unavailable("no token".into()).is_retryable());
        assert!(!SourceError::Timeout(Duration::from_secs(8)).is_retryable());
    }

    #[test]
    fn test_error_formatting() {
        let err = SourceError::RateLimited("max 500 calls/min".into());
        assert!(err.to_string().contains("rate limit"));
        assert!(err.to_string().contains("500"));
    }
}
