//! Error types for the collaborator and cache boundaries.
//!
//! Errors are classified by how callers degrade:
//! - Transport failures: caught at the boundary that issued the call,
//!   surfaced as a typed error, never rethrown to the UI
//! - Not-found conditions: normal states (a dataset never trained), not errors
//! - Storage failures: advisory; every variant degrades to "not cached"

use thiserror::Error;

/// Errors from the HTTP collaborators (employee listing, reasoning lookup,
/// training status).
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Resource not found")]
    NotFound,

    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl ApiError {
    /// A 404 from the training-status endpoint means "job never run",
    /// which downstream maps to the `idle` phase rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound)
    }

    /// Returns true for failures worth retrying on the next poll or load.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Http(e) => e.is_timeout() || e.is_connect(),
            ApiError::Status { status, .. } => *status == 429 || *status >= 500,
            ApiError::NotFound | ApiError::Decode(_) => false,
        }
    }
}

/// Errors from the bounded persistent cache.
///
/// Persistence is best effort: callers log these and move on. Nothing in the
/// load path requires a cache write to land for correctness.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Payload too large: {bytes} bytes (cap {cap})")]
    PayloadTooLarge { bytes: usize, cap: usize },

    #[error("Payload has too many elements: {count} (cap {cap})")]
    TooManyElements { count: usize, cap: usize },

    #[error("Store quota exhausted after eviction retry")]
    QuotaExhausted,

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        assert!(ApiError::NotFound.is_not_found());
        assert!(!ApiError::Decode("bad json".to_string()).is_not_found());
    }

    #[test]
    fn test_transient_status_codes() {
        let rate_limited = ApiError::Status {
            status: 429,
            message: "slow down".to_string(),
        };
        let server_error = ApiError::Status {
            status: 503,
            message: "unavailable".to_string(),
        };
        let bad_request = ApiError::Status {
            status: 400,
            message: "bad".to_string(),
        };

        assert!(rate_limited.is_transient());
        assert!(server_error.is_transient());
        assert!(!bad_request.is_transient());
        assert!(!ApiError::NotFound.is_transient());
    }
}
