//! Model backend error types.

use thiserror::Error;

/// Errors from the model backend.
#[derive(Debug, Error)]
pub enum ModelError {
    /// HTTP transport failure.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Non-success API response.
    #[error("api error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The backend asked us to slow down.
    #[error("rate limited")]
    RateLimit {
        /// Seconds to wait before retrying, when the backend said so.
        retry_after: Option<u64>,
    },

    /// No event arrived within the configured window.
    #[error("model response timed out after {0} seconds")]
    Timeout(u64),

    /// The stream carried data we could not interpret.
    #[error("failed to decode model response: {0}")]
    Decode(String),
}

impl ModelError {
    /// Whether a fresh attempt is reasonable (transient, idempotent classes).
    pub fn is_transient(&self) -> bool {
        matches!(self, ModelError::RateLimit { .. } | ModelError::Timeout(_))
    }
}
