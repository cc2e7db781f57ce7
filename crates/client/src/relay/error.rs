//! Notification relay client error types.

use std::sync::Arc;

/// Errors from the notification relay client.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Relay base URL is empty or unparsable.
    #[error("invalid relay URL: {0}")]
    InvalidUrl(String),

    /// HTTP error response.
    #[error("HTTP error: {status}")]
    HttpError { status: u16 },

    /// Request timeout.
    #[error("request timeout")]
    Timeout,

    /// Network error.
    #[error("network error: {0}")]
    Network(Arc<reqwest::Error>),

    /// Response parse error.
    #[error("parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() { RelayError::Timeout } else { RelayError::Network(Arc::new(err)) }
    }
}

impl From<RelayError> for stash_core::Error {
    fn from(err: RelayError) -> Self {
        stash_core::Error::DeliveryFailure(err.to_string())
    }
}
