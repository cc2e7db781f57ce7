//! Unified error types for stash.
//!
//! Display strings carry a stable code prefix so callers and logs can match on
//! the failure class without parsing the message.

use rmcp::model::{ErrorCode, ErrorData as McpError};
use tokio_rusqlite::rusqlite;

/// Unified error types for the cache coordinator.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input parameters (e.g., an unknown control message).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// URL could not be parsed or resolved against the origin.
    #[error("INVALID_URL: {0}")]
    InvalidUrl(String),

    /// The network fetch could not complete.
    #[error("NETWORK_FAILURE: {0}")]
    NetworkFailure(String),

    /// No stored entry for the request key.
    #[error("CACHE_MISS: {0}")]
    CacheMiss(String),

    /// Response was not status 200 or not same-origin, so it is never stored.
    #[error("INELIGIBLE_RESPONSE: {0}")]
    IneligibleResponse(String),

    /// A required resource could not be pre-cached during install.
    #[error("INSTALL_FAILURE: {0}")]
    InstallFailure(String),

    /// The notification relay could not be reached or is not configured.
    #[error("DELIVERY_FAILURE: {0}")]
    DeliveryFailure(String),

    /// Lifecycle event not accepted in the current state.
    #[error("INVALID_TRANSITION: {event} while {state}")]
    InvalidTransition { state: String, event: String },

    /// Database operation failed.
    #[error("CACHE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("CACHE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// Stored row could not be decoded.
    #[error("CACHE_ERROR: corrupt entry: {0}")]
    CorruptEntry(String),
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::CorruptEntry(err.to_string())
    }
}

impl From<Error> for McpError {
    fn from(err: Error) -> Self {
        let code = match &err {
            Error::InvalidInput(_) | Error::InvalidUrl(_) => -32602,
            Error::NetworkFailure(_) => -32000,
            Error::CacheMiss(_) => -32001,
            Error::Database(_) | Error::MigrationFailed(_) | Error::CorruptEntry(_) => -32002,
            Error::IneligibleResponse(_) => -32003,
            Error::InstallFailure(_) => -32004,
            Error::DeliveryFailure(_) => -32005,
            Error::InvalidTransition { .. } => -32006,
        };

        McpError { code: ErrorCode(code), message: err.to_string().into(), data: None }
    }
}
