//! Outbox error types.

use thiserror::Error;

/// Outbox error type.
#[derive(Error, Debug)]
pub enum OutboxError {
    /// Event store error
    #[error("Store error: {0}")]
    Store(#[from] tracker_event_store::StoreError),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(#[from] tracker_config_and_utils::CoreError),

    /// HTTP transport error (DNS, TLS, connection)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Endpoint answered with a non-2xx status
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// No Tokio runtime to run background work on
    #[error("No Tokio runtime available: {0}")]
    NoRuntime(String),
}

/// Result type alias using OutboxError.
pub type OutboxResult<T> = Result<T, OutboxError>;
