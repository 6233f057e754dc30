//! Event store error types.

use thiserror::Error;

/// Event store error type.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Executor or connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// The connection was closed
    #[error("Event store is closed")]
    Closed,

    /// The store could not be opened and runs without persistence
    #[error("Event store is disabled")]
    Disabled,

    /// Table name is not a plain SQL identifier
    #[error("Invalid table name: {0:?}")]
    InvalidTable(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using StoreError.
pub type StoreResult<T> = Result<T, StoreError>;
