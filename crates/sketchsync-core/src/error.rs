//! Error types for the synchronization engine.

use thiserror::Error;

/// Errors surfaced by the sync engine.
///
/// Most runtime failures never reach the caller: transport drops are retried,
/// stale updates are dropped and malformed payloads are defaulted. These variants
/// cover the cases where the host has to react.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("No transport: connect() has not been called")]
    NoTransport,
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;
