//! Transport layer errors

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Read timed out")]
    Timeout,

    #[error("Link lost: {0}")]
    LinkLost(String),

    #[error("Transport closed")]
    Closed,

    #[error("Transport not supported: {0}")]
    Unsupported(String),
}
