//! Error types for the outage buffer.

use thiserror::Error;

/// Main error type for buffer operations.
#[derive(Debug, Error)]
pub enum BufferError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Delivery failed: {0}")]
    Delivery(String),
}

impl BufferError {
    /// Build a delivery error from any displayable cause.
    ///
    /// Replay callbacks report failures with this; the engine catches and
    /// logs them rather than propagating (replay of other subscriptions
    /// continues).
    pub fn delivery(cause: impl std::fmt::Display) -> Self {
        BufferError::Delivery(cause.to_string())
    }
}

/// Result type for buffer operations.
pub type Result<T> = std::result::Result<T, BufferError>;
