//! Protocol error types.

use thiserror::Error;

/// Protocol-level errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization failed.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Frame was well-formed JSON but its payload did not match the event code.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

/// Convenience alias for results in this crate.
pub type Result<T> = std::result::Result<T, Error>;
