//! Client error types.

use std::time::Duration;

use thiserror::Error;

use crate::transport::CloseFrame;

/// Client errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Connection establishment failed.
    #[error("failed to connect to {address}: {reason}")]
    TransportOpen { address: String, reason: String },

    /// No connection became available in time.
    #[error("timed out after {0:?} waiting for a connection")]
    AcquireTimeout(Duration),

    /// The transport closed before the completion handshake finished.
    #[error("connection closed unexpectedly ({0})")]
    UnexpectedClose(CloseFrame),

    /// The transport reported an error.
    #[error("transport error: {0}")]
    Transport(String),

    /// The service completed the exchange with an error.
    #[error("query with trace_id `{}` failed: {message}", trace_label(.trace_id))]
    Protocol {
        trace_id: Option<String>,
        message: String,
    },

    /// The client is shutting down and accepts no new work.
    #[error("client is closing")]
    ClientClosing,

    /// The client has shut down.
    #[error("client is closed")]
    ClientClosed,

    /// The pool stopped serving acquisitions.
    #[error("connection pool is draining")]
    PoolDraining,

    /// Authentication succeeded but the service sent no token.
    #[error("authentication completed without a token")]
    MissingToken,

    /// Frame encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(#[from] sonic_proto::Error),

    /// A background task went away without reporting.
    #[error("internal error: {0}")]
    Internal(String),
}

fn trace_label(trace_id: &Option<String>) -> &str {
    trace_id.as_deref().unwrap_or("unknown")
}

/// Convenience alias for results in this crate.
pub type Result<T> = std::result::Result<T, Error>;
