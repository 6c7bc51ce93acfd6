//! Sonic protocol types and serialization.
//!
//! This crate defines the frames exchanged between a sonic client and the
//! query service. Every frame is a single JSON object carried in one
//! transport message:
//!
//! ```text
//! { "e": <event code>, "p": <payload, optional>, "v": <value, optional> }
//! ```
//!
//! # Modules
//!
//! - [`query`] - The query object submitted by callers
//! - [`auth`] - Authentication request sent with the `H` event
//! - [`message`] - The [`Frame`] tagged union and its wire encoding
//! - [`progress`] - Progress payload decoding
//! - [`metadata`] - Schema metadata decoding
//! - [`error`] - Protocol error types
//!
//! # Example
//!
//! ```
//! use sonic_proto::{Frame, Query};
//!
//! let query = Query::new("5").with_config(serde_json::json!({"class": "SyntheticSource"}));
//! let bytes = Frame::Query(query.clone()).encode().unwrap();
//! assert_eq!(Frame::decode(&bytes).unwrap(), Frame::Query(query));
//! ```

pub mod auth;
pub mod error;
pub mod message;
pub mod metadata;
pub mod progress;
pub mod query;

pub use error::Error;

// Re-export commonly used types at crate root
pub use auth::AuthRequest;
pub use message::{event, Completion, Frame, ACK_FRAME, CANCEL_FRAME};
pub use metadata::{metadata_from_schema, ColumnMeta, TypeTag};
pub use progress::{to_progress, ProgressInfo, ProgressPayload, ProgressStatus};
pub use query::Query;

/// Dynamically typed value used for row data, configs and schema samples.
pub use serde_json::Value;
