//! Authentication request types.

use serde::{Deserialize, Serialize};

/// Authentication request carried by an `H` frame.
///
/// On success the service answers with a single output batch whose first
/// element is the issued token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRequest {
    /// User name the key was issued to.
    pub user: String,
    /// API key, sent as the frame value.
    pub api_key: String,
    /// Caller-chosen trace id.
    pub trace_id: Option<String>,
}

impl AuthRequest {
    /// Create a new authentication request.
    pub fn new(user: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            api_key: api_key.into(),
            trace_id: None,
        }
    }

    /// Set the trace id.
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }
}

/// The `p` object of an `H` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct AuthPayload {
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}
