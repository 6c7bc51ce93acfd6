//! Query objects submitted to the service.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A query to run on the service.
///
/// `text` is interpreted by the source named in `config`; the client never
/// inspects either. Callers may also deserialize a query from the JSON shape
/// used by other sonic clients, where the text lives under `query` and the
/// token may be spelled `token` and the trace id `traceId`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    /// Query text, sent as the frame value.
    #[serde(rename = "query", alias = "text", default)]
    pub text: Option<String>,

    /// Source configuration: usually an object naming the source `class`,
    /// or a string naming a server-side preconfigured source.
    #[serde(default)]
    pub config: Option<Value>,

    /// Auth token previously issued by `authenticate`.
    #[serde(alias = "token", default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,

    /// Caller-chosen trace id.
    #[serde(alias = "traceId", default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

impl Query {
    /// Create a query with the given text and no configuration.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    /// Set the source configuration. `null` is the same as no configuration.
    pub fn with_config(mut self, config: impl Into<Value>) -> Self {
        self.config = match config.into() {
            Value::Null => None,
            config => Some(config),
        };
        self
    }

    /// Set the auth token.
    pub fn with_auth(mut self, token: impl Into<String>) -> Self {
        self.auth = Some(token.into());
        self
    }

    /// Set the trace id.
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }
}

/// The `p` object of a `Q` frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct QueryPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub config: Option<Value>,
}
