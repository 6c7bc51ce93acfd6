//! Frame definitions and their JSON wire encoding.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::{AuthPayload, AuthRequest};
use crate::error::{Error, Result};
use crate::progress::ProgressPayload;
use crate::query::{Query, QueryPayload};

/// Event codes carried in the `e` field.
pub mod event {
    /// Submit a query (client → service).
    pub const QUERY: &str = "Q";
    /// Authenticate (client → service).
    pub const AUTH: &str = "H";
    /// Cancel the current exchange (client → service).
    pub const CANCEL: &str = "C";
    /// Acknowledge completion (client → service).
    pub const ACK: &str = "A";
    /// Progress update (service → client).
    pub const PROGRESS: &str = "P";
    /// Exchange done (service → client).
    pub const DONE: &str = "D";
    /// Schema metadata (service → client).
    pub const METADATA: &str = "T";
    /// Exchange started (service → client).
    pub const STARTED: &str = "S";
    /// Output batch (service → client).
    pub const OUTPUT: &str = "O";
}

/// Pre-serialized acknowledge frame.
pub const ACK_FRAME: &[u8] = br#"{"e":"A"}"#;

/// Pre-serialized cancel frame.
pub const CANCEL_FRAME: &[u8] = br#"{"e":"C"}"#;

/// Outcome reported by a `D` frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    /// Server-side failure message. `None` means the exchange succeeded.
    pub error: Option<String>,
    /// Trace id of the failed exchange, when the service supplies one.
    pub trace_id: Option<String>,
}

impl Completion {
    /// A successful completion.
    pub fn ok() -> Self {
        Self::default()
    }

    /// A failed completion.
    pub fn failed(message: impl Into<String>, trace_id: Option<String>) -> Self {
        Self {
            error: Some(message.into()),
            trace_id,
        }
    }

    /// Check if the exchange succeeded.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// A protocol frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Query(Query),
    Auth(AuthRequest),
    Cancel,
    Ack,
    Progress(ProgressPayload),
    Done(Completion),
    /// Schema as `[name, sample value]` pairs.
    Metadata(Vec<(String, Value)>),
    /// Carries the service-assigned trace id.
    Started(Option<String>),
    Output(Value),
    /// An event code this client does not understand. Callers must ignore it.
    Unknown { event: String },
}

/// Wire shape shared by every frame.
#[derive(Debug, Default, Serialize, Deserialize)]
struct RawFrame {
    e: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    p: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    v: Option<Value>,
}

impl RawFrame {
    fn event(e: &str) -> Self {
        Self {
            e: e.to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DonePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    trace_id: Option<String>,
}

impl Frame {
    /// The event code of this frame.
    pub fn event(&self) -> &str {
        match self {
            Frame::Query(_) => event::QUERY,
            Frame::Auth(_) => event::AUTH,
            Frame::Cancel => event::CANCEL,
            Frame::Ack => event::ACK,
            Frame::Progress(_) => event::PROGRESS,
            Frame::Done(_) => event::DONE,
            Frame::Metadata(_) => event::METADATA,
            Frame::Started(_) => event::STARTED,
            Frame::Output(_) => event::OUTPUT,
            Frame::Unknown { event } => event.as_str(),
        }
    }

    /// Serialize the frame to its JSON wire form.
    pub fn encode(&self) -> Result<Vec<u8>> {
        match self {
            Frame::Cancel => return Ok(CANCEL_FRAME.to_vec()),
            Frame::Ack => return Ok(ACK_FRAME.to_vec()),
            _ => {}
        }

        let mut raw = RawFrame::event(self.event());
        match self {
            Frame::Query(query) => {
                raw.v = query.text.clone().map(Value::String);
                raw.p = Some(to_value(&QueryPayload {
                    auth: query.auth.clone(),
                    trace_id: query.trace_id.clone(),
                    config: query.config.clone(),
                })?);
            }
            Frame::Auth(auth) => {
                raw.v = Some(Value::String(auth.api_key.clone()));
                raw.p = Some(to_value(&AuthPayload {
                    user: auth.user.clone(),
                    trace_id: auth.trace_id.clone(),
                })?);
            }
            Frame::Progress(payload) => raw.p = Some(to_value(payload)?),
            Frame::Done(completion) => {
                raw.v = completion.error.clone().map(Value::String);
                raw.p = Some(to_value(&DonePayload {
                    trace_id: completion.trace_id.clone(),
                })?);
            }
            Frame::Metadata(schema) => raw.p = Some(to_value(schema)?),
            Frame::Started(trace_id) => raw.v = trace_id.clone().map(Value::String),
            Frame::Output(data) => raw.p = Some(data.clone()),
            Frame::Cancel | Frame::Ack | Frame::Unknown { .. } => {}
        }

        serde_json::to_vec(&raw).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Parse a frame from its JSON wire form.
    ///
    /// Unknown event codes decode to [`Frame::Unknown`] rather than failing.
    pub fn decode(bytes: &[u8]) -> Result<Frame> {
        let raw: RawFrame =
            serde_json::from_slice(bytes).map_err(|e| Error::Deserialization(e.to_string()))?;

        let frame = match raw.e.as_str() {
            event::QUERY => {
                let payload: QueryPayload = from_optional(raw.p, event::QUERY)?;
                Frame::Query(Query {
                    text: optional_string(raw.v, event::QUERY)?,
                    config: payload.config,
                    auth: payload.auth,
                    trace_id: payload.trace_id,
                })
            }
            event::AUTH => {
                let payload: AuthPayload = from_required(raw.p, event::AUTH)?;
                let api_key = optional_string(raw.v, event::AUTH)?.unwrap_or_default();
                Frame::Auth(AuthRequest {
                    user: payload.user,
                    api_key,
                    trace_id: payload.trace_id,
                })
            }
            event::CANCEL => Frame::Cancel,
            event::ACK => Frame::Ack,
            event::PROGRESS => Frame::Progress(from_required(raw.p, event::PROGRESS)?),
            // A `D` frame always decodes, so the exchange can terminate.
            event::DONE => Frame::Done(Completion {
                error: done_error(raw.v),
                trace_id: done_trace_id(raw.p),
            }),
            event::METADATA => Frame::Metadata(from_required(raw.p, event::METADATA)?),
            event::STARTED => Frame::Started(raw.v.and_then(value_to_string)),
            event::OUTPUT => Frame::Output(raw.p.unwrap_or(Value::Null)),
            _ => Frame::Unknown { event: raw.e },
        };

        Ok(frame)
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| Error::Serialization(e.to_string()))
}

fn from_required<T: serde::de::DeserializeOwned>(payload: Option<Value>, event: &str) -> Result<T> {
    let payload = payload
        .ok_or_else(|| Error::InvalidMessage(format!("`{}` frame is missing its payload", event)))?;
    serde_json::from_value(payload)
        .map_err(|e| Error::InvalidMessage(format!("bad `{}` payload: {}", event, e)))
}

fn from_optional<T: serde::de::DeserializeOwned + Default>(
    payload: Option<Value>,
    event: &str,
) -> Result<T> {
    match payload {
        None | Some(Value::Null) => Ok(T::default()),
        Some(payload) => serde_json::from_value(payload)
            .map_err(|e| Error::InvalidMessage(format!("bad `{}` payload: {}", event, e))),
    }
}

fn optional_string(value: Option<Value>, event: &str) -> Result<Option<String>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(other) => Err(Error::InvalidMessage(format!(
            "`{}` frame value must be a string, got {}",
            event, other
        ))),
    }
}

fn value_to_string(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

/// A falsy `v` on a `D` frame (missing, null, `""`, `false`, `0`) means success.
fn done_error(value: Option<Value>) -> Option<String> {
    match value? {
        Value::Bool(false) => None,
        Value::Number(n) if n.as_f64() == Some(0.0) => None,
        other => value_to_string(other).filter(|s| !s.is_empty()),
    }
}

fn done_trace_id(payload: Option<Value>) -> Option<String> {
    match payload? {
        Value::Object(mut fields) => fields.remove("trace_id").and_then(value_to_string),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(bytes: &[u8]) -> Value {
        serde_json::from_slice(bytes).unwrap()
    }

    #[test]
    fn test_encode_query() {
        let query = Query::new("5")
            .with_config(json!({"class": "SyntheticSource", "seed": 1000}))
            .with_trace_id("abc");
        let bytes = Frame::Query(query).encode().unwrap();

        assert_eq!(
            raw(&bytes),
            json!({
                "e": "Q",
                "v": "5",
                "p": {"trace_id": "abc", "config": {"class": "SyntheticSource", "seed": 1000}}
            })
        );
    }

    #[test]
    fn test_query_roundtrip_preserves_fields() {
        let query = Query::new("select 1")
            .with_config("secured_test")
            .with_auth("tok")
            .with_trace_id("t-1");
        let decoded = Frame::decode(&Frame::Query(query.clone()).encode().unwrap()).unwrap();
        assert_eq!(decoded, Frame::Query(query));

        let query = Query::new("select 1").with_config(Value::Null);
        let decoded = Frame::decode(&Frame::Query(query.clone()).encode().unwrap()).unwrap();
        assert_eq!(decoded, Frame::Query(query));
    }

    #[test]
    fn test_encode_auth() {
        let auth = AuthRequest::new("serrallonga", "1234").with_trace_id("t");
        let bytes = Frame::Auth(auth).encode().unwrap();
        assert_eq!(
            raw(&bytes),
            json!({"e": "H", "v": "1234", "p": {"user": "serrallonga", "trace_id": "t"}})
        );
    }

    #[test]
    fn test_constant_frames() {
        assert_eq!(Frame::Ack.encode().unwrap(), ACK_FRAME);
        assert_eq!(Frame::Cancel.encode().unwrap(), CANCEL_FRAME);
        assert_eq!(raw(ACK_FRAME), json!({"e": "A"}));
        assert_eq!(raw(CANCEL_FRAME), json!({"e": "C"}));
        assert_eq!(Frame::decode(ACK_FRAME).unwrap(), Frame::Ack);
        assert_eq!(Frame::decode(CANCEL_FRAME).unwrap(), Frame::Cancel);
    }

    #[test]
    fn test_decode_progress() {
        let frame = Frame::decode(br#"{"e":"P","p":{"s":2,"p":1,"t":10,"u":"rows"}}"#).unwrap();
        match frame {
            Frame::Progress(payload) => {
                assert_eq!(payload.s, Some(2));
                assert_eq!(payload.p, Some(1.0));
                assert_eq!(payload.t, Some(10.0));
                assert_eq!(payload.u.as_deref(), Some("rows"));
            }
            other => panic!("expected progress, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_done_success() {
        let cases: [&[u8]; 5] = [
            br#"{"e":"D"}"#,
            br#"{"e":"D","v":null}"#,
            br#"{"e":"D","v":"","p":{"trace_id":"x"}}"#,
            br#"{"e":"D","v":false}"#,
            br#"{"e":"D","v":0}"#,
        ];
        for bytes in cases {
            match Frame::decode(bytes).unwrap() {
                Frame::Done(completion) => assert!(completion.is_success()),
                other => panic!("expected done, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_decode_done_error() {
        let frame =
            Frame::decode(br#"{"e":"D","v":"source not found","p":{"trace_id":"t-7"}}"#).unwrap();
        assert_eq!(
            frame,
            Frame::Done(Completion::failed("source not found", Some("t-7".into())))
        );
    }

    #[test]
    fn test_decode_done_with_odd_payload() {
        let frame = Frame::decode(br#"{"e":"D","v":"boom","p":{"trace_id":42}}"#).unwrap();
        assert_eq!(
            frame,
            Frame::Done(Completion::failed("boom", Some("42".into())))
        );

        let cases: [&[u8]; 3] = [
            br#"{"e":"D","v":"boom","p":"not an object"}"#,
            br#"{"e":"D","v":"boom","p":[1,2]}"#,
            br#"{"e":"D","v":"boom","p":{"trace_id":null}}"#,
        ];
        for bytes in cases {
            assert_eq!(
                Frame::decode(bytes).unwrap(),
                Frame::Done(Completion::failed("boom", None))
            );
        }

        assert_eq!(
            Frame::decode(br#"{"e":"D","v":true}"#).unwrap(),
            Frame::Done(Completion::failed("true", None))
        );
    }

    #[test]
    fn test_decode_metadata() {
        let frame = Frame::decode(br#"{"e":"T","p":[["id",1],["name","a"]]}"#).unwrap();
        assert_eq!(
            frame,
            Frame::Metadata(vec![("id".into(), json!(1)), ("name".into(), json!("a"))])
        );
    }

    #[test]
    fn test_decode_started_and_output() {
        assert_eq!(
            Frame::decode(br#"{"e":"S","v":"trace-42"}"#).unwrap(),
            Frame::Started(Some("trace-42".into()))
        );
        assert_eq!(
            Frame::decode(br#"{"e":"O","p":[1,"x"]}"#).unwrap(),
            Frame::Output(json!([1, "x"]))
        );
    }

    #[test]
    fn test_decode_unknown_event() {
        let frame = Frame::decode(br#"{"e":"Z","p":{"anything":true}}"#).unwrap();
        assert_eq!(frame, Frame::Unknown { event: "Z".into() });
    }

    #[test]
    fn test_decode_invalid_json() {
        assert!(matches!(
            Frame::decode(b"not json"),
            Err(Error::Deserialization(_))
        ));
    }

    #[test]
    fn test_decode_bad_payload() {
        assert!(matches!(
            Frame::decode(br#"{"e":"T","p":"oops"}"#),
            Err(Error::InvalidMessage(_))
        ));
        assert!(matches!(
            Frame::decode(br#"{"e":"P"}"#),
            Err(Error::InvalidMessage(_))
        ));
    }
}
