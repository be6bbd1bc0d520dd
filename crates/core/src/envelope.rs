//! The wire envelope.
//!
//! Every frame is JSON text of the shape `{type, name, id, data}`:
//!
//! | `type`     | `name`                 | `id`                    | `data`                  |
//! |------------|------------------------|-------------------------|-------------------------|
//! | `invoke`   | method name            | caller-assigned id      | argument array or null  |
//! | `response` | `success` / `error`    | id of the `invoke`      | result or error reason  |
//! | `event`    | event name             | always [`EVENT_ID`]     | arbitrary payload       |
//!
//! Decoding is lenient about `data` and strict about the other three fields;
//! anything that does not fit is reported as a [`DecodeError`] which the
//! router treats as "drop silently".

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Sentinel id carried by every `event` envelope.
pub const EVENT_ID: u64 = 0;

/// Response name for a successful invocation.
pub const SUCCESS: &str = "success";

/// Response name for a failed invocation.
pub const ERROR: &str = "error";

/// Reason sent back when no method is registered under the requested name.
pub const UNKNOWN_METHOD: &str = "UNKNOWN_METHOD";

/// Reason pending invocations are rejected with on unhook.
pub const TRANSPORT_CLOSED: &str = "TRANSPORT_CLOSED";

/// Envelope discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Invoke,
    Response,
    Event,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Invoke => "invoke",
            Kind::Response => "response",
            Kind::Event => "event",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Correlation id: a JSON number or string.
///
/// Ids received from a remote `invoke` are echoed back verbatim, so the
/// number keeps its original JSON representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CorrelationId {
    Number(serde_json::Number),
    Text(String),
}

impl CorrelationId {
    /// The id as an unsigned integer, if it is one. Integral floats such as
    /// `1.0` count: numbers compare by value, not by encoding.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            CorrelationId::Number(n) => n.as_u64().or_else(|| {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && *f >= 0.0 && *f < u64::MAX as f64)
                    .map(|f| f as u64)
            }),
            CorrelationId::Text(_) => None,
        }
    }

    /// True for the numeric sentinel `0` used by events.
    pub fn is_event_sentinel(&self) -> bool {
        match self {
            CorrelationId::Number(n) => n.as_f64() == Some(EVENT_ID as f64),
            CorrelationId::Text(_) => false,
        }
    }
}

impl From<u64> for CorrelationId {
    fn from(id: u64) -> Self {
        CorrelationId::Number(id.into())
    }
}

impl From<&str> for CorrelationId {
    fn from(id: &str) -> Self {
        CorrelationId::Text(id.to_string())
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorrelationId::Number(n) => write!(f, "{}", n),
            CorrelationId::Text(s) => write!(f, "{:?}", s),
        }
    }
}

/// Why an inbound frame was not accepted.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is empty")]
    Empty,
    #[error("payload is not a JSON envelope: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("envelope type is missing or empty")]
    MissingType,
    #[error("unrecognized envelope type {0:?}")]
    UnknownType(String),
    #[error("envelope name is missing or empty")]
    MissingName,
    #[error("envelope id is missing")]
    MissingId,
}

impl DecodeError {
    /// Short label used for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            DecodeError::Empty => "empty",
            DecodeError::Json(_) => "malformed",
            DecodeError::NotAnObject => "not_an_object",
            DecodeError::MissingType => "missing_type",
            DecodeError::UnknownType(_) => "unknown_type",
            DecodeError::MissingName => "missing_name",
            DecodeError::MissingId => "missing_id",
        }
    }
}

/// One protocol message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: Kind,
    pub name: String,
    pub id: CorrelationId,
    pub data: Value,
}

/// Shape accepted off the wire before validation.
#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    id: Option<CorrelationId>,
    #[serde(default)]
    data: Value,
}

impl Envelope {
    pub fn invoke(name: impl Into<String>, id: u64, args: Vec<Value>) -> Self {
        Self {
            kind: Kind::Invoke,
            name: name.into(),
            id: id.into(),
            data: Value::Array(args),
        }
    }

    pub fn success(id: CorrelationId, result: Value) -> Self {
        Self {
            kind: Kind::Response,
            name: SUCCESS.to_string(),
            id,
            data: result,
        }
    }

    pub fn error(id: CorrelationId, reason: impl Into<Value>) -> Self {
        Self {
            kind: Kind::Response,
            name: ERROR.to_string(),
            id,
            data: reason.into(),
        }
    }

    pub fn event(name: impl Into<String>, data: Value) -> Self {
        Self {
            kind: Kind::Event,
            name: name.into(),
            id: EVENT_ID.into(),
            data,
        }
    }

    /// Serialize to the JSON text sent over a transport.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse and validate an inbound frame.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        if text.is_empty() {
            return Err(DecodeError::Empty);
        }
        let value: Value = serde_json::from_str(text)?;
        if !value.is_object() {
            return Err(DecodeError::NotAnObject);
        }
        let raw = RawEnvelope::deserialize(value)?;

        let kind = match raw.kind.as_deref() {
            None | Some("") => return Err(DecodeError::MissingType),
            Some("invoke") => Kind::Invoke,
            Some("response") => Kind::Response,
            Some("event") => Kind::Event,
            Some(other) => return Err(DecodeError::UnknownType(other.to_string())),
        };
        let name = match raw.name {
            Some(name) if !name.is_empty() => name,
            _ => return Err(DecodeError::MissingName),
        };
        let id = raw.id.ok_or(DecodeError::MissingId)?;

        Ok(Self {
            kind,
            name,
            id,
            data: raw.data,
        })
    }

    /// Argument list of an `invoke`: `null`/absent means no arguments,
    /// anything else that is not an array is rejected.
    pub fn arguments(&self) -> Option<Vec<Value>> {
        match &self.data {
            Value::Null => Some(Vec::new()),
            Value::Array(args) => Some(args.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_invoke_field_layout() {
        let text = Envelope::invoke("add", 3, vec![json!(1), json!(2)])
            .encode()
            .unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            json!({"type": "invoke", "name": "add", "id": 3, "data": [1, 2]})
        );
    }

    #[test]
    fn test_event_uses_sentinel_id() {
        let envelope = Envelope::event("tick", json!({"n": 1}));
        assert!(envelope.id.is_event_sentinel());
        assert_eq!(envelope.id.as_u64(), Some(EVENT_ID));
    }

    #[test]
    fn test_decode_rejects_empty_and_garbage() {
        assert!(matches!(Envelope::decode(""), Err(DecodeError::Empty)));
        assert!(matches!(Envelope::decode("not json"), Err(DecodeError::Json(_))));
        assert!(matches!(
            Envelope::decode(r#"["invoke","m",1]"#),
            Err(DecodeError::NotAnObject)
        ));
    }

    #[test]
    fn test_decode_requires_type_name_and_id() {
        let missing_type = r#"{"name":"m","id":1}"#;
        let empty_name = r#"{"type":"invoke","name":"","id":1}"#;
        let null_id = r#"{"type":"invoke","name":"m","id":null}"#;
        let bad_name = r#"{"type":"invoke","name":5,"id":1}"#;

        assert!(matches!(Envelope::decode(missing_type), Err(DecodeError::MissingType)));
        assert!(matches!(Envelope::decode(empty_name), Err(DecodeError::MissingName)));
        assert!(matches!(Envelope::decode(null_id), Err(DecodeError::MissingId)));
        assert!(matches!(Envelope::decode(bad_name), Err(DecodeError::Json(_))));
    }

    #[test]
    fn test_decode_unknown_type_is_an_error() {
        let text = r#"{"type":"subscribe","name":"m","id":1}"#;
        match Envelope::decode(text) {
            Err(DecodeError::UnknownType(kind)) => assert_eq!(kind, "subscribe"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_string_ids_are_kept_verbatim() {
        let envelope = Envelope::decode(r#"{"type":"invoke","name":"m","id":"abc"}"#).unwrap();
        assert_eq!(envelope.id, CorrelationId::from("abc"));
        assert_eq!(envelope.id.as_u64(), None);

        let reply = Envelope::success(envelope.id.clone(), json!(true)).encode().unwrap();
        assert!(reply.contains(r#""id":"abc""#));
    }

    #[test]
    fn test_arguments_null_and_absent_are_empty() {
        let absent = Envelope::decode(r#"{"type":"invoke","name":"m","id":1}"#).unwrap();
        let null = Envelope::decode(r#"{"type":"invoke","name":"m","id":1,"data":null}"#).unwrap();
        let object = Envelope::decode(r#"{"type":"invoke","name":"m","id":1,"data":{}}"#).unwrap();

        assert_eq!(absent.arguments(), Some(vec![]));
        assert_eq!(null.arguments(), Some(vec![]));
        assert_eq!(object.arguments(), None);
    }

    #[test]
    fn test_sentinel_only_matches_numeric_zero() {
        assert!(CorrelationId::from(0).is_event_sentinel());
        assert!(!CorrelationId::from(1).is_event_sentinel());
        assert!(!CorrelationId::from("0").is_event_sentinel());
    }

    #[test]
    fn test_integral_float_ids_read_as_integers() {
        let whole = Envelope::decode(r#"{"type":"response","name":"success","id":1.0}"#).unwrap();
        let fractional =
            Envelope::decode(r#"{"type":"response","name":"success","id":1.5}"#).unwrap();
        let negative =
            Envelope::decode(r#"{"type":"response","name":"success","id":-1.0}"#).unwrap();

        assert_eq!(whole.id.as_u64(), Some(1));
        assert_eq!(fractional.id.as_u64(), None);
        assert_eq!(negative.id.as_u64(), None);
    }
}
