//! JSON-RPC 2.0 types for arena-rpc's wire format.
//!
//! Outbound requests are plain serde structs. Inbound frames are different:
//! they come from the network, so they are parsed into a
//! [`serde_json::Value`] first and validated field by field before any
//! typed access. The result is the [`Inbound`] tagged union: either a
//! [`Inbound::Response`] correlated to one of our requests, or an
//! [`Inbound::Notification`] pushed by the server.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ProtocolError;

/// The only protocol version this crate speaks.
pub const JSONRPC_VERSION: &str = "2.0";

/// Name of the parameter every request carries the session token in.
pub const SESSION_PARAM: &str = "session_id";

// ---------------------------------------------------------------------------
// RequestId
// ---------------------------------------------------------------------------

/// Correlation id linking a request to its response.
///
/// Serialized as a bare integer (`#[serde(transparent)]`).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Request (client → server)
// ---------------------------------------------------------------------------

/// An outbound JSON-RPC request.
///
/// ```rust
/// use arena_rpc_protocol::{Request, RequestId};
///
/// let req = Request::new(RequestId(1), "endTurn", None, Some("tok")).unwrap();
/// let json = serde_json::to_value(&req).unwrap();
/// assert_eq!(json["jsonrpc"], "2.0");
/// assert_eq!(json["params"]["session_id"], "tok");
/// assert_eq!(json["id"], 1);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub method: String,
    pub params: Value,
    pub id: RequestId,
}

impl Request {
    /// Builds a request, attaching `session_id` (or `null`) to `params`.
    ///
    /// `params` must be a JSON object or absent/`null` (treated as `{}`).
    ///
    /// # Errors
    /// Returns [`ProtocolError::InvalidParams`] for any other JSON type.
    pub fn new(
        id: RequestId,
        method: impl Into<String>,
        params: Option<Value>,
        session_id: Option<&str>,
    ) -> Result<Self, ProtocolError> {
        let mut map = match params {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map,
            Some(other) => {
                return Err(ProtocolError::InvalidParams(format!(
                    "params must be an object, got {}",
                    json_type_name(&other)
                )));
            }
        };
        map.insert(
            SESSION_PARAM.to_string(),
            session_id.map_or(Value::Null, |s| Value::String(s.to_string())),
        );

        Ok(Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params: Value::Object(map),
            id,
        })
    }
}

// ---------------------------------------------------------------------------
// Error object
// ---------------------------------------------------------------------------

/// The `error` member of a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl TryFrom<Value> for ErrorObject {
    type Error = ProtocolError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let mut map = match value {
            Value::Object(map) => map,
            _ => return Err(invalid("error must be an object")),
        };
        let code = map
            .get("code")
            .and_then(Value::as_i64)
            .ok_or_else(|| invalid("error.code must be an integer"))?;
        let message = match map.remove("message") {
            Some(Value::String(message)) => message,
            _ => return Err(invalid("error.message must be a string")),
        };
        Ok(Self {
            code,
            message,
            data: map.remove("data"),
        })
    }
}

impl fmt::Display for ErrorObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

// ---------------------------------------------------------------------------
// Inbound (server → client)
// ---------------------------------------------------------------------------

/// What a valid response or notification carries: exactly one of
/// `result` or `error`.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Result(Value),
    Error(ErrorObject),
}

impl Outcome {
    /// Converts into a `Result`, the shape callers usually want.
    pub fn into_result(self) -> Result<Value, ErrorObject> {
        match self {
            Self::Result(v) => Ok(v),
            Self::Error(e) => Err(e),
        }
    }
}

/// A validated inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A response to the request with this id.
    Response { id: RequestId, outcome: Outcome },
    /// A server push (`"id": null`); never matched against pending calls.
    Notification(Outcome),
}

impl Inbound {
    /// Returns the correlation id, if this is a response.
    pub fn id(&self) -> Option<RequestId> {
        match self {
            Self::Response { id, .. } => Some(*id),
            Self::Notification(_) => None,
        }
    }
}

/// Validation rules, checked in order:
///
/// 1. the frame is a JSON object
/// 2. `jsonrpc == "2.0"`
/// 3. the `id` key is present and is a non-negative integer or `null`
/// 4. exactly one of `result` / `error` is present
/// 5. an `error` has an integer `code` and a string `message`
impl TryFrom<Value> for Inbound {
    type Error = ProtocolError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let mut map = match value {
            Value::Object(map) => map,
            other => {
                return Err(invalid(format!(
                    "message must be an object, got {}",
                    json_type_name(&other)
                )));
            }
        };

        match map.get("jsonrpc") {
            Some(Value::String(v)) if v == JSONRPC_VERSION => {}
            Some(other) => {
                return Err(invalid(format!("unsupported jsonrpc version {other}")));
            }
            None => return Err(invalid("missing jsonrpc member")),
        }

        let id = match map.get("id") {
            None => return Err(invalid("missing id member")),
            Some(Value::Null) => None,
            Some(v) => Some(RequestId(v.as_u64().ok_or_else(|| {
                invalid(format!("id must be a non-negative integer or null, got {v}"))
            })?)),
        };

        let outcome = match (map.remove("result"), map.remove("error")) {
            (Some(result), None) => Outcome::Result(result),
            (None, Some(error)) => Outcome::Error(ErrorObject::try_from(error)?),
            (Some(_), Some(_)) => {
                return Err(invalid("both result and error present"));
            }
            (None, None) => {
                return Err(invalid("neither result nor error present"));
            }
        };

        Ok(match id {
            Some(id) => Self::Response { id, outcome },
            None => Self::Notification(outcome),
        })
    }
}

fn invalid(msg: impl Into<String>) -> ProtocolError {
    ProtocolError::Validation(msg.into())
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
