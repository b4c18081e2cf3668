//! Unified error type for the arena-rpc client.

use std::time::Duration;

use arena_rpc_protocol::{ErrorObject, ProtocolError, RequestId};
use arena_rpc_session::{OriginRejected, SessionError};
use arena_rpc_transport::TransportError;
use serde_json::Value;

/// Top-level error that wraps all crate-specific errors and adds the
/// client's own failure modes.
///
/// The `#[from]` variants let `?` convert sub-crate errors directly.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// A transport-level error (connect, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, malformed frame, bad params).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The session token is missing, malformed, or expired.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The current host is not allowed to connect.
    #[error(transparent)]
    Origin(#[from] OriginRejected),

    /// No response arrived within the call's timeout.
    #[error("request {id} ({method}) timed out after {after:?}")]
    Timeout {
        id: RequestId,
        method: String,
        after: Duration,
    },

    /// A response arrived for an id with nothing pending.
    #[error("no pending request for response {id}")]
    NoMatchingRequest { id: RequestId },

    /// The pending entry found under a response's id carries a different
    /// id. The entry is left pending.
    #[error("response {received} does not match pending request {expected}")]
    IdMismatch {
        expected: RequestId,
        received: RequestId,
    },

    /// The connection went away while the call was pending.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// The client is not connected.
    #[error("not connected")]
    NotConnected,

    /// Reconnection gave up after the configured number of retries.
    #[error("gave up reconnecting after {attempts} attempts")]
    MaxReconnectAttemptsExceeded { attempts: u32 },

    /// The client was destroyed and can no longer be used.
    #[error("client has been destroyed")]
    Destroyed,

    /// The server answered with a JSON-RPC error object.
    #[error("server error {code}: {message}")]
    Server {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    /// An id was registered twice.
    #[error("request id {0} is already pending")]
    DuplicateRequestId(RequestId),
}

impl From<ErrorObject> for RpcError {
    fn from(err: ErrorObject) -> Self {
        Self::Server {
            code: err.code,
            message: err.message,
            data: err.data,
        }
    }
}

/// A flat classification of [`RpcError`], for matching in event handlers
/// without digging through nested errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    OriginRejected,
    Connection,
    MaxReconnectAttemptsExceeded,
    Timeout,
    NoMatchingRequest,
    IdMismatch,
    Validation,
    Encode,
    InvalidParams,
    NoSession,
    InvalidSessionFormat,
    SessionExpired,
    NotConnected,
    DestroyedClientUse,
    Server,
    DuplicateRequestId,
}

impl RpcError {
    /// Returns the flat kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_) | Self::ConnectionClosed(_) => ErrorKind::Connection,
            Self::Protocol(ProtocolError::Encode(_)) => ErrorKind::Encode,
            Self::Protocol(ProtocolError::InvalidParams(_)) => ErrorKind::InvalidParams,
            Self::Protocol(ProtocolError::Decode(_) | ProtocolError::Validation(_)) => {
                ErrorKind::Validation
            }
            Self::Session(SessionError::NoSession) => ErrorKind::NoSession,
            Self::Session(SessionError::InvalidFormat) => ErrorKind::InvalidSessionFormat,
            Self::Session(SessionError::Expired) => ErrorKind::SessionExpired,
            Self::Origin(_) => ErrorKind::OriginRejected,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::NoMatchingRequest { .. } => ErrorKind::NoMatchingRequest,
            Self::IdMismatch { .. } => ErrorKind::IdMismatch,
            Self::NotConnected => ErrorKind::NotConnected,
            Self::MaxReconnectAttemptsExceeded { .. } => ErrorKind::MaxReconnectAttemptsExceeded,
            Self::Destroyed => ErrorKind::DestroyedClientUse,
            Self::Server { .. } => ErrorKind::Server,
            Self::DuplicateRequestId(_) => ErrorKind::DuplicateRequestId,
        }
    }

    /// `true` for anomalies that may indicate tampering and should be
    /// monitored separately from ordinary network errors.
    pub fn is_security_relevant(&self) -> bool {
        matches!(self.kind(), ErrorKind::IdMismatch | ErrorKind::OriginRejected)
    }
}
