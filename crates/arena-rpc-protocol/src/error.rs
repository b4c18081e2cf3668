//! Error types for the protocol layer.
//!
//! Each crate in arena-rpc defines its own error enum. When you see a
//! `ProtocolError`, the problem is in how a message was serialized or in
//! what the peer put on the wire, not in the socket or the session.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust type into bytes).
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed: the bytes were not well-formed JSON, or did
    /// not match the expected Rust type.
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The frame parsed as JSON but violates the JSON-RPC 2.0 response
    /// schema (wrong version, both or neither of `result`/`error`, missing
    /// `id`, malformed error object).
    #[error("invalid message: {0}")]
    Validation(String),

    /// Request parameters were not a JSON object, so `session_id` cannot
    /// be attached to them.
    #[error("invalid params: {0}")]
    InvalidParams(String),
}

impl ProtocolError {
    /// Returns `true` for errors caused by inbound wire data (as opposed to
    /// local encoding or caller mistakes).
    pub fn is_inbound(&self) -> bool {
        matches!(self, Self::Decode(_) | Self::Validation(_))
    }
}
