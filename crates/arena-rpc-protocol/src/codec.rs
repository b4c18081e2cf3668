//! Codec trait and the JSON implementation.
//!
//! The connection task does not care *how* requests become bytes; it only
//! needs something implementing [`Codec`]. JSON-RPC is defined over JSON,
//! so [`JsonCodec`] is the one shipped implementation, but tests and
//! embedders can supply their own.

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{Inbound, ProtocolError};

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// `Send + Sync + 'static` because the codec lives inside the long-running
/// connection task.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Encode`] if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Decode`] if the bytes are malformed or don't
    /// match `T`.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;

    /// Decodes and validates one inbound frame.
    ///
    /// The frame is first decoded into an untyped [`Value`] so that schema
    /// violations are reported as [`ProtocolError::Validation`] with a
    /// precise reason, rather than as an opaque serde mismatch.
    fn decode_inbound(&self, data: &[u8]) -> Result<Inbound, ProtocolError> {
        let value: Value = self.decode(data)?;
        Inbound::try_from(value)
    }
}

/// A [`Codec`] backed by `serde_json`.
///
/// ```rust
/// use arena_rpc_protocol::{Codec, Inbound, JsonCodec, RequestId};
///
/// let codec = JsonCodec;
/// let inbound = codec
///     .decode_inbound(br#"{"jsonrpc":"2.0","result":42,"id":5}"#)
///     .unwrap();
/// assert_eq!(inbound.id(), Some(RequestId(5)));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
