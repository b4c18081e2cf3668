//! Wire protocol for arena-rpc.
//!
//! This crate defines the JSON-RPC 2.0 "language" spoken between the game
//! client and the game server:
//!
//! - **Types** ([`Request`], [`Inbound`], [`Outcome`], [`ErrorObject`]):
//!   the structures that travel on the wire.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how those structures are
//!   converted to and from bytes, including validation of inbound frames.
//! - **Errors** ([`ProtocolError`]): what can go wrong doing so.
//!
//! # Architecture
//!
//! ```text
//! Transport (text frames) → Protocol (Inbound) → Correlator / event bus
//! ```
//!
//! The protocol layer knows nothing about sockets or sessions; it only
//! knows how to build requests and how to validate what comes back.

mod codec;
mod error;
mod types;

pub use codec::{Codec, JsonCodec};
pub use error::ProtocolError;
pub use types::{
    ErrorObject, Inbound, JSONRPC_VERSION, Outcome, Request, RequestId, SESSION_PARAM,
};
