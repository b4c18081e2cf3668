//! # arena-rpc
//!
//! JSON-RPC 2.0 client for the arena game server, over one persistent
//! WebSocket.
//!
//! The client handles connection lifecycle with automatic reconnection,
//! request/response correlation, the session token returned by `joinGame`,
//! origin validation, and rejection of forged or malformed responses.
//! Anomalies that do not belong to a single call are published on an
//! event bus.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use arena_rpc::prelude::*;
//!
//! # async fn demo() -> Result<(), RpcError> {
//! let client = RpcClient::builder().host("localhost:8080").build();
//! let _sub = client.on(EventKind::Message, |event| {
//!     if let ClientEvent::Message(outcome) = event {
//!         println!("server push: {outcome:?}");
//!     }
//! });
//!
//! client.connect().await?;
//! client.game().join_game("Ayla").await?;
//! client.game().move_player(Direction::North).await?;
//! client.game().leave_game().await?;
//! client.destroy();
//! # Ok(())
//! # }
//! ```

mod client;
mod connection;
mod correlator;
mod error;
mod events;
pub mod game;

pub use client::{
    ClientConfig, DEFAULT_CALL_TIMEOUT, DEFAULT_CONNECT_TIMEOUT, DEFAULT_PATH, RpcClient,
    RpcClientBuilder,
};
pub use connection::ConnectionState;
pub use correlator::{Reply, RequestCorrelator};
pub use error::{ErrorKind, RpcError};
pub use events::{ClientEvent, ClientEventBus, EventKind};
pub use game::{Direction, GameApi, Position};

pub use arena_rpc_backoff::ReconnectConfig;
pub use arena_rpc_protocol::{ErrorObject, Outcome, RequestId};
pub use arena_rpc_session::{SessionConfig, SessionError, SessionSnapshot};
pub use arena_rpc_transport::TransportError;

/// Convenient re-exports for client code.
pub mod prelude {
    pub use crate::game::{CastSpellParams, Direction, GameApi, Position};
    pub use crate::{
        ClientConfig, ClientEvent, ConnectionState, ErrorKind, EventKind, ReconnectConfig,
        RpcClient, RpcError, SessionConfig,
    };
    pub use arena_rpc_protocol::Outcome;
}
