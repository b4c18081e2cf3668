//! Events the client publishes on its [`EventBus`].

use std::time::Duration;

use arena_rpc_events::EventBus;
use arena_rpc_protocol::Outcome;

use crate::RpcError;

/// The key handlers subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    Reconnecting,
    Message,
    Error,
}

/// A client event.
#[derive(Debug)]
pub enum ClientEvent {
    /// The socket opened.
    Connected,
    /// The socket closed; pending calls have already been rejected.
    Disconnected { reason: String },
    /// A retry is scheduled after `delay`.
    Reconnecting { attempt: u32, delay: Duration },
    /// A server notification (`"id": null`).
    Message(Outcome),
    /// A non-fatal anomaly: malformed frame, unmatched or mismatched
    /// response, call timeout, failed attempt, origin rejection, exhaustion.
    Error(RpcError),
}

impl ClientEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connected => EventKind::Connected,
            Self::Disconnected { .. } => EventKind::Disconnected,
            Self::Reconnecting { .. } => EventKind::Reconnecting,
            Self::Message(_) => EventKind::Message,
            Self::Error(_) => EventKind::Error,
        }
    }
}

/// The bus type exposed by [`RpcClient::events`](crate::RpcClient::events).
pub type ClientEventBus = EventBus<EventKind, ClientEvent>;

/// Emits `event` under its own kind.
pub(crate) fn publish(bus: &ClientEventBus, event: ClientEvent) {
    bus.emit(event.kind(), &event);
}
