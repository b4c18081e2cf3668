//! Event bus for arena-rpc.
//!
//! Every component of the client announces state transitions through an
//! [`EventBus`] instead of calling into its observers directly. Observers
//! (loggers, UI banners, game-state code) subscribe by event kind and are
//! invoked synchronously when an event is emitted.
//!
//! # How it fits in the stack
//!
//! ```text
//! RPC client facade   ← exposes `on()` by delegating to its bus
//!     ↕
//! Connection task     ← emits connected / disconnected / message / error
//!     ↕
//! Event bus (this crate)
//! ```
//!
//! The bus is generic: `K` is the event key (usually a small `Copy` enum)
//! and `P` is the payload type handed to handlers by reference.

mod bus;

pub use bus::{EventBus, Handler, ListenerId, Subscription};
