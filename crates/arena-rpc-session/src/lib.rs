//! Client-side session state for arena-rpc.
//!
//! This crate holds the two checks that run before anything reaches the
//! wire:
//!
//! 1. **Origin validation** ([`OriginGuard`]): is the current host allowed
//!    to open a connection at all? Consulted on every connection attempt.
//! 2. **Session tracking** ([`SessionStore`]): the token returned by the
//!    join call, its expiry, and whether it may be attached to a call.
//!
//! # How it fits in the stack
//!
//! ```text
//! RpcClient (above)  ← validates the session before every call
//!     ↕
//! Session Layer (this crate)  ← origin guard and session token
//!     ↕
//! Connection task (beside)  ← consults the origin guard before connecting
//! ```

mod error;
mod origin;
mod session;
mod store;

pub use error::{OriginRejected, SessionError};
pub use origin::{CLOUD_IDE_SUFFIXES, DEVELOPMENT_HOSTS, OriginGuard};
pub use session::{Session, SessionConfig, SessionSnapshot, is_valid_token};
pub use store::SessionStore;
