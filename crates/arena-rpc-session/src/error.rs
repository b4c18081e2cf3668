//! Error types for the session layer.

/// Reasons a session token cannot be stored or used.
///
/// None of the variants carry the token itself, so they are safe to log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// No session has been established (no successful join yet, or the
    /// session was cleared).
    #[error("no active session")]
    NoSession,

    /// The token does not have the 8-4-4-4-12 hexadecimal shape.
    #[error("invalid session token format")]
    InvalidFormat,

    /// The session lifetime has elapsed. The store has already been
    /// cleared when this is returned from
    /// [`SessionStore::validate_for_request`](crate::SessionStore::validate_for_request).
    #[error("session expired")]
    Expired,
}

/// A connection attempt was refused because the current host is not allowed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("origin rejected: {host}")]
pub struct OriginRejected {
    /// The offending host, as passed to the guard.
    pub host: String,
}
