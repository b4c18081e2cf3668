//! The session store: holds at most one session token and decides whether
//! it may be attached to an outgoing call.

use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;

use crate::session::is_valid_token;
use crate::{Session, SessionConfig, SessionError, SessionSnapshot};

/// Key under which the join result carries the session token.
const JOIN_SESSION_KEY: &str = "session_id";

/// Holds the current session token and its expiry.
///
/// ## Lifecycle
///
/// ```text
/// set() / set_from_join() ──→ [Active] ──(lifetime elapses)──→ [Expired]
///                                │                                 │
///                                ▼ clear()                         ▼ validate_for_request()
///                             [Empty] ◄────────────────────────────┘
/// ```
///
/// `SessionStore` is not thread-safe by itself; the client wraps it in a
/// mutex.
#[derive(Debug, Default)]
pub struct SessionStore {
    config: SessionConfig,
    current: Option<Session>,
}

impl SessionStore {
    /// Creates an empty store.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            current: None,
        }
    }

    /// Stores `token` with the configured default lifetime.
    ///
    /// # Errors
    /// Returns [`SessionError::InvalidFormat`] and leaves any existing
    /// session untouched if the token is malformed.
    pub fn set(&mut self, token: &str) -> Result<(), SessionError> {
        self.set_with_expiry(token, self.config.lifetime())
    }

    /// Stores `token` with an explicit lifetime.
    ///
    /// # Errors
    /// Same as [`set`](Self::set).
    pub fn set_with_expiry(&mut self, token: &str, lifetime: Duration) -> Result<(), SessionError> {
        if !is_valid_token(token) {
            tracing::warn!("rejected malformed session token");
            return Err(SessionError::InvalidFormat);
        }

        let expires_at = Instant::now() + lifetime;
        self.current = Some(Session {
            token: token.to_owned(),
            expires_at,
        });
        tracing::info!(lifetime_secs = lifetime.as_secs(), "session stored");
        Ok(())
    }

    /// Extracts `session_id` from a join result and stores it.
    ///
    /// # Errors
    /// [`SessionError::InvalidFormat`] if the field is missing, not a
    /// string, or malformed.
    pub fn set_from_join(&mut self, result: &Value) -> Result<(), SessionError> {
        let token = result
            .get(JOIN_SESSION_KEY)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                tracing::warn!("join result carried no session_id string");
                SessionError::InvalidFormat
            })?;
        self.set(token)
    }

    /// Drops the current session, if any.
    pub fn clear(&mut self) {
        if self.current.take().is_some() {
            tracing::info!("session cleared");
        }
    }

    /// `true` when no token is set or the expiry instant has been reached.
    pub fn is_expired(&self) -> bool {
        self.current
            .as_ref()
            .is_none_or(|session| session.is_expired_at(Instant::now()))
    }

    /// The stored token, even if it has expired.
    pub fn token(&self) -> Option<&str> {
        self.current.as_ref().map(|session| session.token.as_str())
    }

    /// A copy of the session for display, or `None` when nothing is stored.
    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        let now = Instant::now();
        self.current.as_ref().map(|session| SessionSnapshot {
            token: session.token.clone(),
            expires_at: session.expires_at,
            valid: !session.is_expired_at(now),
        })
    }

    /// Checks that a call may carry the current token and returns it.
    ///
    /// An expired session is cleared before [`SessionError::Expired`] is
    /// returned, so it cannot be reused.
    pub fn validate_for_request(&mut self) -> Result<&str, SessionError> {
        let Some(session) = &self.current else {
            return Err(SessionError::NoSession);
        };
        if !is_valid_token(&session.token) {
            return Err(SessionError::InvalidFormat);
        }
        if session.is_expired_at(Instant::now()) {
            tracing::info!("session expired, clearing");
            self.current = None;
            return Err(SessionError::Expired);
        }

        Ok(self.token().unwrap_or_default())
    }
}
