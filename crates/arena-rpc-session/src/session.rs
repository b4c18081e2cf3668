//! Session types: the token a join call hands out, and when it stops being
//! usable.

use std::time::Duration;

use serde::Deserialize;
use tokio::time::Instant;

/// Configuration for session behavior.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Lifetime of a token stored with [`SessionStore::set`](crate::SessionStore::set).
    ///
    /// Default: 30 minutes.
    pub expiry_minutes: u64,
}

impl SessionConfig {
    /// The configured lifetime as a [`Duration`].
    pub fn lifetime(&self) -> Duration {
        Duration::from_secs(self.expiry_minutes.saturating_mul(60))
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { expiry_minutes: 30 }
    }
}

/// The current session: a well-formed token and its expiry instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// The session token, always in 8-4-4-4-12 hexadecimal form.
    pub token: String,
    /// When the token stops being accepted for outgoing calls.
    pub expires_at: Instant,
}

impl Session {
    /// Whether the session has expired as of `now`.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// A read-only copy of the session for callers, returned by
/// [`SessionStore::snapshot`](crate::SessionStore::snapshot).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub token: String,
    pub expires_at: Instant,
    /// `false` once the expiry instant has passed.
    pub valid: bool,
}

/// Returns `true` if `token` has the UUID-like shape `8-4-4-4-12`, all
/// groups hexadecimal (either case).
pub fn is_valid_token(token: &str) -> bool {
    const GROUPS: [usize; 5] = [8, 4, 4, 4, 12];

    let mut parts = token.split('-');
    for len in GROUPS {
        match parts.next() {
            Some(part) if part.len() == len && part.bytes().all(|b| b.is_ascii_hexdigit()) => {}
            _ => return false,
        }
    }
    parts.next().is_none()
}
