//! Origin validation, consulted before every connection attempt.
//!
//! The guard answers one question: is the host the client is running under
//! allowed to open a connection to the game server? Development mode is
//! permissive towards loopback hosts and hosted IDE previews; production
//! mode only accepts hosts that were explicitly configured.

use crate::OriginRejected;

/// Hosts accepted in development mode, including their subdomains.
pub const DEVELOPMENT_HOSTS: &[&str] = &["localhost", "127.0.0.1", "0.0.0.0", "[::1]", "::1"];

/// Hostname suffixes of cloud IDE previews accepted in development mode.
pub const CLOUD_IDE_SUFFIXES: &[&str] = &[
    ".replit.dev",
    ".repl.co",
    ".gitpod.io",
    ".app.github.dev",
    ".csb.app",
];

/// Validates the current host against the development list or the
/// production allow-list.
///
/// # Example
///
/// ```rust
/// use arena_rpc_session::OriginGuard;
///
/// let guard = OriginGuard::new(["play.example.com"]);
/// assert!(guard.validate("localhost:5173", true).is_ok());
/// assert!(guard.validate("PLAY.example.com", false).is_ok());
/// assert!(guard.validate("localhost", false).is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct OriginGuard {
    /// Normalized production hosts.
    allowed: Vec<String>,
}

impl OriginGuard {
    /// Creates a guard with the given production allow-list.
    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut guard = Self::default();
        for host in allowed {
            guard.allow(host.as_ref());
        }
        guard
    }

    /// Adds a host to the production allow-list.
    pub fn allow(&mut self, host: &str) {
        let host = normalize(host);
        if !host.is_empty() && !self.allowed.contains(&host) {
            self.allowed.push(host);
        }
    }

    /// Returns the normalized production allow-list.
    pub fn allowed(&self) -> &[String] {
        &self.allowed
    }

    /// Checks `current_host` (with or without a `:port`) and fails with
    /// [`OriginRejected`] naming the host when it is not acceptable.
    pub fn validate(&self, current_host: &str, development: bool) -> Result<(), OriginRejected> {
        let host = normalize(current_host);

        let accepted = !host.is_empty()
            && if development {
                is_development_host(&host)
            } else {
                self.allowed.iter().any(|allowed| *allowed == host)
            };

        if accepted {
            tracing::debug!(host = %host, development, "origin accepted");
            Ok(())
        } else {
            tracing::error!(host = %current_host, development, "origin rejected");
            Err(OriginRejected {
                host: current_host.to_owned(),
            })
        }
    }
}

fn is_development_host(host: &str) -> bool {
    let listed = DEVELOPMENT_HOSTS.iter().any(|dev| {
        host == *dev
            || host
                .strip_suffix(dev)
                .is_some_and(|prefix| prefix.len() > 1 && prefix.ends_with('.'))
    });
    listed || CLOUD_IDE_SUFFIXES.iter().any(|suffix| host.ends_with(suffix))
}

/// Lowercases, trims, and strips a trailing `:port`.
///
/// A bracketed IPv6 literal keeps its brackets; a bare IPv6 literal (more
/// than one colon) is left alone since it cannot carry a port.
fn normalize(host: &str) -> String {
    let host = host.trim().to_ascii_lowercase();
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => host[..=end].to_owned(),
            None => host,
        };
    }
    match host.split_once(':') {
        Some((name, port)) if !port.contains(':') => name.to_owned(),
        _ => host,
    }
}
