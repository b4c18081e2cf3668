//! Reconnection backoff for arena-rpc.
//!
//! Computes exponential delays with random jitter and counts consecutive
//! failed connection attempts up to a bound.
//!
//! # Integration
//!
//! The scheduler sits inside the connection task's retry loop:
//!
//! ```ignore
//! loop {
//!     match connector.connect(&url).await {
//!         Ok(conn) => { scheduler.reset(); /* serve */ }
//!         Err(_) => match scheduler.record_failure() {
//!             Some((attempt, delay)) => tokio::time::sleep(delay).await,
//!             None => break, // exhausted
//!         },
//!     }
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use serde::Deserialize;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Backoff parameters.
///
/// Every field has a default, so a partial config file deserializes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay before the first retry, in milliseconds. Default: 1000.
    pub base_delay_ms: u64,
    /// Upper bound on the un-jittered delay, in milliseconds. Default: 30000.
    pub max_delay_ms: u64,
    /// Number of retries after the initial failure. Default: 5.
    pub max_attempts: u32,
    /// Relative jitter (0.0–1.0). Default: 0.10 (±10%).
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_attempts: 5,
            jitter: 0.10,
        }
    }
}

impl ReconnectConfig {
    /// Clamp and fix any out-of-range values so the config is safe to use.
    ///
    /// Called automatically by [`ReconnectScheduler::new`]. Rules:
    /// - `jitter` clamped to `0.0..=1.0` (NaN becomes the default).
    /// - `max_delay_ms` raised to at least `base_delay_ms`.
    pub fn validated(mut self) -> Self {
        if self.jitter.is_nan() {
            warn!("reconnect jitter is NaN, using default");
            self.jitter = Self::default().jitter;
        }
        self.jitter = self.jitter.clamp(0.0, 1.0);
        if self.max_delay_ms < self.base_delay_ms {
            warn!(
                base_ms = self.base_delay_ms,
                max_ms = self.max_delay_ms,
                "max_delay_ms below base_delay_ms, raising"
            );
            self.max_delay_ms = self.base_delay_ms;
        }
        self
    }

    /// The un-jittered delay before retry `attempt` (1-based):
    /// `min(max, base * 2^(attempt-1))`.
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63);
        let ms = self
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }

    /// The delay before retry `attempt`, perturbed uniformly within
    /// `±jitter` of [`nominal_delay`](Self::nominal_delay) and rounded to
    /// whole milliseconds.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let nominal = self.nominal_delay(attempt).as_millis() as f64;
        let spread = nominal * self.jitter;
        let jittered = if spread > 0.0 {
            nominal + rand::rng().random_range(-spread..=spread)
        } else {
            nominal
        };
        Duration::from_millis(jittered.max(0.0).round() as u64)
    }

    /// Whether retry `attempt` (1-based) is still within bounds.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt <= self.max_attempts
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Tracks consecutive connection failures and hands out retry delays.
///
/// One `ReconnectScheduler` per client connection task.
#[derive(Debug, Clone)]
pub struct ReconnectScheduler {
    config: ReconnectConfig,
    attempts: u32,
}

impl ReconnectScheduler {
    /// Create a scheduler from config.
    pub fn new(config: ReconnectConfig) -> Self {
        let config = config.validated();
        debug!(
            base_ms = config.base_delay_ms,
            max_ms = config.max_delay_ms,
            max_attempts = config.max_attempts,
            "reconnect scheduler created"
        );
        Self {
            config,
            attempts: 0,
        }
    }

    pub fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    /// See [`ReconnectConfig::next_delay`].
    pub fn next_delay(&self, attempt: u32) -> Duration {
        self.config.next_delay(attempt)
    }

    /// See [`ReconnectConfig::should_retry`].
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.config.should_retry(attempt)
    }

    /// Records one failure and returns the retry number with its delay, or
    /// `None` once the bound is exceeded.
    ///
    /// After exhaustion the counter stays past the bound, so further calls
    /// keep returning `None` until [`reset`](Self::reset).
    pub fn record_failure(&mut self) -> Option<(u32, Duration)> {
        self.attempts = self.attempts.saturating_add(1);
        if !self.should_retry(self.attempts) {
            return None;
        }
        let delay = self.next_delay(self.attempts);
        debug!(
            attempt = self.attempts,
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );
        Some((self.attempts, delay))
    }

    /// Clears the failure counter. Called once a connection opens.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Consecutive failures recorded since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

impl Default for ReconnectScheduler {
    fn default() -> Self {
        Self::new(ReconnectConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nominal_delay_doubles_until_cap() {
        let cfg = ReconnectConfig::default();
        let ms: Vec<u64> = (1..=7)
            .map(|n| cfg.nominal_delay(n).as_millis() as u64)
            .collect();
        assert_eq!(ms, [1_000, 2_000, 4_000, 8_000, 16_000, 30_000, 30_000]);
    }

    #[test]
    fn test_nominal_delay_huge_attempt_saturates() {
        let cfg = ReconnectConfig::default();
        assert_eq!(cfg.nominal_delay(u32::MAX), Duration::from_millis(30_000));
        assert_eq!(cfg.nominal_delay(0), Duration::from_millis(1_000));
    }

    #[test]
    fn test_next_delay_zero_jitter_is_exact() {
        let cfg = ReconnectConfig {
            jitter: 0.0,
            ..Default::default()
        };
        assert_eq!(cfg.next_delay(3), Duration::from_millis(4_000));
    }

    #[test]
    fn test_validated_clamps_nonsense() {
        let cfg = ReconnectConfig {
            base_delay_ms: 500,
            max_delay_ms: 100,
            max_attempts: 3,
            jitter: 4.0,
        }
        .validated();
        assert_eq!(cfg.max_delay_ms, 500);
        assert_eq!(cfg.jitter, 1.0);

        let cfg = ReconnectConfig {
            jitter: f64::NAN,
            ..Default::default()
        }
        .validated();
        assert_eq!(cfg.jitter, 0.10);
    }

    #[test]
    fn test_config_deserialize_partial() {
        let cfg: ReconnectConfig =
            serde_json::from_str(r#"{"max_attempts": 2, "base_delay_ms": 50}"#).unwrap();
        assert_eq!(cfg.max_attempts, 2);
        assert_eq!(cfg.base_delay_ms, 50);
        assert_eq!(cfg.max_delay_ms, 30_000);
    }

    #[test]
    fn test_record_failure_then_reset() {
        let mut scheduler = ReconnectScheduler::default();
        let (attempt, _) = scheduler.record_failure().unwrap();
        assert_eq!(attempt, 1);
        assert_eq!(scheduler.attempts(), 1);

        scheduler.reset();
        assert_eq!(scheduler.attempts(), 0);
        let (attempt, _) = scheduler.record_failure().unwrap();
        assert_eq!(attempt, 1);
    }
}
