//! Reconnection scheduling with bounded exponential backoff.
//!
//! - [`backoff_delay`]: pure delay law, attempt `n` (1-indexed)
//! - [`jittered`]: optional symmetric jitter on top of the law
//! - [`ReconnectScheduler`]: attempt counter plus at most one pending timer
//!
//! With the default policy the sequence is
//! 500ms, 1s, 2s, 4s, 8s, 16s, 30s, 30s, ... and the session is marked
//! failed after 10 consecutive attempts.

use std::future;
use std::pin::Pin;
use std::time::Duration;

use sift_settings::ReconnectSettings;
use tokio::time::Sleep;

/// Delay before retry attempt `attempt` (1-indexed; `0` is treated as `1`).
///
/// `first_delay_ms` for the first attempt, then
/// `min(base_delay_ms * 2^(attempt - 2), max_delay_ms)`.
pub fn backoff_delay(policy: &ReconnectSettings, attempt: u32) -> Duration {
    let millis = if attempt <= 1 {
        policy.first_delay_ms.min(policy.max_delay_ms)
    } else {
        let exponent = (attempt - 2).min(31);
        policy
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(policy.max_delay_ms)
    };
    Duration::from_millis(millis)
}

/// Spread `delay` by `±factor`; `random` is a sample from `[0.0, 1.0)`.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn jittered(delay: Duration, factor: f64, random: f64) -> Duration {
    if factor <= 0.0 {
        return delay;
    }
    let scale = 1.0 + (random * 2.0 - 1.0) * factor;
    let millis = (delay.as_millis() as f64 * scale).round().max(0.0);
    Duration::from_millis(millis as u64)
}

/// Owns the retry budget and the single pending retry timer.
///
/// The timer lives inside the scheduler, so dropping or cancelling it is
/// enough to guarantee no retry fires afterwards.
#[derive(Debug)]
pub struct ReconnectScheduler {
    policy: ReconnectSettings,
    attempts: u32,
    pending: Option<Pin<Box<Sleep>>>,
}

impl ReconnectScheduler {
    /// Create an idle scheduler.
    pub fn new(policy: ReconnectSettings) -> Self {
        Self {
            policy,
            attempts: 0,
            pending: None,
        }
    }

    /// Retry attempts consumed since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Configured retry budget.
    pub fn max_attempts(&self) -> u32 {
        self.policy.max_attempts
    }

    /// Whether the budget is spent.
    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.policy.max_attempts
    }

    /// Whether a retry timer is armed.
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Arm the next retry.
    ///
    /// Returns the delay, or `None` once the budget is exhausted. Arming
    /// while a timer is pending replaces it, so at most one is ever live.
    pub fn arm(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            self.pending = None;
            return None;
        }
        self.attempts += 1;
        let delay = jittered(
            backoff_delay(&self.policy, self.attempts),
            self.policy.jitter_factor,
            rand::random::<f64>(),
        );
        self.pending = Some(Box::pin(tokio::time::sleep(delay)));
        Some(delay)
    }

    /// Drop any pending timer; the attempt count is kept.
    pub fn cancel(&mut self) {
        self.pending = None;
    }

    /// Drop any pending timer and restore the full budget.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.pending = None;
    }

    /// Resolve when the armed timer fires. Pends forever when nothing is
    /// armed, which makes it safe as a `select!` branch.
    pub async fn fired(&mut self) {
        match self.pending.as_mut() {
            Some(sleep) => {
                sleep.as_mut().await;
                self.pending = None;
            }
            None => future::pending().await,
        }
    }
}
