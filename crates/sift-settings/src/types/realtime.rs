//! Real-time session settings: endpoint, heartbeat, and reconnection policy.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Connection endpoint, heartbeat, and queue settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RealtimeSettings {
    /// WebSocket endpoint; session identity is appended as query parameters.
    pub url: String,
    /// Interval between `ping` envelopes while open, in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Optional pong deadline in milliseconds.
    ///
    /// `None` keeps liveness detection on the transport's own close signal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pong_timeout_ms: Option<u64>,
    /// Upper bound on a single transport open, in milliseconds.
    pub connect_timeout_ms: u64,
    /// Capacity of the per-transport outbound queue.
    pub outbound_queue_capacity: usize,
    /// Reconnection backoff policy.
    pub reconnect: ReconnectSettings,
    /// Directory for the persisted client-id map (default `~/.sift`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id_dir: Option<PathBuf>,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8000/ws".to_string(),
            heartbeat_interval_ms: 15_000,
            pong_timeout_ms: None,
            connect_timeout_ms: 10_000,
            outbound_queue_capacity: 256,
            reconnect: ReconnectSettings::default(),
            client_id_dir: None,
        }
    }
}

impl RealtimeSettings {
    /// Heartbeat interval as a [`Duration`].
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Pong deadline as a [`Duration`], if enabled.
    pub fn pong_timeout(&self) -> Option<Duration> {
        self.pong_timeout_ms.map(Duration::from_millis)
    }

    /// Connect timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Reject values the controller cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "heartbeatIntervalMs must be greater than zero".into(),
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "connectTimeoutMs must be greater than zero".into(),
            ));
        }
        if self.outbound_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "outboundQueueCapacity must be at least 1".into(),
            ));
        }
        self.reconnect.validate()
    }
}

/// Bounded exponential backoff between reconnection attempts.
///
/// Attempt `n` (1-indexed) waits `first_delay_ms` when `n == 1`, and
/// `min(base_delay_ms * 2^(n-2), max_delay_ms)` afterwards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectSettings {
    /// Delay before the first retry.
    pub first_delay_ms: u64,
    /// Base of the exponential sequence from the second retry on.
    pub base_delay_ms: u64,
    /// Cap applied to every delay.
    pub max_delay_ms: u64,
    /// Consecutive retries allowed before the session is marked failed.
    pub max_attempts: u32,
    /// Symmetric jitter factor in `[0.0, 1.0]`; `0.0` disables jitter.
    pub jitter_factor: f64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            first_delay_ms: 500,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            max_attempts: 10,
            jitter_factor: 0.0,
        }
    }
}

impl ReconnectSettings {
    /// Reject values the scheduler cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(SettingsError::InvalidValue(
                "reconnect.maxAttempts must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(SettingsError::InvalidValue(format!(
                "reconnect.jitterFactor must be within [0, 1], got {}",
                self.jitter_factor
            )));
        }
        if self.first_delay_ms > self.max_delay_ms || self.base_delay_ms > self.max_delay_ms {
            return Err(SettingsError::InvalidValue(
                "reconnect delays must not exceed maxDelayMs".into(),
            ));
        }
        Ok(())
    }
}
