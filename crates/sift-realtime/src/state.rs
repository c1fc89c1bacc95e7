//! Connection lifecycle states.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of the single transport owned by a session.
///
/// ```text
/// Idle --connect--> Connecting --open--> Open --lost--> Reconnecting --exhausted--> Failed
///                                         ^                  |
///                                         +------open--------+
/// any --disconnect--> Idle
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No session; nothing scheduled.
    #[default]
    Idle,
    /// First transport open in progress.
    Connecting,
    /// Transport open; heartbeat running; sends accepted.
    Open,
    /// Transport lost; a retry is scheduled or in progress.
    Reconnecting,
    /// The controller is abandoning the current transport.
    Closing,
    /// Retry budget exhausted; waits for an explicit `connect`.
    Failed,
}

impl ConnectionState {
    /// Whether outbound sends are accepted.
    pub fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }

    /// Whether a driver is working towards (or holding) an open transport.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::Open | Self::Reconnecting | Self::Closing
        )
    }

    /// Wire name used in connectivity payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Reconnecting => "reconnecting",
            Self::Closing => "closing",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_idle() {
        assert_eq!(ConnectionState::default(), ConnectionState::Idle);
    }

    #[test]
    fn only_open_accepts_sends() {
        for state in [
            ConnectionState::Idle,
            ConnectionState::Connecting,
            ConnectionState::Reconnecting,
            ConnectionState::Closing,
            ConnectionState::Failed,
        ] {
            assert!(!state.is_open(), "{state} must not accept sends");
        }
        assert!(ConnectionState::Open.is_open());
    }

    #[test]
    fn active_states() {
        assert!(ConnectionState::Connecting.is_active());
        assert!(ConnectionState::Reconnecting.is_active());
        assert!(!ConnectionState::Idle.is_active());
        assert!(!ConnectionState::Failed.is_active());
    }

    #[test]
    fn serde_matches_display() {
        for state in [
            ConnectionState::Idle,
            ConnectionState::Open,
            ConnectionState::Reconnecting,
            ConnectionState::Failed,
        ] {
            let json = serde_json::to_value(state).unwrap();
            assert_eq!(json, state.as_str());
            assert_eq!(state.to_string(), state.as_str());
        }
    }
}
