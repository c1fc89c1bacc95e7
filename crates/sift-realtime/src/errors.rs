//! Error types for the real-time layer.
//!
//! Most failures here are recovered internally: a failed transport open or a
//! lost connection feeds the reconnect scheduler instead of reaching the
//! caller. What surfaces is construction-time misconfiguration, session key
//! resolution, and client-id persistence.

use sift_core::IdentityError;
use sift_settings::SettingsError;
use thiserror::Error;

/// Transport-level failures reported by a [`crate::transport::Connector`] or
/// [`crate::transport::Transport`].
#[derive(Debug, Error)]
pub enum TransportError {
    /// Opening the transport failed.
    #[error("failed to connect to {url}: {reason}")]
    Connect {
        /// Endpoint without query parameters.
        url: String,
        /// Underlying error text.
        reason: String,
    },

    /// Writing a frame failed.
    #[error("failed to send frame: {0}")]
    Send(String),

    /// The transport was already closed.
    #[error("transport closed")]
    Closed,
}

/// Failures persisting or loading the client-id map.
#[derive(Debug, Error)]
pub enum ClientIdStoreError {
    /// Filesystem error.
    #[error("client id store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stored map is not valid JSON.
    #[error("client id store is corrupt: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors surfaced to callers of the real-time layer.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Settings failed validation.
    #[error(transparent)]
    Settings(#[from] SettingsError),

    /// The configured endpoint is not a usable WebSocket URL.
    #[error("invalid endpoint {url:?}: {reason}")]
    InvalidUrl {
        /// Configured value.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// No principal could be resolved for the session key.
    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// The client id could not be loaded or persisted.
    #[error(transparent)]
    ClientIdStore(#[from] ClientIdStoreError),
}

/// Convenience alias for real-time results.
pub type Result<T> = std::result::Result<T, RealtimeError>;
