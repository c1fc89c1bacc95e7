//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and `#[serde(default)]`
//! so a settings file may name only the fields it changes.

mod logging;
mod realtime;

pub use logging::*;
pub use realtime::*;

use serde::{Deserialize, Serialize};

/// Root settings type.
///
/// ```json
/// {
///   "realtime": { "url": "wss://sift.example.com/ws", "reconnect": { "maxAttempts": 5 } },
///   "logging": { "level": "debug" }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SiftSettings {
    /// Real-time session and reconnection settings.
    pub realtime: RealtimeSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}
