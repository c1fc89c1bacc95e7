//! # sift-settings
//!
//! Configuration for the Sift real-time layer, loaded from three layers
//! (in priority order):
//!
//! 1. **Compiled defaults** — [`SiftSettings::default()`]
//! 2. **User file** — `~/.sift/settings.json` (deep-merged over defaults)
//! 3. **Environment variables** — `SIFT_*` overrides (highest priority)
//!
//! There is no global settings instance. The composition root loads a
//! [`SiftSettings`] once and hands the relevant section to each component.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides_from, deep_merge, load_settings, load_settings_from_path, settings_dir,
    settings_path,
};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = SiftSettings::default();
        let _path = settings_path();
    }

    #[test]
    fn default_settings_are_valid() {
        let settings = SiftSettings::default();
        assert_eq!(settings.realtime.heartbeat_interval_ms, 15_000);
        assert_eq!(settings.realtime.reconnect.first_delay_ms, 500);
        assert_eq!(settings.realtime.reconnect.base_delay_ms, 1000);
        assert_eq!(settings.realtime.reconnect.max_delay_ms, 30_000);
        assert_eq!(settings.realtime.reconnect.max_attempts, 10);
        assert!(settings.realtime.pong_timeout_ms.is_none());
        assert_eq!(settings.logging.level, "info");
    }
}
