//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`SiftSettings::default()`]
//! 2. If `~/.sift/settings.json` exists, deep-merge user values over defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::SiftSettings;

/// Resolve the Sift state directory (`~/.sift`).
pub fn settings_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".sift")
}

/// Resolve the path to the settings file (`~/.sift/settings.json`).
pub fn settings_path() -> PathBuf {
    settings_dir().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<SiftSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or an invalid merged value
/// is an error.
pub fn load_settings_from_path(path: &Path) -> Result<SiftSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    settings.realtime.validate()?;
    Ok(settings)
}

fn load_file_layer(path: &Path) -> Result<SiftSettings> {
    let defaults = serde_json::to_value(SiftSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `SIFT_*` environment variable overrides to loaded settings.
///
/// Invalid values are ignored with a warning and the file/default value is kept.
pub fn apply_env_overrides(settings: &mut SiftSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`, so parsing is testable without
/// touching the process environment.
pub fn apply_overrides_from(settings: &mut SiftSettings, lookup: impl Fn(&str) -> Option<String>) {
    let read_string = |name: &str| lookup(name).filter(|v| !v.is_empty());
    let read_u64 = |name: &str, min: u64, max: u64| {
        let val = lookup(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    };

    if let Some(v) = read_string("SIFT_WS_URL") {
        settings.realtime.url = v;
    }
    if let Some(v) = read_u64("SIFT_HEARTBEAT_INTERVAL_MS", 1000, 600_000) {
        settings.realtime.heartbeat_interval_ms = v;
    }
    if let Some(v) = read_u64("SIFT_PONG_TIMEOUT_MS", 1000, 3_600_000) {
        settings.realtime.pong_timeout_ms = Some(v);
    }
    if let Some(v) = read_u64("SIFT_CONNECT_TIMEOUT_MS", 100, 600_000) {
        settings.realtime.connect_timeout_ms = v;
    }
    if let Some(v) = read_u64("SIFT_MAX_RECONNECT_ATTEMPTS", 1, 1000) {
        #[allow(clippy::cast_possible_truncation)]
        let attempts = v as u32;
        settings.realtime.reconnect.max_attempts = attempts;
    }
    if let Some(v) = read_string("SIFT_CLIENT_ID_DIR") {
        settings.realtime.client_id_dir = Some(PathBuf::from(v));
    }
    if let Some(v) = read_string("SIFT_LOG_LEVEL") {
        settings.logging.level = v;
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::errors::SettingsError;

    fn overrides(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({
            "realtime": {"url": "ws://a", "heartbeatIntervalMs": 15000}
        });
        let source = serde_json::json!({
            "realtime": {"url": "ws://b"}
        });
        let merged = deep_merge(target, source);
        assert_eq!(merged["realtime"]["url"], "ws://b");
        assert_eq!(merged["realtime"]["heartbeatIntervalMs"], 15000);
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let source = serde_json::json!({"items": [4]});
        assert_eq!(deep_merge(target, source)["items"], serde_json::json!([4]));
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let target = serde_json::json!({"a": {"nested": true}});
        let source = serde_json::json!({"a": 42});
        assert_eq!(deep_merge(target, source)["a"], 42);
    }

    // ── load_settings_from_path ─────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let settings = load_file_layer(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings.realtime.heartbeat_interval_ms, 15_000);
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"realtime": {"reconnect": {"maxAttempts": 3}}, "logging": {"level": "debug"}}"#,
        )
        .unwrap();

        let settings = load_file_layer(&path).unwrap();
        assert_eq!(settings.realtime.reconnect.max_attempts, 3);
        assert_eq!(settings.realtime.reconnect.first_delay_ms, 500);
        assert_eq!(settings.logging.level, "debug");
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();

        let result = load_file_layer(&path);
        assert!(matches!(result.unwrap_err(), SettingsError::Json(_)));
    }

    #[test]
    fn load_rejects_invalid_merged_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"realtime": {"reconnect": {"jitterFactor": 3.0}}}"#).unwrap();

        let result = load_settings_from_path(&path);
        assert!(matches!(result.unwrap_err(), SettingsError::InvalidValue(_)));
    }

    // ── overrides ───────────────────────────────────────────────────

    #[test]
    fn overrides_apply_valid_values() {
        let mut settings = SiftSettings::default();
        apply_overrides_from(
            &mut settings,
            overrides(&[
                ("SIFT_WS_URL", "wss://sift.example.com/ws"),
                ("SIFT_HEARTBEAT_INTERVAL_MS", "5000"),
                ("SIFT_PONG_TIMEOUT_MS", "30000"),
                ("SIFT_MAX_RECONNECT_ATTEMPTS", "4"),
                ("SIFT_LOG_LEVEL", "debug"),
            ]),
        );
        assert_eq!(settings.realtime.url, "wss://sift.example.com/ws");
        assert_eq!(settings.realtime.heartbeat_interval_ms, 5000);
        assert_eq!(settings.realtime.pong_timeout_ms, Some(30_000));
        assert_eq!(settings.realtime.reconnect.max_attempts, 4);
        assert_eq!(settings.logging.level, "debug");
    }

    #[test]
    fn overrides_ignore_out_of_range() {
        let mut settings = SiftSettings::default();
        apply_overrides_from(
            &mut settings,
            overrides(&[
                ("SIFT_HEARTBEAT_INTERVAL_MS", "10"),
                ("SIFT_MAX_RECONNECT_ATTEMPTS", "zero"),
            ]),
        );
        assert_eq!(settings.realtime.heartbeat_interval_ms, 15_000);
        assert_eq!(settings.realtime.reconnect.max_attempts, 10);
    }

    #[test]
    fn overrides_ignore_empty_strings() {
        let mut settings = SiftSettings::default();
        apply_overrides_from(&mut settings, overrides(&[("SIFT_WS_URL", "")]));
        assert_eq!(settings.realtime.url, "ws://127.0.0.1:8000/ws");
    }

    #[test]
    fn parse_u64_range_bounds() {
        assert_eq!(parse_u64_range("1000", 1000, 2000), Some(1000));
        assert_eq!(parse_u64_range("2000", 1000, 2000), Some(2000));
        assert_eq!(parse_u64_range("999", 1000, 2000), None);
        assert_eq!(parse_u64_range("-1", 0, 10), None);
    }
}
