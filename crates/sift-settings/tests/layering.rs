//! File and override layering through the public loader API.

use std::collections::HashMap;

use assert_matches::assert_matches;
use sift_settings::{SettingsError, SiftSettings, apply_overrides_from, load_settings_from_path};

fn write(dir: &tempfile::TempDir, body: &str) -> std::path::PathBuf {
    let path = dir.path().join("settings.json");
    std::fs::write(&path, body).unwrap();
    path
}

#[test]
fn partial_file_keeps_remaining_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(&dir, r#"{"realtime": {"reconnect": {"maxAttempts": 3}}}"#);
    let settings = load_settings_from_path(&path).unwrap();
    let defaults = SiftSettings::default();

    assert_eq!(settings.realtime.reconnect.max_attempts, 3);
    assert_eq!(
        settings.realtime.reconnect.first_delay_ms,
        defaults.realtime.reconnect.first_delay_ms
    );
    assert_eq!(settings.realtime.url, defaults.realtime.url);
}

#[test]
fn overrides_win_over_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(&dir, r#"{"realtime": {"url": "ws://file/ws"}}"#);
    let mut settings = load_settings_from_path(&path).unwrap();

    let env: HashMap<&str, &str> = [
        ("SIFT_WS_URL", "wss://env/ws"),
        ("SIFT_MAX_RECONNECT_ATTEMPTS", "not-a-number"),
    ]
    .into_iter()
    .collect();
    apply_overrides_from(&mut settings, |k| env.get(k).map(|v| (*v).to_owned()));

    assert_eq!(settings.realtime.url, "wss://env/ws");
    assert_eq!(
        settings.realtime.reconnect.max_attempts,
        SiftSettings::default().realtime.reconnect.max_attempts
    );
}

#[test]
fn malformed_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(&dir, "{ not json");
    assert_matches!(load_settings_from_path(&path), Err(SettingsError::Json(_)));
}
