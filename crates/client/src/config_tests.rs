// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use super::*;
use tempfile::TempDir;
use yare::parameterized;

#[test]
fn test_empty_file_uses_defaults() {
    let config: Config = toml::from_str("").unwrap();
    assert_eq!(config, Config::default());
    config.validate().unwrap();
}

#[test]
fn test_defaults_match_policy() {
    let config = Config::default();
    let backoff = config.connection.backoff();
    assert_eq!(backoff.initial, Duration::from_millis(1000));
    assert_eq!(backoff.max, Duration::from_millis(30_000));
    assert_eq!(config.sync.policy(), SyncPolicy::default());
    assert_eq!(config.sync.reconcile_options(), ReconcileOptions::default());
    assert_eq!(config.connection.subscribe_timeout(), Duration::from_secs(10));
    assert_eq!(config.connection.connect_timeout(), Duration::from_secs(10));
}

#[test]
fn test_partial_section_keeps_other_defaults() {
    let config: Config = toml::from_str(
        r#"
        [connection]
        url = "wss://chat.example.com/ws"
        max_delay_ms = 5000

        [sync]
        fingerprint_window_secs = 120
        "#,
    )
    .unwrap();
    assert_eq!(config.connection.url, "wss://chat.example.com/ws");
    assert_eq!(config.connection.max_delay_ms, 5000);
    assert_eq!(config.connection.initial_delay_ms, 1000);
    assert_eq!(config.sync.base_interval_ms, 5000);
    assert_eq!(
        config.sync.reconcile_options().fingerprint_window,
        chrono::Duration::seconds(120)
    );
    assert!(config.store.path.is_none());
}

#[test]
fn test_save_and_load_roundtrip() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("nested").join("config.toml");

    let mut config = Config::default();
    config.connection.url = "ws://localhost:9000/ws".to_string();
    config.connection.default_conversation = Some("inbox".to_string());
    config.store.path = Some(temp.path().join("messages.db"));
    config.save(&path).unwrap();

    let loaded = Config::load(&path).unwrap();
    assert_eq!(loaded, config);
    assert_eq!(loaded.store_path().unwrap(), temp.path().join("messages.db"));
}

#[test]
fn test_load_missing_file_fails() {
    let temp = TempDir::new().unwrap();
    let result = Config::load(&temp.path().join("missing.toml"));
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn test_load_or_default_without_file() {
    let temp = TempDir::new().unwrap();
    let config = Config::load_or_default(&temp.path().join("missing.toml")).unwrap();
    assert_eq!(config, Config::default());
}

#[test]
fn test_load_rejects_malformed_toml() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("config.toml");
    fs::write(&path, "[connection\nurl = 1").unwrap();

    let err = Config::load(&path).unwrap_err();
    assert!(err.to_string().contains("failed to parse config"));
}

#[parameterized(
    http_scheme = { "http://example.com" },
    no_scheme = { "example.com/ws" },
    empty = { "" },
)]
fn test_rejects_non_websocket_url(url: &str) {
    let mut config = Config::default();
    config.connection.url = url.to_string();
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("ws://"));
}

#[parameterized(
    base_interval = { "[sync]\nbase_interval_ms = 0", "sync.base_interval_ms" },
    response_timeout = { "[sync]\nresponse_timeout_ms = 0", "sync.response_timeout_ms" },
    initial_delay = { "[connection]\ninitial_delay_ms = 0", "connection.initial_delay_ms" },
    subscribe_timeout = { "[connection]\nsubscribe_timeout_ms = 0", "connection.subscribe_timeout_ms" },
)]
fn test_rejects_zero_intervals(content: &str, field: &str) {
    let config: Config = toml::from_str(content).unwrap();
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains(field), "{err}");
}

#[test]
fn test_rejects_inverted_backoff() {
    let mut config = Config::default();
    config.connection.initial_delay_ms = 10_000;
    config.connection.max_delay_ms = 1_000;
    assert!(config.validate().is_err());
}

#[test]
fn test_rejects_negative_fingerprint_window() {
    let mut config = Config::default();
    config.sync.fingerprint_window_secs = -1;
    assert!(config.validate().is_err());
}
