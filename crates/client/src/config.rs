// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Client configuration.
//!
//! Configuration is stored as TOML, by default in
//! `{config_dir}/chatsync/config.toml`, with three sections:
//! - `[connection]`: server URL, reconnect backoff, handshake features
//! - `[sync]`: sync interval policy and reconciliation window
//! - `[store]`: location of the message database
//!
//! Every field has a default, so an empty or missing file is valid.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chatsync_core::reconcile::DEFAULT_FINGERPRINT_WINDOW_SECS;
use chatsync_core::ReconcileOptions;

use crate::error::{Error, Result};
use crate::sync::{Backoff, SyncPolicy};

const APP_DIR_NAME: &str = "chatsync";
const CONFIG_FILE_NAME: &str = "config.toml";
const DB_FILE_NAME: &str = "messages.db";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Server URL (`ws://` or `wss://`).
    #[serde(default = "default_url")]
    pub url: String,
    /// First reconnect delay in milliseconds (default: 1000).
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Upper bound for reconnect delays in milliseconds (default: 30000).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Max time for one connect attempt in seconds (default: 10).
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Max time to wait for a subscribe ack in milliseconds (default: 10000).
    #[serde(default = "default_subscribe_timeout_ms")]
    pub subscribe_timeout_ms: u64,
    /// Features announced in the handshake.
    #[serde(default = "default_features")]
    pub features: Vec<String>,
    /// Conversation assigned to untagged payloads that do not name one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_conversation: Option<String>,
}

fn default_url() -> String {
    "ws://127.0.0.1:8080/ws".to_string()
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_subscribe_timeout_ms() -> u64 {
    10_000
}

fn default_features() -> Vec<String> {
    vec!["sync".to_string(), "subscriptions".to_string()]
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            url: default_url(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            connect_timeout_secs: default_connect_timeout_secs(),
            subscribe_timeout_ms: default_subscribe_timeout_ms(),
            features: default_features(),
            default_conversation: None,
        }
    }
}

impl ConnectionConfig {
    pub fn backoff(&self) -> Backoff {
        Backoff {
            initial: Duration::from_millis(self.initial_delay_ms),
            max: Duration::from_millis(self.max_delay_ms),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn subscribe_timeout(&self) -> Duration {
        Duration::from_millis(self.subscribe_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Interval while the conversation is active (default: 5000).
    #[serde(default = "default_base_interval_ms")]
    pub base_interval_ms: u64,
    /// Interval while push is live for the conversation (default: 30000).
    #[serde(default = "default_push_interval_ms")]
    pub push_interval_ms: u64,
    /// Idle time before the interval starts doubling (default: 30000).
    #[serde(default = "default_idle_threshold_ms")]
    pub idle_threshold_ms: u64,
    /// Interval cap (default: 60000).
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
    /// First retry delay after a failed sync (default: 2000).
    #[serde(default = "default_error_backoff_base_ms")]
    pub error_backoff_base_ms: u64,
    /// Retry delay cap after failed syncs (default: 60000).
    #[serde(default = "default_error_backoff_max_ms")]
    pub error_backoff_max_ms: u64,
    /// Max time to wait for a sync response (default: 15000).
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
    /// Window for matching pushed messages to pending writes by content (default: 60).
    #[serde(default = "default_fingerprint_window_secs")]
    pub fingerprint_window_secs: i64,
}

fn default_base_interval_ms() -> u64 {
    5_000
}

fn default_push_interval_ms() -> u64 {
    30_000
}

fn default_idle_threshold_ms() -> u64 {
    30_000
}

fn default_max_interval_ms() -> u64 {
    60_000
}

fn default_error_backoff_base_ms() -> u64 {
    2_000
}

fn default_error_backoff_max_ms() -> u64 {
    60_000
}

fn default_response_timeout_ms() -> u64 {
    15_000
}

fn default_fingerprint_window_secs() -> i64 {
    DEFAULT_FINGERPRINT_WINDOW_SECS
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            base_interval_ms: default_base_interval_ms(),
            push_interval_ms: default_push_interval_ms(),
            idle_threshold_ms: default_idle_threshold_ms(),
            max_interval_ms: default_max_interval_ms(),
            error_backoff_base_ms: default_error_backoff_base_ms(),
            error_backoff_max_ms: default_error_backoff_max_ms(),
            response_timeout_ms: default_response_timeout_ms(),
            fingerprint_window_secs: default_fingerprint_window_secs(),
        }
    }
}

impl SyncConfig {
    pub fn policy(&self) -> SyncPolicy {
        SyncPolicy {
            base_interval: Duration::from_millis(self.base_interval_ms),
            push_interval: Duration::from_millis(self.push_interval_ms),
            idle_threshold: Duration::from_millis(self.idle_threshold_ms),
            max_interval: Duration::from_millis(self.max_interval_ms),
            error_backoff_base: Duration::from_millis(self.error_backoff_base_ms),
            error_backoff_max: Duration::from_millis(self.error_backoff_max_ms),
            response_timeout: Duration::from_millis(self.response_timeout_ms),
        }
    }

    pub fn reconcile_options(&self) -> ReconcileOptions {
        ReconcileOptions {
            fingerprint_window: chrono::Duration::seconds(self.fingerprint_window_secs),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Database path; defaults to `{data_dir}/chatsync/messages.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl Config {
    /// Loads configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` if it exists, the defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Config::default())
        }
    }

    /// Saves configuration, creating the parent directory if needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("failed to serialize config: {}", e)))?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let url = &self.connection.url;
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(Error::Config(format!(
                "invalid server URL '{}': must start with ws:// or wss://",
                url
            )));
        }

        let nonzero = [
            ("connection.initial_delay_ms", self.connection.initial_delay_ms),
            ("connection.max_delay_ms", self.connection.max_delay_ms),
            ("connection.connect_timeout_secs", self.connection.connect_timeout_secs),
            ("connection.subscribe_timeout_ms", self.connection.subscribe_timeout_ms),
            ("sync.base_interval_ms", self.sync.base_interval_ms),
            ("sync.push_interval_ms", self.sync.push_interval_ms),
            ("sync.idle_threshold_ms", self.sync.idle_threshold_ms),
            ("sync.max_interval_ms", self.sync.max_interval_ms),
            ("sync.error_backoff_base_ms", self.sync.error_backoff_base_ms),
            ("sync.error_backoff_max_ms", self.sync.error_backoff_max_ms),
            ("sync.response_timeout_ms", self.sync.response_timeout_ms),
        ];
        if let Some((name, _)) = nonzero.iter().find(|(_, value)| *value == 0) {
            return Err(Error::Config(format!("{name} must be greater than zero")));
        }

        if self.connection.max_delay_ms < self.connection.initial_delay_ms {
            return Err(Error::Config(
                "connection.max_delay_ms must not be below initial_delay_ms".to_string(),
            ));
        }
        if self.sync.fingerprint_window_secs < 0 {
            return Err(Error::Config(
                "sync.fingerprint_window_secs must not be negative".to_string(),
            ));
        }
        Ok(())
    }

    /// Database path from `[store]`, or the platform data directory.
    pub fn store_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.store.path {
            return Ok(path.clone());
        }
        dirs::data_dir()
            .map(|dir| dir.join(APP_DIR_NAME).join(DB_FILE_NAME))
            .ok_or(Error::NoDataDir)
    }
}

/// Default config file location under the platform config directory.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
