//! Settings type definitions.
//!
//! Field names are camelCase on disk. Every struct is `#[serde(default)]`, so
//! a partial file only overrides the keys it names.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings for the handoff client.
///
/// ```json
/// {
///   "relay": { "url": "wss://relay.example.com/ws", "connectTimeoutMs": 5000 },
///   "logging": { "level": "debug" }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HandoffSettings {
    /// Relay server connection.
    pub relay: RelaySettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl HandoffSettings {
    /// Reject values no transport can work with.
    pub fn validate(&self) -> Result<()> {
        let url = self.relay.url.trim();
        if url.is_empty() {
            return Err(SettingsError::InvalidValue("relay.url is empty".into()));
        }
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(SettingsError::InvalidValue(format!(
                "relay.url must use ws:// or wss://, got {url}"
            )));
        }
        if self.relay.connect_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "relay.connectTimeoutMs must be positive".into(),
            ));
        }
        if self.relay.outbound_queue == 0 {
            return Err(SettingsError::InvalidValue(
                "relay.outboundQueue must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Relay connection settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// WebSocket URL of the relay server.
    pub url: String,
    /// How long a connect attempt may take before it counts as failed.
    pub connect_timeout_ms: u64,
    /// Outbound frames buffered per connection before sends are refused.
    pub outbound_queue: usize,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080/ws".to_string(),
            connect_timeout_ms: 10_000,
            outbound_queue: 32,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Minimum level when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}
