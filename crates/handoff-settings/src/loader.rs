//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`HandoffSettings::default()`]
//! 2. If `~/.handoff/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `HANDOFF_*` environment overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::HandoffSettings;

/// Relay URL override.
pub const ENV_RELAY_URL: &str = "HANDOFF_RELAY_URL";
/// Connect timeout override in milliseconds (100..=120000).
pub const ENV_CONNECT_TIMEOUT_MS: &str = "HANDOFF_CONNECT_TIMEOUT_MS";
/// Outbound queue size override (1..=65536).
pub const ENV_OUTBOUND_QUEUE: &str = "HANDOFF_OUTBOUND_QUEUE";
/// Log level override.
pub const ENV_LOG_LEVEL: &str = "HANDOFF_LOG_LEVEL";

/// Resolve the path to the settings file (`~/.handoff/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".handoff").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<HandoffSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or a value that fails
/// [`HandoffSettings::validate`] is an error.
pub fn load_settings_from_path(path: &Path) -> Result<HandoffSettings> {
    load_with_env(path, |name| std::env::var(name).ok())
}

/// Load settings from `path`, reading overrides through `env`.
pub fn load_with_env<F>(path: &Path, env: F) -> Result<HandoffSettings>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = serde_json::to_value(HandoffSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: HandoffSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings, env);
    settings.validate()?;
    Ok(settings)
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

/// Apply environment overrides read through `env`.
///
/// Empty and out-of-range values are ignored with a warning, leaving the
/// file/default value in place.
pub fn apply_env_overrides<F>(settings: &mut HandoffSettings, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    let read = |name: &str| env(name).filter(|v| !v.is_empty());

    if let Some(v) = read(ENV_RELAY_URL) {
        settings.relay.url = v;
    }
    if let Some(v) = read(ENV_CONNECT_TIMEOUT_MS) {
        match parse_u64_range(&v, 100, 120_000) {
            Some(n) => settings.relay.connect_timeout_ms = n,
            None => warn!(key = ENV_CONNECT_TIMEOUT_MS, value = %v, "invalid u64 env var, ignoring"),
        }
    }
    if let Some(v) = read(ENV_OUTBOUND_QUEUE) {
        match parse_usize_range(&v, 1, 65_536) {
            Some(n) => settings.relay.outbound_queue = n,
            None => warn!(key = ENV_OUTBOUND_QUEUE, value = %v, "invalid usize env var, ignoring"),
        }
    }
    if let Some(v) = read(ENV_LOG_LEVEL) {
        match parse_level(&v) {
            Some(level) => settings.logging.level = level,
            None => warn!(key = ENV_LOG_LEVEL, value = %v, "invalid log level env var, ignoring"),
        }
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Normalize a log level name (`trace`, `debug`, `info`, `warn`, `error`).
pub fn parse_level(val: &str) -> Option<String> {
    let level = val.trim().to_lowercase();
    matches!(level.as_str(), "trace" | "debug" | "info" | "warn" | "error").then_some(level)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use assert_matches::assert_matches;
    use std::collections::HashMap;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"relay": {"url": "ws://a", "outboundQueue": 32}});
        let source = serde_json::json!({"relay": {"url": "ws://b"}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["relay"]["url"], "ws://b");
        assert_eq!(merged["relay"]["outboundQueue"], 32);
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
    fn merge_array_and_primitive_replace() {
        let merged = deep_merge(
            serde_json::json!({"items": [1, 2, 3], "a": {"nested": true}}),
            serde_json::json!({"items": [4], "a": 42}),
        );
        assert_eq!(merged["items"], serde_json::json!([4]));
        assert_eq!(merged["a"], 42);
    }

    // ── load_with_env ───────────────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let path = Path::new("/nonexistent/settings.json");
        let settings = load_with_env(path, no_env).unwrap();
        assert_eq!(settings, HandoffSettings::default());
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"relay": {"connectTimeoutMs": 2500}}"#).unwrap();

        let settings = load_with_env(&path, no_env).unwrap();
        assert_eq!(settings.relay.connect_timeout_ms, 2500);
        assert_eq!(settings.relay.url, "ws://127.0.0.1:8080/ws");
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();

        assert_matches!(load_with_env(&path, no_env), Err(SettingsError::Json(_)));
    }

    #[test]
    fn load_rejects_invalid_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"relay": {"url": "tcp://relay"}}"#).unwrap();

        assert_matches!(
            load_with_env(&path, no_env),
            Err(SettingsError::InvalidValue(_))
        );
    }

    #[test]
    fn env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"relay": {"url": "ws://file/ws"}}"#).unwrap();

        let env = env_from(&[
            (ENV_RELAY_URL, "wss://env/ws"),
            (ENV_CONNECT_TIMEOUT_MS, "750"),
            (ENV_OUTBOUND_QUEUE, "4"),
            (ENV_LOG_LEVEL, "DEBUG"),
        ]);
        let settings = load_with_env(&path, env).unwrap();
        assert_eq!(settings.relay.url, "wss://env/ws");
        assert_eq!(settings.relay.connect_timeout_ms, 750);
        assert_eq!(settings.relay.outbound_queue, 4);
        assert_eq!(settings.logging.level, "debug");
    }

    #[test]
    fn invalid_env_values_ignored() {
        let mut settings = HandoffSettings::default();
        apply_env_overrides(
            &mut settings,
            env_from(&[
                (ENV_RELAY_URL, ""),
                (ENV_CONNECT_TIMEOUT_MS, "5"),
                (ENV_OUTBOUND_QUEUE, "lots"),
                (ENV_LOG_LEVEL, "chatty"),
            ]),
        );
        assert_eq!(settings, HandoffSettings::default());
    }

    // ── parsing ─────────────────────────────────────────────────────

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u64_range("100", 100, 200), Some(100));
        assert_eq!(parse_u64_range("201", 100, 200), None);
        assert_eq!(parse_u64_range("-1", 0, 10), None);
        assert_eq!(parse_usize_range("1", 1, 2), Some(1));
        assert_eq!(parse_usize_range("0", 1, 2), None);
    }

    #[test]
    fn parse_levels() {
        assert_eq!(parse_level(" Info ").as_deref(), Some("info"));
        assert_eq!(parse_level("verbose"), None);
    }
}
