//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`LivefolioSettings::default()`]
//! 2. If `~/.livefolio/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `LIVEFOLIO_*` environment overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::LivefolioSettings;

/// `~/.livefolio`, falling back to `/tmp/.livefolio` without `HOME`.
pub fn settings_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".livefolio")
}

/// Resolve the path to the settings file (`~/.livefolio/settings.json`).
pub fn settings_path() -> PathBuf {
    settings_dir().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<LivefolioSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; a file with invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<LivefolioSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn load_file_layer(path: &Path) -> Result<LivefolioSettings> {
    let defaults = serde_json::to_value(LivefolioSettings::default())?;

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

/// Apply `LIVEFOLIO_*` environment variable overrides.
pub fn apply_env_overrides(settings: &mut LivefolioSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup` (the process environment in
/// production). Invalid values are logged and ignored.
pub fn apply_overrides_from<F>(settings: &mut LivefolioSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("LIVEFOLIO_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("LIVEFOLIO_PORT", 0, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.u64("LIVEFOLIO_HEARTBEAT_INTERVAL_SECS", 1, 3600) {
        settings.server.heartbeat_interval_secs = v;
    }

    // ── Client ──────────────────────────────────────────────────────
    if let Some(v) = env.string("LIVEFOLIO_SERVER_URL") {
        settings.client.server_url = v;
    }
    if let Some(v) = env.u64("LIVEFOLIO_RECONNECT_DELAY_MS", 1, 3_600_000) {
        settings.client.reconnect_delay_ms = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.lowercase_enum("LIVEFOLIO_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.lowercase_enum("LIVEFOLIO_LOG_FORMAT") {
        settings.logging.format = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env readers ─────────────────────────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        let val = self.string(name)?;
        let result = parse_u16_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid u16 env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = self.string(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }

    fn lowercase_enum<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        let val = self.string(name)?;
        let result = serde_json::from_value(Value::String(val.to_lowercase())).ok();
        if result.is_none() {
            warn!(key = name, value = %val, "unrecognized env var value, ignoring");
        }
        result
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::errors::SettingsError;
    use crate::types::{LogLevel, LogOutput};

    fn overrides(pairs: &[(&str, &str)]) -> LivefolioSettings {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        let mut settings = LivefolioSettings::default();
        apply_overrides_from(&mut settings, |name| vars.get(name).cloned());
        settings
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"port": 7878, "host": "127.0.0.1"}});
        let source = serde_json::json!({"server": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "127.0.0.1");
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

    #[test]
    fn merge_new_keys_added() {
        let merged = deep_merge(serde_json::json!({"a": 1}), serde_json::json!({"b": 2}));
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    // ── file layer ──────────────────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let settings = load_file_layer(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings.server.port, 7878);
        assert_eq!(settings.client.reconnect_delay_ms, 5000);
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"port": 9090}, "client": {"reconnectDelayMs": 250}}"#,
        )
        .unwrap();

        let settings = load_file_layer(&path).unwrap();
        assert_eq!(settings.server.port, 9090);
        assert_eq!(settings.client.reconnect_delay_ms, 250);
        assert_eq!(settings.server.heartbeat_interval_secs, 30);
        assert_eq!(settings.client.server_url, "ws://127.0.0.1:7878/ws");
    }

    #[test]
    fn load_logging_modules() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"logging": {"format": "json", "modules": [{"module": "livefolio_client", "level": "debug"}]}}"#,
        )
        .unwrap();

        let settings = load_file_layer(&path).unwrap();
        assert_eq!(settings.logging.format, LogOutput::Json);
        assert_eq!(settings.logging.modules.len(), 1);
        assert_eq!(settings.logging.modules[0].level, LogLevel::Debug);
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();
        assert!(matches!(load_file_layer(&path), Err(SettingsError::Json(_))));
    }

    #[test]
    fn load_rejects_invalid_combination() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"client": {"reconnectDelayMs": 0}}"#).unwrap();
        assert!(matches!(
            load_settings_from_path(&path),
            Err(SettingsError::InvalidValue(_))
        ));
    }

    // ── env overrides ───────────────────────────────────────────────

    #[test]
    fn env_overrides_apply() {
        let settings = overrides(&[
            ("LIVEFOLIO_HOST", "0.0.0.0"),
            ("LIVEFOLIO_PORT", "0"),
            ("LIVEFOLIO_SERVER_URL", "ws://example.test/ws"),
            ("LIVEFOLIO_RECONNECT_DELAY_MS", "1500"),
            ("LIVEFOLIO_HEARTBEAT_INTERVAL_SECS", "10"),
            ("LIVEFOLIO_LOG_LEVEL", "DEBUG"),
            ("LIVEFOLIO_LOG_FORMAT", "json"),
        ]);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 0);
        assert_eq!(settings.server.heartbeat_interval_secs, 10);
        assert_eq!(settings.client.server_url, "ws://example.test/ws");
        assert_eq!(settings.client.reconnect_delay_ms, 1500);
        assert_eq!(settings.logging.level, LogLevel::Debug);
        assert_eq!(settings.logging.format, LogOutput::Json);
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let settings = overrides(&[
            ("LIVEFOLIO_PORT", "99999"),
            ("LIVEFOLIO_RECONNECT_DELAY_MS", "0"),
            ("LIVEFOLIO_LOG_LEVEL", "verbose"),
            ("LIVEFOLIO_HOST", ""),
        ]);
        let defaults = LivefolioSettings::default();
        assert_eq!(settings.server.port, defaults.server.port);
        assert_eq!(settings.server.host, defaults.server.host);
        assert_eq!(settings.client.reconnect_delay_ms, 5000);
        assert_eq!(settings.logging.level, LogLevel::Info);
    }

    // ── parsers ─────────────────────────────────────────────────────

    #[test]
    fn parse_u16_bounds() {
        assert_eq!(parse_u16_range("9090", 1, 65535), Some(9090));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u16_range("99999", 1, 65535), None);
        assert_eq!(parse_u16_range("", 1, 65535), None);
    }

    #[test]
    fn parse_u64_bounds() {
        assert_eq!(parse_u64_range("5000", 1, 3_600_000), Some(5000));
        assert_eq!(parse_u64_range("0", 1, 3_600_000), None);
        assert_eq!(parse_u64_range("abc", 1, 3_600_000), None);
    }
}
