//! Settings loading: compiled defaults, then a JSON file deep-merged over
//! them, then `SWITCHBOARD_*` environment overrides.
//!
//! Merge rules: objects merge per key, arrays and primitives are replaced,
//! and `null` in the file keeps the default.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::SwitchboardSettings;

/// `~/.switchboard/settings.json`.
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".switchboard").join("settings.json")
}

/// Load from the default path with env overrides.
pub fn load_settings() -> Result<SwitchboardSettings> {
    load_settings_from_path(&settings_path())
}

/// Load from `path` with env overrides. A missing file yields defaults;
/// invalid JSON and invalid values are errors.
pub fn load_settings_from_path(path: &Path) -> Result<SwitchboardSettings> {
    load_with(path, &|name| std::env::var(name).ok())
}

fn load_with(path: &Path, env: &dyn Fn(&str) -> Option<String>) -> Result<SwitchboardSettings> {
    let defaults = serde_json::to_value(SwitchboardSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: SwitchboardSettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, env);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of `source` over `target`.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `SWITCHBOARD_*` process environment overrides.
pub fn apply_env_overrides(settings: &mut SwitchboardSettings) {
    apply_overrides(settings, &|name| std::env::var(name).ok());
}

/// Apply overrides read through `env`. Invalid values are logged and skipped.
fn apply_overrides(settings: &mut SwitchboardSettings, env: &dyn Fn(&str) -> Option<String>) {
    let reader = EnvReader { env };

    if let Some(v) = reader.usize("SWITCHBOARD_MAX_MESSAGE_SIZE", 0, usize::MAX) {
        settings.hub.max_message_size = v;
    }
    if let Some(v) = reader.u64("SWITCHBOARD_KEEP_ALIVE_MS", 1, 3_600_000) {
        settings.hub.keep_alive_interval_ms = v;
    }
    if let Some(v) = reader.u64("SWITCHBOARD_CLIENT_TIMEOUT_MS", 1, 3_600_000) {
        settings.hub.client_timeout_interval_ms = v;
    }
    if let Some(v) = reader.u64("SWITCHBOARD_HANDSHAKE_TIMEOUT_MS", 1, 3_600_000) {
        settings.hub.handshake_timeout_ms = v;
    }
    if let Some(v) = reader.usize("SWITCHBOARD_MAX_PARALLEL_INVOCATIONS", 1, 10_000) {
        settings.hub.max_parallel_invocations = v;
    }
    if let Some(v) = reader.bool("SWITCHBOARD_DETAILED_ERRORS") {
        settings.hub.enable_detailed_errors = v;
    }
    if let Some(v) = reader.string("SWITCHBOARD_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = reader.u16("SWITCHBOARD_PORT", 0, u16::MAX) {
        settings.server.port = v;
    }
    if let Some(v) = reader.string("SWITCHBOARD_LOG_LEVEL") {
        settings.logging.level = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a boolean: `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a `u16` within `[min, max]`.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Parse a `u64` within `[min, max]`.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Parse a `usize` within `[min, max]`.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

// ── Env readers ─────────────────────────────────────────────────────────────

struct EnvReader<'a> {
    env: &'a dyn Fn(&str) -> Option<String>,
}

impl EnvReader<'_> {
    fn string(&self, name: &str) -> Option<String> {
        (self.env)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, kind: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let val = (self.env)(name)?;
        let result = parse(&val);
        if result.is_none() {
            warn!(key = name, value = %val, kind, "invalid env var, ignoring");
        }
        result
    }

    fn bool(&self, name: &str) -> Option<bool> {
        self.parsed(name, "bool", parse_bool)
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        self.parsed(name, "u16", |v| parse_u16_range(v, min, max))
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        self.parsed(name, "u64", |v| parse_u64_range(v, min, max))
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        self.parsed(name, "usize", |v| parse_usize_range(v, min, max))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use assert_matches::assert_matches;
    use serde_json::json;
    use std::collections::HashMap;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn write_settings(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = json!({"hub": {"keepAliveIntervalMs": 15000, "maxUploadStreams": 10}});
        let source = json!({"hub": {"keepAliveIntervalMs": 2000}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["hub"]["keepAliveIntervalMs"], 2000);
        assert_eq!(merged["hub"]["maxUploadStreams"], 10);
    }

    #[test]
    fn merge_array_replaces() {
        let merged = deep_merge(
            json!({"supportedProtocols": ["json", "other"]}),
            json!({"supportedProtocols": ["json"]}),
        );
        assert_eq!(merged["supportedProtocols"], json!(["json"]));
    }

    #[test]
    fn merge_null_preserves_target() {
        let merged = deep_merge(json!({"a": 1}), json!({"a": null}));
        assert_eq!(merged["a"], 1);
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let merged = deep_merge(json!({"a": {"b": true}}), json!({"a": 42}));
        assert_eq!(merged["a"], 42);
    }

    // ── loading ─────────────────────────────────────────────────────

    #[test]
    fn missing_file_returns_defaults() {
        let settings = load_with(Path::new("/nonexistent/settings.json"), &no_env).unwrap();
        assert_eq!(settings, SwitchboardSettings::default());
    }

    #[test]
    fn partial_file_overrides() {
        let (_dir, path) = write_settings(
            r#"{"hub": {"maxParallelInvocations": 4}, "server": {"port": 7000}}"#,
        );
        let settings = load_with(&path, &no_env).unwrap();
        assert_eq!(settings.hub.max_parallel_invocations, 4);
        assert_eq!(settings.hub.keep_alive_interval_ms, 15_000);
        assert_eq!(settings.server.port, 7000);
        assert_eq!(settings.server.path, "/hub");
    }

    #[test]
    fn invalid_json_is_error() {
        let (_dir, path) = write_settings("not json");
        assert_matches!(load_with(&path, &no_env), Err(SettingsError::Json(_)));
    }

    #[test]
    fn invalid_value_in_file_is_error() {
        let (_dir, path) = write_settings(r#"{"hub": {"streamBufferCapacity": 0}}"#);
        assert_matches!(
            load_with(&path, &no_env),
            Err(SettingsError::InvalidValue(_))
        );
    }

    #[test]
    fn env_overrides_file() {
        let (_dir, path) = write_settings(r#"{"hub": {"keepAliveIntervalMs": 2000}}"#);
        let vars: HashMap<&str, &str> = HashMap::from([
            ("SWITCHBOARD_KEEP_ALIVE_MS", "500"),
            ("SWITCHBOARD_DETAILED_ERRORS", "yes"),
            ("SWITCHBOARD_MAX_MESSAGE_SIZE", "0"),
            ("SWITCHBOARD_PORT", "0"),
            ("SWITCHBOARD_LOG_LEVEL", "debug"),
        ]);
        let env = |name: &str| vars.get(name).map(|v| (*v).to_string());
        let settings = load_with(&path, &env).unwrap();
        assert_eq!(settings.hub.keep_alive_interval_ms, 500);
        assert!(settings.hub.enable_detailed_errors);
        assert_eq!(settings.hub.message_limit(), None);
        assert_eq!(settings.server.port, 0);
        assert_eq!(settings.logging.level, "debug");
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("SWITCHBOARD_MAX_PARALLEL_INVOCATIONS", "0"),
            ("SWITCHBOARD_CLIENT_TIMEOUT_MS", "soon"),
            ("SWITCHBOARD_DETAILED_ERRORS", "maybe"),
            ("SWITCHBOARD_HOST", ""),
        ]);
        let env = |name: &str| vars.get(name).map(|v| (*v).to_string());
        let mut settings = SwitchboardSettings::default();
        apply_overrides(&mut settings, &env);
        assert_eq!(settings, SwitchboardSettings::default());
    }

    // ── parsing ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for val in ["true", "1", "yes", "ON"] {
            assert_eq!(parse_bool(val), Some(true), "failed for {val}");
        }
        for val in ["false", "0", "no", "Off"] {
            assert_eq!(parse_bool(val), Some(false), "failed for {val}");
        }
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("8080", 1, 65535), Some(8080));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u16_range("99999", 1, 65535), None);
        assert_eq!(parse_u64_range("1000", 1000, 2000), Some(1000));
        assert_eq!(parse_u64_range("abc", 1, 2), None);
        assert_eq!(parse_usize_range("20000", 1, 10_000), None);
    }

    #[test]
    fn settings_path_under_home() {
        let path = settings_path();
        assert!(path.ends_with(".switchboard/settings.json"));
    }
}
