//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`PulseSettings::default()`]
//! 2. If `~/.pulse/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `PULSE_*` environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use pulse_core::TrackingConsent;
use secrecy::SecretString;
use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::{pulse_home, PulseSettings, UploadFrequency};

/// Resolve the path to the settings file (`~/.pulse/settings.json`).
pub fn settings_path() -> PathBuf {
    pulse_home().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<PulseSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<PulseSettings> {
    let defaults = serde_json::to_value(PulseSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: PulseSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
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

/// Reject settings that would make the pipeline misbehave.
pub fn validate(settings: &PulseSettings) -> Result<()> {
    let rates = [
        ("rum.sessionSampleRate", settings.rum.session_sample_rate),
        ("rum.telemetrySampleRate", settings.rum.telemetry_sample_rate),
        (
            "rum.telemetryConfigurationSampleRate",
            settings.rum.telemetry_configuration_sample_rate,
        ),
    ];
    for (name, rate) in rates {
        if !(0.0..=100.0).contains(&rate) {
            return Err(SettingsError::InvalidValue(format!(
                "{name} must be within 0..=100, got {rate}"
            )));
        }
    }
    let p = &settings.persistence;
    if p.max_item_bytes > p.max_batch_bytes {
        return Err(SettingsError::InvalidValue(format!(
            "persistence.maxItemBytes ({}) exceeds maxBatchBytes ({})",
            p.max_item_bytes, p.max_batch_bytes
        )));
    }
    if p.max_items_per_batch == 0 {
        return Err(SettingsError::InvalidValue(
            "persistence.maxItemsPerBatch must be positive".into(),
        ));
    }
    Ok(())
}

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are logged and ignored.
pub fn apply_env_overrides(settings: &mut PulseSettings) {
    // ── Identity ────────────────────────────────────────────────────
    if let Some(v) = read_env_string("PULSE_CLIENT_TOKEN") {
        settings.identity.client_token = Some(SecretString::from(v));
    }
    if let Some(v) = read_env_string("PULSE_ENV") {
        settings.identity.env = v;
    }
    if let Some(v) = read_env_string("PULSE_SERVICE") {
        settings.identity.service = Some(v);
    }
    if let Some(v) = read_env_string("PULSE_VERSION") {
        settings.identity.version = v;
    }
    if let Some(v) = read_env_string("PULSE_SITE") {
        settings.identity.site = v;
    }
    if let Some(v) = read_env_string("PULSE_APPLICATION_ID") {
        settings.identity.application_id = Some(v);
    }

    // ── RUM ─────────────────────────────────────────────────────────
    if let Some(v) = read_env_rate("PULSE_SESSION_SAMPLE_RATE") {
        settings.rum.session_sample_rate = v;
    }
    if let Some(v) = read_env_rate("PULSE_TELEMETRY_SAMPLE_RATE") {
        settings.rum.telemetry_sample_rate = v;
    }
    if let Some(v) = read_env_bool("PULSE_TRACK_BACKGROUND_EVENTS") {
        settings.rum.track_background_events = v;
    }
    if let Some(v) = read_env_bool("PULSE_TRACK_FRUSTRATIONS") {
        settings.rum.track_frustrations = v;
    }
    if let Some(v) = read_env_u64("PULSE_ACTION_INACTIVITY_MS", 1, 60_000) {
        settings.rum.action_inactivity_ms = v;
    }
    if let Some(v) = read_env_u64("PULSE_ACTION_MAX_DURATION_MS", 1, 600_000) {
        settings.rum.action_max_duration_ms = v;
    }

    // ── Persistence ─────────────────────────────────────────────────
    if let Some(v) = read_env_string("PULSE_STORAGE_DIR") {
        settings.persistence.storage_dir = Some(v);
    }
    if let Some(v) = read_env_string("PULSE_TRACKING_CONSENT") {
        match parse_consent(&v) {
            Some(consent) => settings.persistence.tracking_consent = consent,
            None => tracing::warn!(key = "PULSE_TRACKING_CONSENT", value = %v, "invalid consent env var, ignoring"),
        }
    }

    // ── Upload ──────────────────────────────────────────────────────
    if let Some(v) = read_env_string("PULSE_UPLOAD_FREQUENCY") {
        match UploadFrequency::parse(&v) {
            Some(freq) => settings.upload.frequency = freq,
            None => tracing::warn!(key = "PULSE_UPLOAD_FREQUENCY", value = %v, "invalid frequency env var, ignoring"),
        }
    }
    if let Some(v) = read_env_u64("PULSE_DRAIN_TIMEOUT_MS", 0, 600_000) {
        settings.upload.drain_timeout_ms = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read_env_string("PULSE_LOG_LEVEL") {
        settings.logging.level = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Percentage in `0..=100`.
pub fn parse_rate(val: &str) -> Option<f32> {
    let n: f32 = val.parse().ok()?;
    (0.0..=100.0).contains(&n).then_some(n)
}

pub fn parse_consent(val: &str) -> Option<TrackingConsent> {
    match val.to_lowercase().as_str() {
        "granted" => Some(TrackingConsent::Granted),
        "not_granted" | "notgranted" => Some(TrackingConsent::NotGranted),
        "pending" => Some(TrackingConsent::Pending),
        _ => None,
    }
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_rate(name: &str) -> Option<f32> {
    let val = std::env::var(name).ok()?;
    let result = parse_rate(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid sample rate env var, ignoring");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"rum": {"a": 1, "b": 2}});
        let source = serde_json::json!({"rum": {"a": 10}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["rum"]["a"], 10);
        assert_eq!(merged["rum"]["b"], 2);
    }

    #[test]
    fn merge_skips_nulls() {
        let target = serde_json::json!({"a": 1});
        let source = serde_json::json!({"a": null});
        assert_eq!(deep_merge(target, source)["a"], 1);
    }

    #[test]
    fn merge_replaces_arrays() {
        let target = serde_json::json!({"a": [1, 2, 3]});
        let source = serde_json::json!({"a": [4]});
        assert_eq!(deep_merge(target, source)["a"], serde_json::json!([4]));
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings_from_path(&dir.path().join("nope.json")).unwrap();
        assert_eq!(settings.rum.action_max_duration_ms, 5_000);
    }

    #[test]
    fn file_values_are_merged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let mut f = std::fs::File::create(&path).unwrap();
        write!(
            f,
            r#"{{"rum": {{"actionInactivityMs": 250, "sessionMaxEvents": 1000}}, "upload": {{"frequency": "frequent"}}}}"#
        )
        .unwrap();
        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.rum.action_inactivity_ms, 250);
        assert_eq!(settings.rum.session_max_events, Some(1000));
        assert_eq!(settings.rum.action_max_duration_ms, 5_000);
        assert_eq!(settings.upload.frequency, UploadFrequency::Frequent);
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            load_settings_from_path(&path),
            Err(SettingsError::Json(_))
        ));
    }

    #[test]
    fn out_of_range_rate_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"rum": {"sessionSampleRate": 140}}"#).unwrap();
        assert!(matches!(
            load_settings_from_path(&path),
            Err(SettingsError::InvalidValue(_))
        ));
    }

    #[test]
    fn item_larger_than_batch_is_rejected() {
        let mut settings = PulseSettings::default();
        settings.persistence.max_item_bytes = settings.persistence.max_batch_bytes + 1;
        assert!(validate(&settings).is_err());
    }

    #[test]
    fn parse_helpers() {
        assert_eq!(parse_bool("YES"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
        assert_eq!(parse_u64_range("42", 1, 100), Some(42));
        assert_eq!(parse_u64_range("0", 1, 100), None);
        assert_eq!(parse_rate("12.5"), Some(12.5));
        assert_eq!(parse_rate("101"), None);
        assert_eq!(parse_consent("NOT_GRANTED"), Some(TrackingConsent::NotGranted));
        assert_eq!(parse_consent("later"), None);
    }
}
