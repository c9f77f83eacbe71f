//! Layered settings resolution.
//!
//! Layers, lowest first: compiled defaults, the JSON settings file (if any),
//! then environment variables. The file is overlaid key by key, so it only
//! needs the values it changes. `null` in the file means "keep the default".

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::NexusSettings;

/// Completion credential.
pub const ENV_COMPLETION_API_KEY: &str = "GROQ_API_KEY";
/// Analysis credential.
pub const ENV_ANALYSIS_API_KEY: &str = "NEO_API_KEY";
/// Bind address.
pub const ENV_HOST: &str = "NEXUS_HOST";
/// Chat/health port.
pub const ENV_HTTP_PORT: &str = "NEXUS_HTTP_PORT";
/// Subscriber port.
pub const ENV_WS_PORT: &str = "NEXUS_WS_PORT";
/// Completion base URL.
pub const ENV_COMPLETION_URL: &str = "NEXUS_COMPLETION_URL";
/// Completion model.
pub const ENV_COMPLETION_MODEL: &str = "NEXUS_COMPLETION_MODEL";
/// Analysis endpoint.
pub const ENV_ANALYSIS_URL: &str = "NEXUS_ANALYSIS_URL";
/// Completion attempt budget.
pub const ENV_MAX_ATTEMPTS: &str = "NEXUS_MAX_ATTEMPTS";
/// Completion retry delay.
pub const ENV_RETRY_BACKOFF_MS: &str = "NEXUS_RETRY_BACKOFF_MS";
/// Background queue depth.
pub const ENV_QUEUE_CAPACITY: &str = "NEXUS_QUEUE_CAPACITY";
/// JSON log output.
pub const ENV_LOG_JSON: &str = "NEXUS_LOG_JSON";
/// Telegram bot token.
pub const ENV_TELEGRAM_BOT_TOKEN: &str = "TELEGRAM_BOT_TOKEN";
/// Public Telegram webhook URL.
pub const ENV_TELEGRAM_WEBHOOK_URL: &str = "TELEGRAM_WEBHOOK_URL";

/// Resolve the default settings file path (`~/.nexus/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".nexus").join("settings.json")
}

/// Load settings from the default path with process env overrides.
pub fn load_settings() -> Result<NexusSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with process env overrides.
pub fn load_settings_from_path(path: &Path) -> Result<NexusSettings> {
    load_settings_with_env(path, |name| std::env::var(name).ok())
}

/// Load settings from a specific path, reading overrides through `env`.
///
/// If the file does not exist, defaults are used. If the file contains
/// invalid JSON, returns an error. Required values are not checked here; see
/// [`NexusSettings::validate`].
pub fn load_settings_with_env(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> Result<NexusSettings> {
    let mut layered = serde_json::to_value(NexusSettings::default())?;

    match std::fs::read_to_string(path) {
        Ok(raw) => {
            debug!(path = %path.display(), "overlaying settings file");
            layered = deep_merge(layered, serde_json::from_str(&raw)?);
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "no settings file, defaults only");
        }
        Err(e) => return Err(e.into()),
    }

    let mut settings: NexusSettings = serde_json::from_value(layered)?;
    apply_env_overrides(&mut settings, env);
    Ok(settings)
}

/// Overlay `overlay` onto `base`.
///
/// Objects merge per key; `null` leaves the base value alone; anything else
/// replaces it wholesale, arrays included.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (key, value) in overlay.into_iter().filter(|(_, v)| !v.is_null()) {
                let merged = match base.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                let _ = base.insert(key, merged);
            }
            Value::Object(base)
        }
        (base, Value::Null) => base,
        (_, overlay) => overlay,
    }
}

/// Overlay environment variables onto `settings`.
///
/// Empty values count as unset. Unparseable or out-of-range values are logged
/// and skipped, leaving the file or default value in place.
pub fn apply_env_overrides(settings: &mut NexusSettings, env: impl Fn(&str) -> Option<String>) {
    let read = |name: &str| env(name).filter(|v| !v.trim().is_empty());

    // ── Credentials ─────────────────────────────────────────────────
    if let Some(v) = read(ENV_COMPLETION_API_KEY) {
        settings.completion.api_key = Some(v);
    }
    if let Some(v) = read(ENV_ANALYSIS_API_KEY) {
        settings.analysis.api_key = Some(v);
    }
    if let Some(v) = read(ENV_TELEGRAM_BOT_TOKEN) {
        settings.telegram.bot_token = Some(v);
    }
    if let Some(v) = read(ENV_TELEGRAM_WEBHOOK_URL) {
        settings.telegram.webhook_url = Some(v);
    }

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read(ENV_HOST) {
        settings.server.host = v;
    }
    if let Some(v) = read(ENV_HTTP_PORT).and_then(|v| checked(ENV_HTTP_PORT, &v, parse_port)) {
        settings.server.http_port = Some(v);
    }
    if let Some(v) = read(ENV_WS_PORT).and_then(|v| checked(ENV_WS_PORT, &v, parse_port)) {
        settings.server.ws_port = Some(v);
    }

    // ── Upstreams ───────────────────────────────────────────────────
    if let Some(v) = read(ENV_COMPLETION_URL) {
        settings.completion.base_url = v;
    }
    if let Some(v) = read(ENV_COMPLETION_MODEL) {
        settings.completion.model = v;
    }
    if let Some(v) = read(ENV_ANALYSIS_URL) {
        settings.analysis.url = v;
    }
    if let Some(v) = read(ENV_MAX_ATTEMPTS).and_then(|v| {
        checked(ENV_MAX_ATTEMPTS, &v, |s| {
            parse_u64_range(s, 1, 10).and_then(|n| u32::try_from(n).ok())
        })
    }) {
        settings.completion.max_attempts = v;
    }
    if let Some(v) = read(ENV_RETRY_BACKOFF_MS)
        .and_then(|v| checked(ENV_RETRY_BACKOFF_MS, &v, |s| parse_u64_range(s, 0, 60_000)))
    {
        settings.completion.retry_backoff_ms = v;
    }

    // ── Dispatch / logging ──────────────────────────────────────────
    if let Some(v) = read(ENV_QUEUE_CAPACITY).and_then(|v| {
        checked(ENV_QUEUE_CAPACITY, &v, |s| {
            parse_u64_range(s, 1, 1_000_000).and_then(|n| usize::try_from(n).ok())
        })
    }) {
        settings.dispatch.queue_capacity = v;
    }
    if let Some(v) = read(ENV_LOG_JSON).and_then(|v| checked(ENV_LOG_JSON, &v, parse_bool)) {
        settings.logging.json = v;
    }
}

/// Lenient boolean: `1`, `true`, `yes`, `on` and their opposites, any case.
pub fn parse_bool(val: &str) -> Option<bool> {
    const TRUTHY: [&str; 4] = ["1", "true", "yes", "on"];
    const FALSY: [&str; 4] = ["0", "false", "no", "off"];
    let val = val.trim();
    if TRUTHY.iter().any(|t| t.eq_ignore_ascii_case(val)) {
        Some(true)
    } else if FALSY.iter().any(|f| f.eq_ignore_ascii_case(val)) {
        Some(false)
    } else {
        None
    }
}

/// Parse a listen port. `0` is accepted and means "pick a free port".
pub fn parse_port(val: &str) -> Option<u16> {
    val.trim().parse().ok()
}

/// Unsigned integer within `min..=max`.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    val.trim()
        .parse::<u64>()
        .ok()
        .filter(|n| (min..=max).contains(n))
}

fn checked<T>(name: &str, val: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
    let parsed = parse(val);
    if parsed.is_none() {
        warn!(var = name, value = %val, "unusable environment override ignored");
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn no_env() -> impl Fn(&str) -> Option<String> {
        |_| None
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn overlay_replaces_only_named_keys() {
        let target = serde_json::json!({"server": {"host": "a", "httpPort": 1}});
        let source = serde_json::json!({"server": {"host": "b"}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["host"], "b");
        assert_eq!(merged["server"]["httpPort"], 1);
    }

    #[test]
    fn null_keeps_base_value() {
        let target = serde_json::json!({"a": 1});
        let source = serde_json::json!({"a": null});
        assert_eq!(deep_merge(target, source)["a"], 1);
    }

    #[test]
    fn arrays_are_replaced_not_merged() {
        let target = serde_json::json!({"a": [1, 2, 3]});
        let source = serde_json::json!({"a": [4]});
        assert_eq!(deep_merge(target, source)["a"], serde_json::json!([4]));
    }

    #[test]
    fn unknown_keys_are_added() {
        let target = serde_json::json!({});
        let source = serde_json::json!({"a": {"b": true}});
        assert_eq!(deep_merge(target, source)["a"]["b"], true);
    }

    // ── load_settings_with_env ──────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let settings =
            load_settings_with_env(Path::new("/nonexistent/settings.json"), no_env()).unwrap();
        assert_eq!(settings.server.host, "0.0.0.0");
        assert!(settings.server.http_port.is_none());
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"httpPort": 9000, "wsPort": 9001}, "completion": {"maxAttempts": 5}}"#,
        )
        .unwrap();

        let settings = load_settings_with_env(&path, no_env()).unwrap();
        assert_eq!(settings.server.http_port, Some(9000));
        assert_eq!(settings.server.ws_port, Some(9001));
        assert_eq!(settings.completion.max_attempts, 5);
        assert_eq!(settings.completion.retry_backoff_ms, 1000);
        assert_eq!(settings.dispatch.queue_capacity, 256);
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = load_settings_with_env(&path, no_env()).unwrap_err();
        assert!(matches!(err, crate::SettingsError::Json(_)));
    }

    #[test]
    fn null_file_means_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "null").unwrap();

        let settings = load_settings_with_env(&path, no_env()).unwrap();
        assert_eq!(settings.completion.model, "mixtral-8x7b-32768");
    }

    #[test]
    fn env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"httpPort": 9000}}"#).unwrap();

        let env = env_from(&[
            ("NEXUS_HTTP_PORT", "8000"),
            ("NEXUS_WS_PORT", "8001"),
            ("GROQ_API_KEY", "gsk"),
            ("NEO_API_KEY", "neo"),
        ]);
        let settings = load_settings_with_env(&path, env).unwrap();
        assert_eq!(settings.server.http_port, Some(8000));
        assert_eq!(settings.server.ws_port, Some(8001));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn env_only_configuration_validates() {
        let env = env_from(&[
            ("GROQ_API_KEY", "gsk"),
            ("NEO_API_KEY", "neo"),
            ("NEXUS_HTTP_PORT", "8000"),
            ("NEXUS_WS_PORT", "8001"),
            ("NEXUS_COMPLETION_URL", "http://127.0.0.1:1234/v1"),
            ("NEXUS_ANALYSIS_URL", "http://127.0.0.1:1235/analyze"),
            ("NEXUS_MAX_ATTEMPTS", "5"),
            ("NEXUS_RETRY_BACKOFF_MS", "10"),
            ("NEXUS_QUEUE_CAPACITY", "16"),
            ("NEXUS_LOG_JSON", "yes"),
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
            ("TELEGRAM_WEBHOOK_URL", "https://relay.example/getmemore"),
        ]);
        let settings = load_settings_with_env(Path::new("/nonexistent"), env).unwrap();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.completion_api_key().unwrap(), "gsk");
        assert_eq!(settings.analysis_api_key().unwrap(), "neo");
        assert_eq!(settings.completion.base_url, "http://127.0.0.1:1234/v1");
        assert_eq!(settings.analysis.url, "http://127.0.0.1:1235/analyze");
        assert_eq!(settings.completion.max_attempts, 5);
        assert_eq!(settings.completion.retry_backoff_ms, 10);
        assert_eq!(settings.dispatch.queue_capacity, 16);
        assert!(settings.logging.json);
        assert_eq!(settings.telegram.bot_token(), Some("123:abc"));
        assert_eq!(
            settings.telegram.webhook_url(),
            Some("https://relay.example/getmemore")
        );
    }

    #[test]
    fn invalid_env_values_ignored() {
        let env = env_from(&[
            ("NEXUS_HTTP_PORT", "eighty"),
            ("NEXUS_MAX_ATTEMPTS", "0"),
            ("NEXUS_LOG_JSON", "maybe"),
        ]);
        let settings = load_settings_with_env(Path::new("/nonexistent"), env).unwrap();
        assert!(settings.server.http_port.is_none());
        assert_eq!(settings.completion.max_attempts, 3);
        assert!(!settings.logging.json);
    }

    #[test]
    fn empty_env_values_ignored() {
        let env = env_from(&[("GROQ_API_KEY", ""), ("NEXUS_HOST", "  ")]);
        let settings = load_settings_with_env(Path::new("/nonexistent"), env).unwrap();
        assert!(settings.completion.api_key.is_none());
        assert_eq!(settings.server.host, "0.0.0.0");
    }

    // ── parsers ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for v in ["true", "1", "YES", "on"] {
            assert_eq!(parse_bool(v), Some(true));
        }
        for v in ["false", "0", "No", "off"] {
            assert_eq!(parse_bool(v), Some(false));
        }
        assert_eq!(parse_bool("2"), None);
    }

    #[test]
    fn parse_port_bounds() {
        assert_eq!(parse_port("0"), Some(0));
        assert_eq!(parse_port("65535"), Some(65535));
        assert_eq!(parse_port("65536"), None);
        assert_eq!(parse_port("-1"), None);
    }

    #[test]
    fn parse_u64_range_bounds() {
        assert_eq!(parse_u64_range("1", 1, 10), Some(1));
        assert_eq!(parse_u64_range("10", 1, 10), Some(10));
        assert_eq!(parse_u64_range("11", 1, 10), None);
    }
}
