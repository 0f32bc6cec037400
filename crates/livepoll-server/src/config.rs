//! Server configuration.
//!
//! Loading flow:
//! 1. Start with [`ServerConfig::default()`]
//! 2. If a JSON file is given and exists, deep-merge its values over the defaults
//! 3. Apply `LIVEPOLL_*` environment overrides (highest priority)
//!
//! Null values in the file are skipped. Invalid environment values are
//! ignored with a warning.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

/// Configuration for the poll server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind (default `"0.0.0.0"`).
    pub host: String,
    /// Port to bind; `0` picks a free port.
    pub port: u16,
    /// Outbound frames buffered per connection before new ones are dropped.
    pub max_send_queue: usize,
    pub heartbeat_interval_secs: u64,
    /// A client with no pong for this long is dropped.
    pub client_timeout_secs: u64,
    /// Capacity of the session command channel.
    pub command_buffer: usize,
    pub cors_permissive: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3001,
            max_send_queue: 256,
            heartbeat_interval_secs: 30,
            client_timeout_secs: 90,
            command_buffer: 1024,
            cors_permissive: true,
        }
    }
}

impl ServerConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_secs)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Reject values that would stall the server.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_send_queue == 0 {
            return Err(ConfigError::InvalidValue("max_send_queue must be > 0".into()));
        }
        if self.command_buffer == 0 {
            return Err(ConfigError::InvalidValue("command_buffer must be > 0".into()));
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "heartbeat_interval_secs must be > 0".into(),
            ));
        }
        if self.client_timeout_secs <= self.heartbeat_interval_secs {
            return Err(ConfigError::InvalidValue(
                "client_timeout_secs must exceed heartbeat_interval_secs".into(),
            ));
        }
        Ok(())
    }
}

/// Load config from an optional JSON file, then apply env overrides.
pub fn load_config(path: Option<&Path>) -> Result<ServerConfig, ConfigError> {
    let defaults = serde_json::to_value(ServerConfig::default())?;

    let merged = match path {
        Some(path) if path.exists() => {
            debug!(?path, "loading config from file");
            let content = std::fs::read_to_string(path)?;
            let user: Value = serde_json::from_str(&content)?;
            deep_merge(defaults, user)
        }
        Some(path) => {
            debug!(?path, "config file not found, using defaults");
            defaults
        }
        None => defaults,
    };

    let mut config: ServerConfig = serde_json::from_value(merged)?;
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    config.validate()?;
    Ok(config)
}

/// Objects merge per key, everything else is replaced, nulls are skipped.
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

/// Apply `LIVEPOLL_*` overrides read through `lookup`.
pub fn apply_env_overrides(config: &mut ServerConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("LIVEPOLL_HOST").filter(|v| !v.is_empty()) {
        config.host = v;
    }
    if let Some(v) = read_u64(&lookup, "LIVEPOLL_PORT", 0, u64::from(u16::MAX)) {
        config.port = v as u16;
    }
    if let Some(v) = read_u64(&lookup, "LIVEPOLL_MAX_SEND_QUEUE", 1, 65_536) {
        config.max_send_queue = v as usize;
    }
    if let Some(v) = read_u64(&lookup, "LIVEPOLL_HEARTBEAT_SECS", 1, 3_600) {
        config.heartbeat_interval_secs = v;
    }
    if let Some(v) = read_u64(&lookup, "LIVEPOLL_CLIENT_TIMEOUT_SECS", 2, 86_400) {
        config.client_timeout_secs = v;
    }
}

/// Parse a string as a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

fn read_u64(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    min: u64,
    max: u64,
) -> Option<u64> {
    let val = lookup(name)?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid numeric env var, ignoring");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.bind_addr(), "0.0.0.0:3001");
        assert_eq!(cfg.max_send_queue, 256);
        assert_eq!(cfg.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(cfg.client_timeout(), Duration::from_secs(90));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: ServerConfig = serde_json::from_str(r#"{"port": 4000}"#).unwrap();
        assert_eq!(cfg.port, 4000);
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.command_buffer, 1024);
    }

    #[test]
    fn deep_merge_skips_nulls_and_replaces_scalars() {
        let merged = deep_merge(
            json!({"host": "0.0.0.0", "port": 3001, "nested": {"a": 1, "b": 2}}),
            json!({"host": null, "port": 8080, "nested": {"b": 3}}),
        );
        assert_eq!(merged, json!({"host": "0.0.0.0", "port": 8080, "nested": {"a": 1, "b": 3}}));
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = ServerConfig::default();
        apply_env_overrides(
            &mut cfg,
            env(&[
                ("LIVEPOLL_HOST", "127.0.0.1"),
                ("LIVEPOLL_PORT", "9000"),
                ("LIVEPOLL_MAX_SEND_QUEUE", "16"),
                ("LIVEPOLL_HEARTBEAT_SECS", "5"),
                ("LIVEPOLL_CLIENT_TIMEOUT_SECS", "20"),
            ]),
        );
        assert_eq!(cfg.bind_addr(), "127.0.0.1:9000");
        assert_eq!(cfg.max_send_queue, 16);
        assert_eq!(cfg.heartbeat_interval_secs, 5);
        assert_eq!(cfg.client_timeout_secs, 20);
    }

    #[test]
    fn invalid_env_values_ignored() {
        let mut cfg = ServerConfig::default();
        apply_env_overrides(
            &mut cfg,
            env(&[
                ("LIVEPOLL_PORT", "99999"),
                ("LIVEPOLL_MAX_SEND_QUEUE", "zero"),
                ("LIVEPOLL_HOST", ""),
            ]),
        );
        assert_eq!(cfg, ServerConfig::default());
    }

    #[test]
    fn parse_range_bounds() {
        assert_eq!(parse_u64_range("1", 1, 10), Some(1));
        assert_eq!(parse_u64_range(" 10 ", 1, 10), Some(10));
        assert_eq!(parse_u64_range("11", 1, 10), None);
        assert_eq!(parse_u64_range("-1", 0, 10), None);
    }

    #[test]
    fn validate_rejects_stalling_values() {
        let cfg = ServerConfig {
            max_send_queue: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidValue(_))));

        let cfg = ServerConfig {
            heartbeat_interval_secs: 60,
            client_timeout_secs: 30,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn load_from_file_merges_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("livepoll.json");
        std::fs::write(&path, r#"{"port": 0, "max_send_queue": 8, "host": null}"#).unwrap();

        let cfg = load_config(Some(&path)).unwrap();
        assert_eq!(cfg.max_send_queue, 8);
        assert_eq!(cfg.command_buffer, 1024);
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(Some(&dir.path().join("absent.json"))).unwrap();
        assert_eq!(cfg.max_send_queue, ServerConfig::default().max_send_queue);
    }

    #[test]
    fn malformed_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(load_config(Some(&path)), Err(ConfigError::Json(_))));
    }
}
