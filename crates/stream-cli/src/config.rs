//! Client configuration.
//!
//! Configuration can be loaded from:
//! - TOML configuration file (`--config <path>` or a default location)
//! - Environment variables (`PULSE_STREAM_KIND`, `PULSE_STREAM_ADDRESS`),
//!   which override the file

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tenvis_stream_core::SessionConfig;
use toml::{Table, Value};

/// Default file locations, in lookup order.
const CONFIG_PATHS: [&str; 3] = [
    "pulse-stream.toml",
    "/etc/pulse/pulse-stream.toml",
    "~/.config/pulse/pulse-stream.toml",
];

const ENV_KIND: &str = "PULSE_STREAM_KIND";
const ENV_ADDRESS: &str = "PULSE_STREAM_ADDRESS";

/// Client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Session to open.
    pub session: SessionConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable the Prometheus exporter.
    #[serde(default)]
    pub enabled: bool,

    /// Exporter port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, or the first default location that
    /// exists, then apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be read or parsed, or if no
    /// transport kind and address are configured anywhere.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let table = match path {
            Some(path) => read_table(path)?,
            None => {
                let found = CONFIG_PATHS
                    .iter()
                    .map(|path| shellexpand::tilde(path).into_owned())
                    .find(|path| Path::new(path).exists());
                match found {
                    Some(path) => read_table(Path::new(&path))?,
                    None => Table::new(),
                }
            }
        };

        Self::from_table(table, |key| std::env::var(key).ok())
    }

    /// Build from a parsed document, with `env` supplying overrides.
    fn from_table(mut table: Table, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let session = table
            .entry("session")
            .or_insert(Value::Table(Table::new()));
        let Value::Table(session) = session else {
            anyhow::bail!("[session] must be a table");
        };
        if let Some(kind) = env(ENV_KIND) {
            session.insert("kind".into(), Value::String(kind));
        }
        if let Some(address) = env(ENV_ADDRESS) {
            session.insert("address".into(), Value::String(address));
        }

        let config: Config = Value::Table(table).try_into().with_context(|| {
            format!("Invalid configuration (set session.kind and session.address, or {ENV_KIND} and {ENV_ADDRESS})")
        })?;
        config
            .session
            .validate()
            .context("Invalid session configuration")?;
        Ok(config)
    }
}

fn read_table(path: &Path) -> Result<Table> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    contents
        .parse::<Table>()
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenvis_stream_core::{HttpMethod, TransportKind};

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            [session]
            kind = "http"
            address = "https://example.com/feed"
            buffer_limit = 50

            [session.http]
            method = "POST"
            body = '{"subscribe":"quotes"}'

            [metrics]
            enabled = true
        "#;

        let config = Config::from_table(toml_str.parse().unwrap(), no_env).unwrap();
        assert_eq!(config.session.kind, TransportKind::Http);
        assert_eq!(config.session.buffer_limit, 50);
        assert_eq!(config.session.http.method, HttpMethod::Post);
        assert!(config.session.auto_reconnect);
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.port, 9090);
    }

    #[test]
    fn test_env_overrides_file() {
        let toml_str = r#"
            [session]
            kind = "sse"
            address = "https://example.com/events"
        "#;
        let env = |key: &str| match key {
            ENV_KIND => Some("long-polling".to_string()),
            _ => None,
        };

        let config = Config::from_table(toml_str.parse().unwrap(), env).unwrap();
        assert_eq!(config.session.kind, TransportKind::LongPolling);
        assert_eq!(config.session.address, "https://example.com/events");
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn test_env_only() {
        let env = |key: &str| match key {
            ENV_KIND => Some("websocket".to_string()),
            ENV_ADDRESS => Some("ws://127.0.0.1:8080/ws".to_string()),
            _ => None,
        };

        let config = Config::from_table(Table::new(), env).unwrap();
        assert_eq!(config.session.kind, TransportKind::Websocket);
    }

    #[test]
    fn test_missing_session_is_an_error() {
        assert!(Config::from_table(Table::new(), no_env).is_err());
    }

    #[test]
    fn test_unknown_kind_is_an_error() {
        let env = |key: &str| match key {
            ENV_KIND => Some("smoke-signals".to_string()),
            ENV_ADDRESS => Some("https://example.com".to_string()),
            _ => None,
        };
        assert!(Config::from_table(Table::new(), env).is_err());
    }
}
