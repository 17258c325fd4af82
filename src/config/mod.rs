//! Typed configuration from environment variables or TOML.
//!
//! Loads once at startup, fails fast on malformed values.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Settings for a single dispatcher instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Name given to the worker thread.
    pub thread_name: String,
    /// Maximum queued items. `None` means unbounded.
    pub capacity: Option<usize>,
    /// Upper bound on a shutdown drain, in milliseconds. `None` waits forever.
    pub drain_timeout_ms: Option<u64>,
}

impl DispatcherConfig {
    /// Reject settings the dispatcher cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.thread_name.contains('\0') {
            return Err(Error::Config(format!(
                "thread name {:?} contains a NUL byte",
                self.thread_name
            )));
        }
        if self.capacity == Some(0) {
            return Err(Error::Config(
                "queue capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn drain_timeout(&self) -> Option<Duration> {
        self.drain_timeout_ms.map(Duration::from_millis)
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            thread_name: "serialq-dispatcher".to_string(),
            capacity: None,
            drain_timeout_ms: None,
        }
    }
}

/// Process-level configuration for the `serialq` binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub otel_endpoint: Option<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let defaults = DispatcherConfig::default();
        let config = Self {
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| default_log_level()),
            dispatcher: DispatcherConfig {
                thread_name: std::env::var("SERIALQ_THREAD_NAME")
                    .unwrap_or(defaults.thread_name),
                capacity: parsed_var("SERIALQ_QUEUE_CAPACITY")?,
                drain_timeout_ms: parsed_var("SERIALQ_DRAIN_TIMEOUT_MS")?,
            },
        };
        config.dispatcher.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| Error::Config(format!("bad config: {e}")))?;
        config.dispatcher.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn load_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read config {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Render as TOML, e.g. for `serialq config`.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(format!("cannot render config: {e}")))
    }
}

fn parsed_var<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("invalid value for {name}: {raw:?} ({e})"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_fills_missing_fields_with_defaults() {
        let config = Config::from_toml_str(
            r#"
            [dispatcher]
            capacity = 128
            "#,
        )
        .unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.dispatcher.capacity, Some(128));
        assert_eq!(config.dispatcher.thread_name, "serialq-dispatcher");
        assert_eq!(config.dispatcher.drain_timeout(), None);
    }

    #[test]
    fn toml_rejects_wrong_types() {
        let err = Config::from_toml_str("[dispatcher]\ncapacity = \"lots\"\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let err = Config::from_toml_str("[dispatcher]\ncapacity = 0\n").unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("capacity")));
    }

    #[test]
    fn nul_in_thread_name_is_rejected() {
        let err = DispatcherConfig::default()
            .with_thread_name("bad\0name")
            .validate()
            .unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("NUL")));
        assert!(DispatcherConfig::default().validate().is_ok());
    }

    #[test]
    fn rendered_toml_parses_back() {
        let config = Config {
            otel_endpoint: Some("http://localhost:4317".to_string()),
            log_level: "debug".to_string(),
            dispatcher: DispatcherConfig::default().with_capacity(8),
        };
        let rendered = config.to_toml_string().unwrap();
        assert_eq!(Config::from_toml_str(&rendered).unwrap(), config);
    }
}
