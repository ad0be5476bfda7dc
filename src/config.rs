//! TOML configuration for the client and the subsystem registry
//!
//! The file has three sections: `[mqtt]` (broker and session), `[reconnect]`
//! (backoff policy) and `[runtime]` (the messaging event loop). Only `[mqtt]`
//! is required.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Top-level configuration file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KitConfig {
    pub mqtt: MqttSection,
    #[serde(default)]
    pub reconnect: ReconnectSection,
    #[serde(default)]
    pub runtime: RuntimeSection,
}

/// Broker connection and session settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// Broker URL, `mqtt://host:port` or `mqtts://host:port`
    pub broker_url: String,
    /// Client identifier; a random one is generated when absent
    pub client_id: Option<String>,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_clean_start")]
    pub clean_start: bool,
    /// How long to wait for CONNACK after the transport is up
    #[serde(default = "default_connack_timeout_ms")]
    pub connack_timeout_ms: u64,
    /// Topic filters subscribed after every successful connection
    #[serde(default)]
    pub subscriptions: Vec<String>,
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_clean_start() -> bool {
    true
}

fn default_connack_timeout_ms() -> u64 {
    20_000
}

/// Reconnection backoff settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectSection {
    /// Delays for the first attempts, in milliseconds
    #[serde(default = "default_backoff_pattern_ms")]
    pub backoff_pattern_ms: Vec<u64>,
    /// Delay once the pattern is exhausted
    #[serde(default = "default_sustained_delay_ms")]
    pub sustained_delay_ms: u64,
    /// Give up after this many consecutive failures (unlimited when absent)
    pub max_attempts: Option<u32>,
}

fn default_backoff_pattern_ms() -> Vec<u64> {
    vec![1_000, 2_000, 4_000, 8_000, 16_000]
}

fn default_sustained_delay_ms() -> u64 {
    30_000
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            backoff_pattern_ms: default_backoff_pattern_ms(),
            sustained_delay_ms: default_sustained_delay_ms(),
            max_attempts: None,
        }
    }
}

/// Messaging event loop settings used by `runtime::initialize_with`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeSection {
    #[serde(default = "default_event_loop_threads")]
    pub event_loop_threads: usize,
    #[serde(default = "default_thread_name")]
    pub thread_name: String,
    /// Upper bound on joining event loop threads during clean-up
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

fn default_event_loop_threads() -> usize {
    2
}

fn default_thread_name() -> String {
    "mqtt-event-loop".to_string()
}

fn default_shutdown_timeout_ms() -> u64 {
    5_000
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            event_loop_threads: default_event_loop_threads(),
            thread_name: default_thread_name(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

impl RuntimeSection {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Invalid client ID format: {0}")]
    InvalidClientId(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl KitConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: KitConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(client_id) = &self.mqtt.client_id {
            validate_client_id(client_id)?;
        }

        if self.mqtt.keep_alive_secs != 0 && self.mqtt.keep_alive_secs < 5 {
            return Err(ConfigError::InvalidConfig(format!(
                "keep_alive_secs must be 0 or at least 5, got {}",
                self.mqtt.keep_alive_secs
            )));
        }

        if self.mqtt.connack_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "connack_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.reconnect.sustained_delay_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "sustained_delay_ms must be greater than 0".to_string(),
            ));
        }

        if self.reconnect.max_attempts == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "max_attempts must be greater than 0 or omitted for unlimited".to_string(),
            ));
        }

        if self.runtime.event_loop_threads == 0 {
            return Err(ConfigError::InvalidConfig(
                "event_loop_threads must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Resolve the MQTT username from its environment variable
    pub fn get_mqtt_username(&self) -> Option<String> {
        get_env_var_optional(self.mqtt.username_env.as_ref())
    }

    /// Resolve the MQTT password from its environment variable
    pub fn get_mqtt_password(&self) -> Option<String> {
        get_env_var_optional(self.mqtt.password_env.as_ref())
    }
}

fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
    env_var_name.and_then(|name| std::env::var(name).ok())
}

/// Client identifiers must match `[a-zA-Z0-9._-]+`
pub fn validate_client_id(client_id: &str) -> Result<(), ConfigError> {
    let valid_chars = client_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');

    if client_id.is_empty() || !valid_chars {
        return Err(ConfigError::InvalidClientId(format!(
            "Client ID '{client_id}' must match pattern [a-zA-Z0-9._-]+"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_config() {
        let toml_content = r#"
[mqtt]
broker_url = "mqtts://broker.example.com:8883"
client_id = "sensor-gateway.01"
username_env = "MQTT_USERNAME"
password_env = "MQTT_PASSWORD"
keep_alive_secs = 30
clean_start = false
connack_timeout_ms = 5000
subscriptions = ["sensors/#", "control/+/cmd"]

[reconnect]
backoff_pattern_ms = [100, 200]
sustained_delay_ms = 500
max_attempts = 12

[runtime]
event_loop_threads = 4
thread_name = "gateway-loop"
shutdown_timeout_ms = 1000
"#;

        let config: KitConfig = toml::from_str(toml_content).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.mqtt.client_id.as_deref(), Some("sensor-gateway.01"));
        assert!(!config.mqtt.clean_start);
        assert_eq!(config.mqtt.subscriptions.len(), 2);
        assert_eq!(config.reconnect.backoff_pattern_ms, vec![100, 200]);
        assert_eq!(config.reconnect.max_attempts, Some(12));
        assert_eq!(config.runtime.event_loop_threads, 4);
        assert_eq!(config.runtime.shutdown_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let toml_content = r#"
[mqtt]
broker_url = "mqtt://localhost:1883"
"#;

        let config: KitConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.mqtt.client_id, None);
        assert_eq!(config.mqtt.keep_alive_secs, 60);
        assert!(config.mqtt.clean_start);
        assert_eq!(config.mqtt.connack_timeout_ms, 20_000);
        assert!(config.mqtt.subscriptions.is_empty());
        assert_eq!(config.reconnect, ReconnectSection::default());
        assert_eq!(config.runtime, RuntimeSection::default());
    }

    #[test]
    fn test_invalid_client_id() {
        assert!(validate_client_id("bad id").is_err());
        assert!(validate_client_id("").is_err());
        assert!(validate_client_id("valid-client_123.test").is_ok());
    }

    #[test]
    fn test_short_keep_alive_rejected() {
        let toml_content = r#"
[mqtt]
broker_url = "mqtt://localhost:1883"
keep_alive_secs = 2
"#;

        let config: KitConfig = toml::from_str(toml_content).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_zero_event_loop_threads_rejected() {
        let mut config: KitConfig = toml::from_str(
            r#"
[mqtt]
broker_url = "mqtt://localhost:1883"
"#,
        )
        .unwrap();
        config.runtime.event_loop_threads = 0;

        assert!(config.validate().is_err());
    }
}
