//! Configuration loading and validation tests
//!
//! Tests focus on BEHAVIOR of configuration loading, validation, and error handling.
//! We test observable outcomes, not implementation details of TOML parsing.

use mqttkit::config::{ConfigError, KitConfig};
use mqttkit::mqtt::ClientOptions;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "{content}").unwrap();
    temp_file
}

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let temp_file = write_config(
        r#"
[mqtt]
broker_url = "mqtt://localhost:1883"
client_id = "gateway-01"
subscriptions = ["sensors/#"]

[reconnect]
backoff_pattern_ms = [50, 100]
sustained_delay_ms = 250
max_attempts = 3
"#,
    );

    let config = KitConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.mqtt.broker_url, "mqtt://localhost:1883");
    assert_eq!(config.mqtt.client_id.as_deref(), Some("gateway-01"));
    assert_eq!(config.mqtt.subscriptions, vec!["sensors/#"]);
    assert_eq!(config.reconnect.backoff_pattern_ms, vec![50, 100]);
    assert_eq!(config.reconnect.max_attempts, Some(3));
}

#[test]
fn test_config_applies_runtime_defaults_when_not_specified() {
    let temp_file = write_config(
        r#"
[mqtt]
broker_url = "mqtts://broker.example.com"
"#,
    );

    let config = KitConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.runtime.event_loop_threads, 2);
    assert_eq!(config.runtime.thread_name, "mqtt-event-loop");
    assert_eq!(config.runtime.shutdown_timeout(), Duration::from_secs(5));
}

#[test]
fn test_config_fails_on_missing_file() {
    let result = KitConfig::load_from_file(Path::new("/nonexistent/mqttkit.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_config_fails_on_invalid_toml() {
    let temp_file = write_config("[mqtt\nbroker_url = ");
    let result = KitConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_config_fails_on_missing_mqtt_section() {
    let temp_file = write_config(
        r#"
[runtime]
event_loop_threads = 1
"#,
    );
    let result = KitConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_config_rejects_invalid_client_id() {
    let temp_file = write_config(
        r#"
[mqtt]
broker_url = "mqtt://localhost:1883"
client_id = "has spaces"
"#,
    );
    let result = KitConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::InvalidClientId(_))));
}

#[test]
fn test_config_rejects_zero_max_attempts() {
    let temp_file = write_config(
        r#"
[mqtt]
broker_url = "mqtt://localhost:1883"

[reconnect]
max_attempts = 0
"#,
    );
    let result = KitConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
}

#[test]
fn test_loaded_config_becomes_client_options() {
    let temp_file = write_config(
        r#"
[mqtt]
broker_url = "mqtts://broker.example.com:9883"
client_id = "gateway-02"
keep_alive_secs = 0
clean_start = false
connack_timeout_ms = 1500
subscriptions = ["a/b", "c/#"]

[reconnect]
backoff_pattern_ms = [10]
sustained_delay_ms = 20
max_attempts = 4
"#,
    );

    let config = KitConfig::load_from_file(temp_file.path()).unwrap();
    let options = ClientOptions::from_config(&config).unwrap();
    let settings = options.settings();

    assert_eq!(settings.host_name, "broker.example.com");
    assert_eq!(settings.port, 9883);
    assert!(settings.tls);
    assert_eq!(settings.client_id, "gateway-02");
    assert_eq!(settings.keep_alive, Duration::ZERO);
    assert!(!settings.clean_start);
    assert_eq!(settings.connack_timeout, Duration::from_millis(1500));
    assert_eq!(settings.subscriptions, vec!["a/b", "c/#"]);
    assert_eq!(settings.reconnect.max_attempts, Some(4));
    assert_eq!(settings.reconnect.calculate_backoff_delay(1), 10);
    assert_eq!(settings.reconnect.calculate_backoff_delay(2), 20);
    assert_eq!(settings.credentials, None);
}

#[test]
fn test_config_round_trips_through_pretty_toml() {
    let temp_file = write_config(
        r#"
[mqtt]
broker_url = "mqtt://localhost:1883"
"#,
    );
    let config = KitConfig::load_from_file(temp_file.path()).unwrap();

    let rendered = toml::to_string_pretty(&config).unwrap();
    let reparsed: KitConfig = toml::from_str(&rendered).unwrap();
    assert_eq!(reparsed, config);
}
