//! Client construction options
//!
//! [`ClientOptions`] is an immutable snapshot handed to `Mqtt5Client::new`.
//! Its connection settings are copied into the engine's options; its
//! callbacks are moved into the callback cell. Nothing of it is kept after
//! construction.

use super::callbacks::ClientCallbacks;
use super::lifecycle::LifecycleEvent;
use super::packets::PublishPacket;
use crate::config::{ConfigError, KitConfig};
use crate::native::reconnect::ReconnectConfig;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use url::Url;
use uuid::Uuid;

pub type OnPublishReceived = Arc<dyn Fn(&PublishPacket) + Send + Sync>;
pub type OnLifecycleEvent = Arc<dyn Fn(&LifecycleEvent) + Send + Sync>;
pub type OnShutdownComplete = Arc<dyn Fn() + Send + Sync>;

/// Username and password for CONNECT
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Everything the engine needs to connect; no callbacks
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSettings {
    pub host_name: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive: Duration,
    pub clean_start: bool,
    pub credentials: Option<Credentials>,
    pub tls: bool,
    pub connack_timeout: Duration,
    pub reconnect: ReconnectConfig,
    /// Topic filters subscribed after every successful connection
    pub subscriptions: Vec<String>,
}

/// Construction options for an MQTT 5 client
#[derive(Clone)]
pub struct ClientOptions {
    settings: ConnectionSettings,
    callbacks: ClientCallbacks,
}

fn generated_client_id() -> String {
    format!("mqttkit-{}", Uuid::new_v4().simple())
}

impl ClientOptions {
    /// Options for a plain-TCP broker with a generated client ID
    pub fn new(host_name: impl Into<String>, port: u16) -> Self {
        Self {
            settings: ConnectionSettings {
                host_name: host_name.into(),
                port,
                client_id: generated_client_id(),
                keep_alive: Duration::from_secs(60),
                clean_start: true,
                credentials: None,
                tls: false,
                connack_timeout: Duration::from_secs(20),
                reconnect: ReconnectConfig::default(),
                subscriptions: Vec::new(),
            },
            callbacks: ClientCallbacks::default(),
        }
    }

    /// Build options from a loaded configuration file
    ///
    /// Credentials are read from the configured environment variables now;
    /// later changes to the environment are not observed.
    pub fn from_config(config: &KitConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let mqtt = &config.mqtt;

        let url = Url::parse(&mqtt.broker_url)
            .map_err(|_| ConfigError::InvalidBrokerUrl(mqtt.broker_url.clone()))?;
        let tls = match url.scheme() {
            "mqtt" | "tcp" => false,
            "mqtts" | "ssl" => true,
            _ => return Err(ConfigError::InvalidBrokerUrl(mqtt.broker_url.clone())),
        };
        let host = url
            .host_str()
            .ok_or_else(|| ConfigError::InvalidBrokerUrl(mqtt.broker_url.clone()))?;
        let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

        let mut options = Self::new(host, port)
            .with_tls(tls)
            .with_keep_alive(Duration::from_secs(mqtt.keep_alive_secs))
            .with_clean_start(mqtt.clean_start)
            .with_connack_timeout(Duration::from_millis(mqtt.connack_timeout_ms))
            .with_reconnect(ReconnectConfig::from(&config.reconnect));

        if let Some(client_id) = &mqtt.client_id {
            options = options.with_client_id(client_id.clone());
        }

        if let Some(username) = config.get_mqtt_username() {
            let password = config.get_mqtt_password().unwrap_or_default();
            options = options.with_credentials(username, password);
        }

        for filter in &mqtt.subscriptions {
            options = options.with_subscription(filter.clone());
        }

        Ok(options)
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.settings.client_id = client_id.into();
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.settings.keep_alive = keep_alive;
        self
    }

    pub fn with_clean_start(mut self, clean_start: bool) -> Self {
        self.settings.clean_start = clean_start;
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.settings.credentials = Some(Credentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    pub fn with_tls(mut self, tls: bool) -> Self {
        self.settings.tls = tls;
        self
    }

    pub fn with_connack_timeout(mut self, timeout: Duration) -> Self {
        self.settings.connack_timeout = timeout;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.settings.reconnect = reconnect;
        self
    }

    pub fn with_subscription(mut self, topic_filter: impl Into<String>) -> Self {
        self.settings.subscriptions.push(topic_filter.into());
        self
    }

    pub fn on_publish_received<F>(mut self, callback: F) -> Self
    where
        F: Fn(&PublishPacket) + Send + Sync + 'static,
    {
        self.callbacks.on_publish_received = Some(Arc::new(callback));
        self
    }

    pub fn on_lifecycle_event_stopped<F>(mut self, callback: F) -> Self
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        self.callbacks.on_lifecycle_event_stopped = Some(Arc::new(callback));
        self
    }

    pub fn on_lifecycle_event_attempting_connect<F>(mut self, callback: F) -> Self
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        self.callbacks.on_lifecycle_event_attempting_connect = Some(Arc::new(callback));
        self
    }

    pub fn on_lifecycle_event_connection_success<F>(mut self, callback: F) -> Self
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        self.callbacks.on_lifecycle_event_connection_success = Some(Arc::new(callback));
        self
    }

    pub fn on_lifecycle_event_connection_failure<F>(mut self, callback: F) -> Self
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        self.callbacks.on_lifecycle_event_connection_failure = Some(Arc::new(callback));
        self
    }

    pub fn on_lifecycle_event_disconnection<F>(mut self, callback: F) -> Self
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        self.callbacks.on_lifecycle_event_disconnection = Some(Arc::new(callback));
        self
    }

    /// Called once, after the engine guarantees no further callbacks
    pub fn on_shutdown_complete<F>(mut self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.callbacks.on_shutdown_complete = Some(Arc::new(callback));
        self
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    pub(crate) fn into_parts(self) -> (ConnectionSettings, ClientCallbacks) {
        (self.settings, self.callbacks)
    }
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOptions")
            .field("settings", &self.settings)
            .field("callbacks", &self.callbacks)
            .finish()
    }
}
