//! rumqttc-backed engine
//!
//! Each client is one task on the messaging event loop. The task owns the
//! callback context token and a command channel; everything the caller does
//! (`start`, `stop`, `release`) is a message to it, and everything it observes
//! goes back out as lifecycle events through the token.
//!
//! A fresh `AsyncClient`/`EventLoop` pair is built for every connection
//! attempt. Reconnection is driven here rather than by rumqttc so that every
//! attempt is visible as an `AttemptingConnect` event.

use super::reconnect::ReconnectionDecision;
use super::{CreateFailure, NativeClient, NativeClientFactory, NativeClientOptions};
use crate::error::{CrtError, ErrorCode};
use crate::mqtt::callbacks::CellToken;
use crate::mqtt::lifecycle::LifecycleEvent;
use crate::mqtt::options::ConnectionSettings;
use crate::mqtt::packets::{
    ConnackPacket, DisconnectPacket, DisconnectReasonCode, PublishPacket, QoS,
};
use rumqttc::v5::mqttbytes::v5::{ConnAck, Disconnect, Packet, Publish};
use rumqttc::v5::mqttbytes::QoS as WireQoS;
use rumqttc::v5::mqttbytes::v5::DisconnectReasonCode as WireDisconnectReasonCode;
use rumqttc::v5::{AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, StateError};
use rumqttc::{Outgoing, Transport};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn, Instrument};

/// rumqttc rejects shorter non-zero keep-alive intervals
const MIN_KEEP_ALIVE: Duration = Duration::from_secs(5);

/// Upper bound for pushing DISCONNECT onto the wire during a stop
const DISCONNECT_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// Room for every SUBSCRIBE queued on ConnAck plus a DISCONNECT, all of
/// which may be queued before the event loop is polled again
fn request_channel_capacity(settings: &ConnectionSettings) -> usize {
    REQUEST_CHANNEL_CAPACITY.max(settings.subscriptions.len() + 1)
}

/// Factory for engine clients backed by rumqttc's MQTT 5 event loop
#[derive(Debug, Clone, Copy, Default)]
pub struct RumqttcFactory;

impl NativeClientFactory for RumqttcFactory {
    fn create(
        &self,
        options: NativeClientOptions,
    ) -> Result<Box<dyn NativeClient>, CreateFailure> {
        let NativeClientOptions {
            settings,
            context,
            event_loop,
        } = options;

        let mqtt_options = match configure_mqtt_options(&settings) {
            Ok(mqtt_options) => mqtt_options,
            Err(error) => return Err(CreateFailure { error, context }),
        };

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let client_id = settings.client_id.clone();
        let span = crate::client_span!(client_id = %client_id);
        let engine = Engine {
            settings,
            mqtt_options,
            context,
            commands: commands_rx,
        };
        event_loop.spawn("mqtt5-client", engine.run().instrument(span));

        Ok(Box::new(RumqttcClient {
            commands: commands_tx,
            client_id,
        }))
    }
}

/// Reject settings rumqttc would panic on or the broker would refuse outright
pub fn validate_settings(settings: &ConnectionSettings) -> Result<(), CrtError> {
    if settings.host_name.trim().is_empty() {
        warn!(target: "mqtt_engine", "client options rejected: empty host name");
        return Err(ErrorCode::InvalidClientOptions.into());
    }

    if settings.client_id.is_empty() || settings.client_id.starts_with(char::is_whitespace) {
        warn!(
            target: "mqtt_engine",
            client_id = %settings.client_id,
            "client options rejected: client id is empty or starts with whitespace"
        );
        return Err(ErrorCode::InvalidClientOptions.into());
    }

    if !settings.keep_alive.is_zero() && settings.keep_alive < MIN_KEEP_ALIVE {
        warn!(
            target: "mqtt_engine",
            keep_alive_ms = settings.keep_alive.as_millis() as u64,
            "client options rejected: keep-alive must be zero or at least 5s"
        );
        return Err(ErrorCode::InvalidClientOptions.into());
    }

    if settings.connack_timeout.is_zero() {
        warn!(target: "mqtt_engine", "client options rejected: connack timeout is zero");
        return Err(ErrorCode::InvalidClientOptions.into());
    }

    Ok(())
}

fn configure_mqtt_options(settings: &ConnectionSettings) -> Result<MqttOptions, CrtError> {
    validate_settings(settings)?;

    let mut mqtt_options =
        MqttOptions::new(&settings.client_id, &settings.host_name, settings.port);
    mqtt_options.set_keep_alive(settings.keep_alive);
    mqtt_options.set_clean_start(settings.clean_start);

    if let Some(credentials) = &settings.credentials {
        mqtt_options.set_credentials(&credentials.username, &credentials.password);
    }

    if settings.tls {
        mqtt_options.set_transport(Transport::tls_with_default_config());
    }

    Ok(mqtt_options)
}

#[derive(Debug)]
enum Command {
    Start,
    Stop(Option<DisconnectPacket>),
}

/// Caller-side handle; a thin sender into the engine task
#[derive(Debug)]
struct RumqttcClient {
    commands: mpsc::UnboundedSender<Command>,
    client_id: String,
}

impl RumqttcClient {
    fn send(&self, command: Command) -> Result<(), CrtError> {
        self.commands.send(command).map_err(|_| {
            warn!(
                target: "mqtt_engine",
                client_id = %self.client_id,
                "engine task is gone; request rejected"
            );
            CrtError::from(ErrorCode::ClientTerminated)
        })
    }
}

impl NativeClient for RumqttcClient {
    fn start(&self) -> Result<(), CrtError> {
        self.send(Command::Start)
    }

    fn stop(&self, disconnect: Option<&DisconnectPacket>) -> Result<(), CrtError> {
        if let Some(packet) = disconnect {
            if !packet.reason_code.is_client_sendable() {
                warn!(
                    target: "mqtt_engine",
                    client_id = %self.client_id,
                    reason_code = %packet.reason_code,
                    "stop rejected: reason code is not valid for a client"
                );
                return Err(ErrorCode::InvalidDisconnectPacket.into());
            }
        }
        self.send(Command::Stop(disconnect.cloned()))
    }

    fn release(self: Box<Self>) {
        debug!(
            target: "mqtt_engine",
            client_id = %self.client_id,
            "engine client released by caller"
        );
    }
}

/// How a run of the connection state machine ended
enum Flow {
    /// Back to desired-stopped; the task keeps serving commands
    Stopped,
    /// The caller released the client; the task ends
    Released,
}

enum SessionEnd {
    /// Connection failed or was lost; reconnect per policy
    Lost,
    Finished(Flow),
}

struct Engine {
    settings: ConnectionSettings,
    mqtt_options: MqttOptions,
    context: CellToken,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl Engine {
    async fn run(mut self) {
        info!(
            target: "mqtt_engine",
            host = %self.settings.host_name,
            port = self.settings.port,
            "engine client created"
        );

        loop {
            match self.commands.recv().await {
                Some(Command::Start) => {
                    if let Flow::Released = self.serve().await {
                        break;
                    }
                }
                Some(Command::Stop(_)) => {
                    debug!(target: "mqtt_engine", "stop requested while already stopped");
                }
                None => break,
            }
        }

        debug!(target: "mqtt_engine", "engine task finished; releasing callback context");
    }

    /// Connect and keep reconnecting until stopped or released
    async fn serve(&mut self) -> Flow {
        let mut failed_attempts = 0u32;

        loop {
            match self.session(&mut failed_attempts).await {
                SessionEnd::Finished(flow) => return flow,
                SessionEnd::Lost => {}
            }

            match self.settings.reconnect.next_attempt(failed_attempts) {
                ReconnectionDecision::Proceed { attempt, delay } => {
                    failed_attempts = attempt;
                    let max_display = self
                        .settings
                        .reconnect
                        .max_attempts
                        .map_or("∞".to_string(), |max| max.to_string());
                    info!(
                        target: "mqtt_engine",
                        "Attempting reconnection {}/{} after {}ms delay",
                        attempt,
                        max_display,
                        delay.as_millis()
                    );

                    if let Some(flow) = self.wait_reconnect_delay(delay).await {
                        self.context.dispatch(LifecycleEvent::Stopped);
                        return flow;
                    }
                }
                ReconnectionDecision::GiveUp => {
                    let error = CrtError::from(ErrorCode::ReconnectAttemptsExhausted);
                    error!(target: "mqtt_engine", %error, "stopping client");
                    self.context.dispatch(LifecycleEvent::Stopped);
                    return Flow::Stopped;
                }
            }
        }
    }

    /// Sleep out a reconnect delay; a stop or release cuts it short
    async fn wait_reconnect_delay(&mut self, delay: Duration) -> Option<Flow> {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return None,
                command = self.commands.recv() => match command {
                    Some(Command::Start) => {
                        debug!(target: "mqtt_engine", "start requested while reconnecting");
                    }
                    Some(Command::Stop(_)) => {
                        info!(target: "mqtt_engine", "stop received during reconnection delay");
                        return Some(Flow::Stopped);
                    }
                    None => {
                        info!(target: "mqtt_engine", "client released during reconnection delay");
                        return Some(Flow::Released);
                    }
                },
            }
        }
    }

    /// One connection attempt and, if it succeeds, the life of that connection
    async fn session(&mut self, failed_attempts: &mut u32) -> SessionEnd {
        self.context.dispatch(LifecycleEvent::AttemptingConnect);

        let (client, mut eventloop) = AsyncClient::new(
            self.mqtt_options.clone(),
            request_channel_capacity(&self.settings),
        );
        let connack_deadline = tokio::time::sleep(self.settings.connack_timeout);
        tokio::pin!(connack_deadline);
        let mut connected = false;

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Start) => {
                        debug!(target: "mqtt_engine", "start requested while already running");
                    }
                    Some(Command::Stop(disconnect)) => {
                        self.close_session(&client, &mut eventloop, connected, disconnect).await;
                        return SessionEnd::Finished(Flow::Stopped);
                    }
                    None => {
                        self.close_session(&client, &mut eventloop, connected, None).await;
                        return SessionEnd::Finished(Flow::Released);
                    }
                },
                _ = &mut connack_deadline, if !connected => {
                    warn!(
                        target: "mqtt_engine",
                        timeout_ms = self.settings.connack_timeout.as_millis() as u64,
                        "no CONNACK before timeout"
                    );
                    self.context.dispatch(LifecycleEvent::ConnectionFailure {
                        error: Some(ErrorCode::ConnackTimeout.into()),
                        connack: None,
                    });
                    return SessionEnd::Lost;
                }
                polled = eventloop.poll() => match polled {
                    Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                        connected = true;
                        *failed_attempts = 0;
                        info!(
                            target: "mqtt_engine",
                            session_present = connack.session_present,
                            "connection established"
                        );
                        self.context.dispatch(LifecycleEvent::ConnectionSuccess {
                            connack: Some(connack_view(connack)),
                        });
                        self.subscribe_all(&client);
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        trace!(target: "mqtt_engine", "inbound publish");
                        self.context.dispatch(publish_view(publish));
                    }
                    Ok(Event::Incoming(Packet::Disconnect(disconnect))) => {
                        let disconnect = disconnect_view(disconnect);
                        warn!(
                            target: "mqtt_engine",
                            reason_code = %disconnect.reason_code,
                            "broker sent DISCONNECT"
                        );
                        self.context.dispatch(LifecycleEvent::Disconnection {
                            error: Some(ErrorCode::ServerDisconnect.into()),
                            disconnect: Some(disconnect),
                        });
                        return SessionEnd::Lost;
                    }
                    Ok(other) => {
                        trace!(target: "mqtt_engine", event = ?other, "engine event");
                    }
                    Err(ConnectionError::MqttState(StateError::ServerDisconnect {
                        reason_code,
                        reason_string,
                    })) => {
                        let disconnect = server_disconnect_view(reason_code, reason_string);
                        warn!(
                            target: "mqtt_engine",
                            reason_code = %disconnect.reason_code,
                            "broker sent DISCONNECT"
                        );
                        self.context.dispatch(LifecycleEvent::Disconnection {
                            error: Some(ErrorCode::ServerDisconnect.into()),
                            disconnect: Some(disconnect),
                        });
                        return SessionEnd::Lost;
                    }
                    Err(e) => {
                        let error = CrtError::from(connection_error_code(&e));
                        if connected {
                            warn!(target: "mqtt_engine", "connection lost: {}", e);
                            self.context.dispatch(LifecycleEvent::Disconnection {
                                error: Some(error),
                                disconnect: None,
                            });
                        } else {
                            warn!(target: "mqtt_engine", "connection attempt failed: {}", e);
                            self.context.dispatch(LifecycleEvent::ConnectionFailure {
                                error: Some(error),
                                connack: None,
                            });
                        }
                        return SessionEnd::Lost;
                    }
                },
            }
        }
    }

    /// Queue SUBSCRIBE for every configured filter
    fn subscribe_all(&self, client: &AsyncClient) {
        for filter in &self.settings.subscriptions {
            match client.try_subscribe(filter.as_str(), WireQoS::AtLeastOnce) {
                Ok(()) => debug!(target: "mqtt_engine", "Subscribed to: {}", filter),
                Err(e) => {
                    let error = CrtError::from(ErrorCode::SubscribeFailed);
                    error!(target: "mqtt_engine", %error, "Failed to subscribe to {}: {}", filter, e);
                }
            }
        }
    }

    async fn close_session(
        &mut self,
        client: &AsyncClient,
        eventloop: &mut EventLoop,
        connected: bool,
        disconnect: Option<DisconnectPacket>,
    ) {
        if connected {
            // rumqttc sends DISCONNECT with a normal reason code
            if let Some(packet) = &disconnect {
                debug!(
                    target: "mqtt_engine",
                    reason_code = %packet.reason_code,
                    session_expiry_interval = ?packet.session_expiry_interval,
                    "stop requested"
                );
            }

            match client.try_disconnect() {
                Ok(()) => flush_disconnect(eventloop).await,
                Err(e) => warn!(
                    target: "mqtt_engine",
                    "Failed to queue DISCONNECT, dropping the connection instead: {}",
                    e
                ),
            }

            self.context.dispatch(LifecycleEvent::Disconnection {
                error: Some(ErrorCode::UserRequestedStop.into()),
                disconnect,
            });
        }

        info!(target: "mqtt_engine", "client stopped");
        self.context.dispatch(LifecycleEvent::Stopped);
    }
}

async fn flush_disconnect(eventloop: &mut EventLoop) {
    let flush = async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!(target: "mqtt_engine", "event loop closed while flushing: {}", e);
                    break;
                }
            }
        }
    };

    if tokio::time::timeout(DISCONNECT_FLUSH_TIMEOUT, flush)
        .await
        .is_err()
    {
        warn!(target: "mqtt_engine", "DISCONNECT not flushed before timeout");
    }
}

fn connection_error_code(error: &ConnectionError) -> ErrorCode {
    match error {
        ConnectionError::ConnectionRefused(_) => ErrorCode::ConnectionRefused,
        _ => ErrorCode::ConnectionFailed,
    }
}

fn connack_view(connack: ConnAck) -> ConnackPacket {
    let mut view = ConnackPacket {
        session_present: connack.session_present,
        ..ConnackPacket::default()
    };
    if let Some(properties) = connack.properties {
        view.assigned_client_identifier = properties.assigned_client_identifier;
        view.server_keep_alive = properties.server_keep_alive;
        view.session_expiry_interval = properties.session_expiry_interval;
        view.receive_maximum = properties.receive_max;
        view.reason_string = properties.reason_string;
    }
    view
}

fn publish_view(publish: Publish) -> PublishPacket {
    PublishPacket {
        topic: String::from_utf8_lossy(&publish.topic).into_owned(),
        payload: publish.payload,
        qos: match publish.qos {
            WireQoS::AtMostOnce => QoS::AtMostOnce,
            WireQoS::AtLeastOnce => QoS::AtLeastOnce,
            WireQoS::ExactlyOnce => QoS::ExactlyOnce,
        },
        retain: publish.retain,
    }
}

fn reason_code_view(reason_code: WireDisconnectReasonCode) -> DisconnectReasonCode {
    DisconnectReasonCode::try_from(reason_code as u8)
        .unwrap_or(DisconnectReasonCode::UnspecifiedError)
}

fn disconnect_view(disconnect: Disconnect) -> DisconnectPacket {
    let (session_expiry_interval, reason_string) = match disconnect.properties {
        Some(properties) => (properties.session_expiry_interval, properties.reason_string),
        None => (None, None),
    };
    DisconnectPacket {
        reason_code: reason_code_view(disconnect.reason_code),
        session_expiry_interval,
        reason_string,
    }
}

/// rumqttc reports an inbound DISCONNECT as a state error with the properties
/// already reduced to the reason string
fn server_disconnect_view(
    reason_code: WireDisconnectReasonCode,
    reason_string: Option<String>,
) -> DisconnectPacket {
    DisconnectPacket {
        reason_code: reason_code_view(reason_code),
        session_expiry_interval: None,
        reason_string,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::options::ClientOptions;
    use bytes::Bytes;
    use rumqttc::v5::mqttbytes::v5::ConnectReturnCode;

    fn settings() -> ConnectionSettings {
        ClientOptions::new("localhost", 1883)
            .with_client_id("engine-test")
            .settings()
            .clone()
    }

    #[test]
    fn test_valid_settings_pass() {
        assert!(validate_settings(&settings()).is_ok());
        assert!(configure_mqtt_options(&settings()).is_ok());
    }

    #[test]
    fn test_empty_host_rejected() {
        let mut settings = settings();
        settings.host_name = "  ".to_string();
        assert_eq!(
            validate_settings(&settings).unwrap_err().error_code(),
            Some(ErrorCode::InvalidClientOptions)
        );
    }

    #[test]
    fn test_client_id_rules() {
        let mut settings = settings();
        settings.client_id = String::new();
        assert!(validate_settings(&settings).is_err());

        settings.client_id = " leading-space".to_string();
        assert!(validate_settings(&settings).is_err());
    }

    #[test]
    fn test_keep_alive_rules() {
        let mut settings = settings();
        settings.keep_alive = Duration::ZERO;
        assert!(validate_settings(&settings).is_ok());

        settings.keep_alive = Duration::from_secs(2);
        assert!(validate_settings(&settings).is_err());

        settings.keep_alive = Duration::from_secs(5);
        assert!(validate_settings(&settings).is_ok());
    }

    #[test]
    fn test_zero_connack_timeout_rejected() {
        let mut settings = settings();
        settings.connack_timeout = Duration::ZERO;
        assert!(validate_settings(&settings).is_err());
    }

    #[test]
    fn test_connection_error_mapping() {
        assert_eq!(
            connection_error_code(&ConnectionError::ConnectionRefused(
                ConnectReturnCode::NotAuthorized
            )),
            ErrorCode::ConnectionRefused
        );
        assert_eq!(
            connection_error_code(&ConnectionError::RequestsDone),
            ErrorCode::ConnectionFailed
        );
    }

    #[test]
    fn test_connack_view_without_properties() {
        let view = connack_view(ConnAck {
            session_present: true,
            code: ConnectReturnCode::Success,
            properties: None,
        });
        assert!(view.session_present);
        assert_eq!(view.assigned_client_identifier, None);
    }

    #[test]
    fn test_publish_view() {
        let view = publish_view(Publish {
            dup: false,
            qos: WireQoS::AtLeastOnce,
            retain: true,
            topic: Bytes::from("sensors/temp"),
            pkid: 7,
            payload: Bytes::from("21.5"),
            properties: None,
        });
        assert_eq!(view.topic, "sensors/temp");
        assert_eq!(view.payload_str(), Some("21.5"));
        assert_eq!(view.qos, QoS::AtLeastOnce);
        assert!(view.retain);
    }

    #[test]
    fn test_disconnect_view_maps_reason_code() {
        let view = disconnect_view(Disconnect {
            reason_code: WireDisconnectReasonCode::ServerShuttingDown,
            properties: None,
        });
        assert_eq!(view.reason_code, DisconnectReasonCode::ServerShuttingDown);
        assert_eq!(view.reason_string, None);
    }

    #[test]
    fn test_server_disconnect_view_keeps_reason_string() {
        let view = server_disconnect_view(
            WireDisconnectReasonCode::SessionTakenOver,
            Some("replaced".to_string()),
        );
        assert_eq!(view.reason_code, DisconnectReasonCode::SessionTakenOver);
        assert_eq!(view.reason_string.as_deref(), Some("replaced"));
        assert_eq!(view.session_expiry_interval, None);
    }

    #[test]
    fn test_request_channel_fits_every_subscription() {
        let mut settings = settings();
        assert_eq!(request_channel_capacity(&settings), REQUEST_CHANNEL_CAPACITY);

        settings.subscriptions = (0..15).map(|i| format!("sensors/{i}")).collect();
        assert_eq!(request_channel_capacity(&settings), 16);
    }
}
