//! Engine-independent views of the MQTT 5 packets the client surfaces
//!
//! These are plain data: the client shell passes them between the engine and
//! user callbacks without interpreting them.

use bytes::Bytes;
use std::fmt;

/// Delivery guarantee of a publish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

/// Inbound application message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishPacket {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

impl PublishPacket {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>, qos: QoS) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain: false,
        }
    }

    /// Payload as UTF-8, if it is valid UTF-8
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// Connection acknowledgement details from a successful connect
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnackPacket {
    pub session_present: bool,
    pub assigned_client_identifier: Option<String>,
    pub server_keep_alive: Option<u16>,
    pub session_expiry_interval: Option<u32>,
    pub receive_maximum: Option<u16>,
    pub reason_string: Option<String>,
}

/// MQTT 5 DISCONNECT reason codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DisconnectReasonCode {
    NormalDisconnection = 0x00,
    DisconnectWithWillMessage = 0x04,
    UnspecifiedError = 0x80,
    MalformedPacket = 0x81,
    ProtocolError = 0x82,
    ImplementationSpecificError = 0x83,
    NotAuthorized = 0x87,
    ServerBusy = 0x89,
    ServerShuttingDown = 0x8B,
    KeepAliveTimeout = 0x8D,
    SessionTakenOver = 0x8E,
    TopicFilterInvalid = 0x8F,
    TopicNameInvalid = 0x90,
    ReceiveMaximumExceeded = 0x93,
    TopicAliasInvalid = 0x94,
    PacketTooLarge = 0x95,
    MessageRateTooHigh = 0x96,
    QuotaExceeded = 0x97,
    AdministrativeAction = 0x98,
    PayloadFormatInvalid = 0x99,
    RetainNotSupported = 0x9A,
    QosNotSupported = 0x9B,
    UseAnotherServer = 0x9C,
    ServerMoved = 0x9D,
    SharedSubscriptionsNotSupported = 0x9E,
    ConnectionRateExceeded = 0x9F,
    MaximumConnectTime = 0xA0,
    SubscriptionIdentifiersNotSupported = 0xA1,
    WildcardSubscriptionsNotSupported = 0xA2,
}

impl DisconnectReasonCode {
    /// Whether a client is allowed to send this code
    pub fn is_client_sendable(self) -> bool {
        matches!(
            self,
            DisconnectReasonCode::NormalDisconnection
                | DisconnectReasonCode::DisconnectWithWillMessage
                | DisconnectReasonCode::UnspecifiedError
                | DisconnectReasonCode::MalformedPacket
                | DisconnectReasonCode::ProtocolError
                | DisconnectReasonCode::ImplementationSpecificError
                | DisconnectReasonCode::TopicNameInvalid
                | DisconnectReasonCode::ReceiveMaximumExceeded
                | DisconnectReasonCode::TopicAliasInvalid
                | DisconnectReasonCode::PacketTooLarge
                | DisconnectReasonCode::MessageRateTooHigh
                | DisconnectReasonCode::QuotaExceeded
                | DisconnectReasonCode::AdministrativeAction
                | DisconnectReasonCode::PayloadFormatInvalid
        )
    }
}

impl TryFrom<u8> for DisconnectReasonCode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use DisconnectReasonCode::*;
        let code = match value {
            0x00 => NormalDisconnection,
            0x04 => DisconnectWithWillMessage,
            0x80 => UnspecifiedError,
            0x81 => MalformedPacket,
            0x82 => ProtocolError,
            0x83 => ImplementationSpecificError,
            0x87 => NotAuthorized,
            0x89 => ServerBusy,
            0x8B => ServerShuttingDown,
            0x8D => KeepAliveTimeout,
            0x8E => SessionTakenOver,
            0x8F => TopicFilterInvalid,
            0x90 => TopicNameInvalid,
            0x93 => ReceiveMaximumExceeded,
            0x94 => TopicAliasInvalid,
            0x95 => PacketTooLarge,
            0x96 => MessageRateTooHigh,
            0x97 => QuotaExceeded,
            0x98 => AdministrativeAction,
            0x99 => PayloadFormatInvalid,
            0x9A => RetainNotSupported,
            0x9B => QosNotSupported,
            0x9C => UseAnotherServer,
            0x9D => ServerMoved,
            0x9E => SharedSubscriptionsNotSupported,
            0x9F => ConnectionRateExceeded,
            0xA0 => MaximumConnectTime,
            0xA1 => SubscriptionIdentifiersNotSupported,
            0xA2 => WildcardSubscriptionsNotSupported,
            other => return Err(other),
        };
        Ok(code)
    }
}

impl fmt::Display for DisconnectReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} (0x{:02X})", self, *self as u8)
    }
}

/// DISCONNECT metadata, sent on `stop` or received from the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectPacket {
    pub reason_code: DisconnectReasonCode,
    /// Overrides the session expiry negotiated at connect time
    pub session_expiry_interval: Option<u32>,
    pub reason_string: Option<String>,
}

impl DisconnectPacket {
    pub fn new(reason_code: DisconnectReasonCode) -> Self {
        Self {
            reason_code,
            session_expiry_interval: None,
            reason_string: None,
        }
    }

    pub fn with_session_expiry_interval(mut self, seconds: u32) -> Self {
        self.session_expiry_interval = Some(seconds);
        self
    }

    pub fn with_reason_string(mut self, reason: impl Into<String>) -> Self {
        self.reason_string = Some(reason.into());
        self
    }
}

impl Default for DisconnectPacket {
    fn default() -> Self {
        Self::new(DisconnectReasonCode::NormalDisconnection)
    }
}
