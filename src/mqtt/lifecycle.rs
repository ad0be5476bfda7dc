//! Lifecycle events emitted by the engine's connection state machine

use super::packets::{ConnackPacket, DisconnectPacket, PublishPacket};
use crate::error::CrtError;
use std::fmt;

/// Kind of a lifecycle event, used to pick the callback slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEventKind {
    Stopped,
    AttemptingConnect,
    ConnectionSuccess,
    ConnectionFailure,
    Disconnection,
}

/// An observable transition of the engine's connection state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The client settled into the stopped state and will not reconnect
    Stopped,
    /// A connection attempt is starting
    AttemptingConnect,
    /// CONNACK accepted the connection
    ConnectionSuccess { connack: Option<ConnackPacket> },
    /// A connection attempt failed before the session was established
    ConnectionFailure {
        error: Option<CrtError>,
        connack: Option<ConnackPacket>,
    },
    /// An established connection was closed
    Disconnection {
        error: Option<CrtError>,
        disconnect: Option<DisconnectPacket>,
    },
}

impl LifecycleEvent {
    pub fn kind(&self) -> LifecycleEventKind {
        match self {
            LifecycleEvent::Stopped => LifecycleEventKind::Stopped,
            LifecycleEvent::AttemptingConnect => LifecycleEventKind::AttemptingConnect,
            LifecycleEvent::ConnectionSuccess { .. } => LifecycleEventKind::ConnectionSuccess,
            LifecycleEvent::ConnectionFailure { .. } => LifecycleEventKind::ConnectionFailure,
            LifecycleEvent::Disconnection { .. } => LifecycleEventKind::Disconnection,
        }
    }

    /// Error code carried by the event, if any
    pub fn error(&self) -> Option<CrtError> {
        match self {
            LifecycleEvent::ConnectionFailure { error, .. }
            | LifecycleEvent::Disconnection { error, .. } => *error,
            _ => None,
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.error() {
            Some(error) => write!(f, "{:?} [{}]", self.kind(), error),
            None => write!(f, "{:?}", self.kind()),
        }
    }
}

/// Everything the engine can post back through the callback cell
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeEvent {
    Lifecycle(LifecycleEvent),
    PublishReceived(PublishPacket),
}

impl From<LifecycleEvent> for NativeEvent {
    fn from(event: LifecycleEvent) -> Self {
        NativeEvent::Lifecycle(event)
    }
}

impl From<PublishPacket> for NativeEvent {
    fn from(publish: PublishPacket) -> Self {
        NativeEvent::PublishReceived(publish)
    }
}
