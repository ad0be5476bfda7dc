//! Engine boundary
//!
//! The client shell talks to its MQTT engine only through these two traits.
//! The engine runs its own tasks on the messaging event loop and reports back
//! exclusively through the [`CellToken`] it is given at creation.
//!
//! Ownership of the token is explicit in the types: a successful
//! [`NativeClientFactory::create`] moves it into the engine, and a failed one
//! hands it back inside [`CreateFailure`] so the caller can release it.

pub mod reconnect;
pub mod rumqtt;

pub use rumqtt::RumqttcFactory;

use crate::error::CrtError;
use crate::mqtt::callbacks::CellToken;
use crate::mqtt::options::ConnectionSettings;
use crate::mqtt::packets::DisconnectPacket;
use crate::runtime::EventLoopHandle;
use std::fmt;

/// Everything an engine needs to build one client
#[derive(Debug)]
pub struct NativeClientOptions {
    pub settings: ConnectionSettings,
    /// The engine's only persistent user-data context
    pub context: CellToken,
    pub event_loop: EventLoopHandle,
}

/// A rejected create; the context was never taken over
#[derive(Debug)]
pub struct CreateFailure {
    pub error: CrtError,
    pub context: CellToken,
}

impl fmt::Display for CreateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "engine client creation failed: {}", self.error)
    }
}

/// Builds engine clients
pub trait NativeClientFactory: Send + Sync {
    fn create(
        &self,
        options: NativeClientOptions,
    ) -> Result<Box<dyn NativeClient>, CreateFailure>;
}

/// One engine client
///
/// `start` and `stop` return once the request is accepted. Outcomes are
/// reported as lifecycle events through the context token.
pub trait NativeClient: Send + Sync {
    fn start(&self) -> Result<(), CrtError>;

    fn stop(&self, disconnect: Option<&DisconnectPacket>) -> Result<(), CrtError>;

    /// Drop the caller's reference
    ///
    /// The engine finishes in-flight work, then releases its context token,
    /// which eventually fires the shutdown notification.
    fn release(self: Box<Self>);
}
