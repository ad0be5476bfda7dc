//! Managed handle over one engine client
//!
//! States: Ready while the engine handle is held, Released after `close()` or
//! drop. A released client ignores `start`/`stop` and never calls the engine
//! again.
//!
//! Closing does not mean callbacks have stopped. The engine may still be
//! finishing in-flight work; [`ShutdownHandle`] reports when it is done.

use super::callbacks::{CallbackCell, ShutdownHandle};
use super::options::ClientOptions;
use super::packets::DisconnectPacket;
use crate::error::CrtResult;
use crate::native::{
    CreateFailure, NativeClient, NativeClientFactory, NativeClientOptions, RumqttcFactory,
};
use crate::runtime::{self, SubsystemRegistry};
use std::fmt;
use tracing::{debug, error, info, warn};

/// MQTT 5 client
pub struct Mqtt5Client {
    handle: Option<Box<dyn NativeClient>>,
    client_id: String,
    shutdown: ShutdownHandle,
}

impl Mqtt5Client {
    /// Create a rumqttc-backed client on the process-wide registry
    ///
    /// `runtime::initialize()` must have been called first; otherwise this
    /// fails with `EventLoopUnavailable`.
    pub fn new(options: ClientOptions) -> CrtResult<Self> {
        Self::create(options, runtime::global(), &RumqttcFactory)
    }

    /// Create a client with an explicit registry and engine
    ///
    /// The callbacks in `options` move into a fresh callback cell whose
    /// context unit is handed to `factory`. If the factory rejects the
    /// options, both units are released here before the error is returned,
    /// so the shutdown notification still fires exactly once.
    pub fn create(
        options: ClientOptions,
        registry: &SubsystemRegistry,
        factory: &dyn NativeClientFactory,
    ) -> CrtResult<Self> {
        let event_loop = registry.event_loop()?;
        let (settings, callbacks) = options.into_parts();
        let client_id = settings.client_id.clone();

        let cell = CallbackCell::new(callbacks, &event_loop, &client_id);
        let shutdown = cell.shutdown_handle();
        let created = factory.create(NativeClientOptions {
            settings,
            context: cell.as_opaque_context(),
            event_loop,
        });
        cell.release();

        match created {
            Ok(handle) => {
                info!(client_id = %client_id, "MQTT 5 client created");
                Ok(Self {
                    handle: Some(handle),
                    client_id,
                    shutdown,
                })
            }
            Err(CreateFailure { error, context }) => {
                context.release();
                error!(client_id = %client_id, %error, "Failed to create MQTT 5 client");
                Err(error)
            }
        }
    }

    /// Ask the engine to connect and stay connected
    ///
    /// Returns once the request is accepted. A no-op after `close()`.
    pub fn start(&self) -> CrtResult<()> {
        let Some(handle) = &self.handle else {
            debug!(client_id = %self.client_id, "start ignored: client released");
            return Ok(());
        };

        handle.start().map_err(|error| {
            warn!(client_id = %self.client_id, %error, "start rejected by engine");
            error
        })
    }

    /// Ask the engine to disconnect and stay disconnected
    ///
    /// `disconnect` is passed through unchanged. A no-op after `close()`.
    ///
    /// The rumqttc engine always sends DISCONNECT with a normal-disconnection
    /// reason code; a custom reason code or session expiry is only logged.
    pub fn stop(&self, disconnect: Option<&DisconnectPacket>) -> CrtResult<()> {
        let Some(handle) = &self.handle else {
            debug!(client_id = %self.client_id, "stop ignored: client released");
            return Ok(());
        };

        handle.stop(disconnect).map_err(|error| {
            warn!(client_id = %self.client_id, %error, "stop rejected by engine");
            error
        })
    }

    /// Release the engine handle; idempotent
    pub fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.release();
            info!(client_id = %self.client_id, "MQTT 5 client closed");
        }
    }

    pub fn is_released(&self) -> bool {
        self.handle.is_none()
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Observer for the one-time shutdown notification
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }
}

impl Drop for Mqtt5Client {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Mqtt5Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mqtt5Client")
            .field("client_id", &self.client_id)
            .field("released", &self.is_released())
            .field("shutdown_complete", &self.shutdown.is_complete())
            .finish()
    }
}
