//! mqttkit - lifecycle-safe MQTT 5 client shell
//!
//! A managed client over an event-driven MQTT 5 engine, plus the process-wide
//! registry for the subsystems that engine depends on.
//!
//! # Overview
//!
//! - [`runtime`]: one-time initialization and blocking clean-up of the
//!   auth, event-stream and messaging subsystems
//! - [`mqtt`]: client options, the callback ownership cell, lifecycle events
//!   and the [`Mqtt5Client`] handle
//! - [`native`]: the engine boundary and its rumqttc implementation
//! - [`error`]: the single typed error for engine status codes
//!
//! Callbacks run on the messaging event loop, in the order the engine
//! produced the events. After the shutdown notification fires no callback
//! runs again.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use mqttkit::mqtt::{ClientOptions, DisconnectPacket, Mqtt5Client};
//! use std::time::Duration;
//!
//! mqttkit::runtime::initialize();
//!
//! let options = ClientOptions::new("localhost", 1883)
//!     .with_subscription("sensors/#")
//!     .on_lifecycle_event_connection_success(|event| println!("{event}"))
//!     .on_publish_received(|publish| println!("{}: {:?}", publish.topic, publish.payload));
//!
//! let mut client = Mqtt5Client::new(options).unwrap();
//! client.start().unwrap();
//!
//! // ... later
//! client.stop(Some(&DisconnectPacket::default())).unwrap();
//! let shutdown = client.shutdown_handle();
//! client.close();
//!
//! let event_loop = mqttkit::runtime::global().event_loop().unwrap();
//! event_loop.block_on(shutdown.wait_timeout(Duration::from_secs(5)));
//!
//! mqttkit::runtime::clean_up();
//! ```

pub mod config;
pub mod error;
pub mod mqtt;
pub mod native;
pub mod observability;
pub mod runtime;
pub mod testing;

pub use config::{ConfigError, KitConfig};
pub use error::{CrtError, CrtResult, ErrorCode};
pub use mqtt::{ClientOptions, LifecycleEvent, Mqtt5Client, ShutdownHandle};
pub use runtime::{SubsystemRegistry, SubsystemState};
