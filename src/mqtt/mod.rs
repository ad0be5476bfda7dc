//! MQTT 5 client shell
//!
//! The client layer over the engine: options, the callback ownership cell,
//! lifecycle events and the client handle itself.

pub mod callbacks;
pub mod client;
pub mod lifecycle;
pub mod options;
pub mod packets;

pub use callbacks::{CallbackCell, CellToken, ClientCallbacks, ShutdownHandle};
pub use client::Mqtt5Client;
pub use lifecycle::{LifecycleEvent, LifecycleEventKind, NativeEvent};
pub use options::{ClientOptions, ConnectionSettings, Credentials};
pub use packets::{ConnackPacket, DisconnectPacket, DisconnectReasonCode, PublishPacket, QoS};
