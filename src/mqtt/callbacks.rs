//! Callback ownership cell
//!
//! The cell is the only thing the engine keeps from the managed side. It is a
//! channel boundary: engine threads post [`NativeEvent`]s through a
//! [`CellToken`], and a single dispatcher task on the event loop delivers them
//! to the user's callbacks in order.
//!
//! Each ownership unit ([`CallbackCell`] or [`CellToken`]) is one sending half
//! of the channel. When the last unit is released the channel closes, the
//! dispatcher delivers whatever is still queued, and only then fires the
//! shutdown notification. Because no unit remains, nothing can be dispatched
//! afterwards, and the dispatcher loop ends exactly once.

use super::lifecycle::{LifecycleEventKind, NativeEvent};
use super::options::{OnLifecycleEvent, OnPublishReceived, OnShutdownComplete};
use crate::runtime::EventLoopHandle;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, warn, Instrument};

/// User callbacks captured from `ClientOptions`
///
/// A slot left empty is simply never invoked.
#[derive(Clone, Default)]
pub struct ClientCallbacks {
    pub on_publish_received: Option<OnPublishReceived>,
    pub on_lifecycle_event_stopped: Option<OnLifecycleEvent>,
    pub on_lifecycle_event_attempting_connect: Option<OnLifecycleEvent>,
    pub on_lifecycle_event_connection_success: Option<OnLifecycleEvent>,
    pub on_lifecycle_event_connection_failure: Option<OnLifecycleEvent>,
    pub on_lifecycle_event_disconnection: Option<OnLifecycleEvent>,
    pub on_shutdown_complete: Option<OnShutdownComplete>,
}

impl ClientCallbacks {
    fn lifecycle_slot(&self, kind: LifecycleEventKind) -> Option<&OnLifecycleEvent> {
        match kind {
            LifecycleEventKind::Stopped => self.on_lifecycle_event_stopped.as_ref(),
            LifecycleEventKind::AttemptingConnect => {
                self.on_lifecycle_event_attempting_connect.as_ref()
            }
            LifecycleEventKind::ConnectionSuccess => {
                self.on_lifecycle_event_connection_success.as_ref()
            }
            LifecycleEventKind::ConnectionFailure => {
                self.on_lifecycle_event_connection_failure.as_ref()
            }
            LifecycleEventKind::Disconnection => self.on_lifecycle_event_disconnection.as_ref(),
        }
    }

    /// Invoke the callback registered for `event`, if any
    ///
    /// A panicking callback is logged and contained.
    pub fn dispatch(&self, event: &NativeEvent) {
        match event {
            NativeEvent::PublishReceived(publish) => {
                if let Some(callback) = &self.on_publish_received {
                    invoke_guarded("publish_received", || callback(publish));
                }
            }
            NativeEvent::Lifecycle(lifecycle) => {
                debug!(event = %lifecycle, "dispatching lifecycle event");
                if let Some(callback) = self.lifecycle_slot(lifecycle.kind()) {
                    invoke_guarded("lifecycle_event", || callback(lifecycle));
                }
            }
        }
    }
}

impl fmt::Debug for ClientCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCallbacks")
            .field("on_publish_received", &self.on_publish_received.is_some())
            .field("on_lifecycle_event_stopped", &self.on_lifecycle_event_stopped.is_some())
            .field(
                "on_lifecycle_event_attempting_connect",
                &self.on_lifecycle_event_attempting_connect.is_some(),
            )
            .field(
                "on_lifecycle_event_connection_success",
                &self.on_lifecycle_event_connection_success.is_some(),
            )
            .field(
                "on_lifecycle_event_connection_failure",
                &self.on_lifecycle_event_connection_failure.is_some(),
            )
            .field(
                "on_lifecycle_event_disconnection",
                &self.on_lifecycle_event_disconnection.is_some(),
            )
            .field("on_shutdown_complete", &self.on_shutdown_complete.is_some())
            .finish()
    }
}

fn invoke_guarded(callback: &'static str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        error!(callback, "user callback panicked; continuing dispatch");
    }
}

/// The constructor's ownership unit of a callback cell
pub struct CallbackCell {
    events: mpsc::UnboundedSender<NativeEvent>,
    shutdown: ShutdownHandle,
}

impl CallbackCell {
    /// Allocate a cell and start its dispatcher on `event_loop`
    pub fn new(callbacks: ClientCallbacks, event_loop: &EventLoopHandle, client_id: &str) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let span = crate::lifecycle_span!(client_id = %client_id);
        event_loop.spawn(
            "callback-dispatcher",
            dispatch_loop(events_rx, callbacks, shutdown_tx).instrument(span),
        );

        Self {
            events: events_tx,
            shutdown: ShutdownHandle { rx: shutdown_rx },
        }
    }

    /// Hand out a new ownership unit for the engine to keep as its context
    pub fn as_opaque_context(&self) -> CellToken {
        CellToken {
            events: self.events.clone(),
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Relinquish this unit
    pub fn release(self) {}
}

impl fmt::Debug for CallbackCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackCell")
            .field("shutdown_complete", &self.shutdown.is_complete())
            .finish()
    }
}

/// Ownership unit held by the engine; its only way back into callbacks
///
/// Deliberately not `Clone`: the engine holds exactly the unit it was given.
pub struct CellToken {
    events: mpsc::UnboundedSender<NativeEvent>,
}

impl CellToken {
    /// Post an event for in-order delivery; callable from any thread
    pub fn dispatch(&self, event: impl Into<NativeEvent>) {
        if self.events.send(event.into()).is_err() {
            warn!("callback dispatcher is no longer running; event dropped");
        }
    }

    /// Relinquish this unit; the last release triggers shutdown
    pub fn release(self) {}
}

impl fmt::Debug for CellToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CellToken")
            .field("dispatcher_closed", &self.events.is_closed())
            .finish()
    }
}

async fn dispatch_loop(
    mut events: mpsc::UnboundedReceiver<NativeEvent>,
    callbacks: ClientCallbacks,
    shutdown: watch::Sender<bool>,
) {
    while let Some(event) = events.recv().await {
        callbacks.dispatch(&event);
    }

    debug!("every cell unit released; signalling shutdown");
    if let Some(on_shutdown_complete) = &callbacks.on_shutdown_complete {
        invoke_guarded("shutdown_complete", || on_shutdown_complete());
    }
    shutdown.send_replace(true);
}

/// Observer for a cell's one-time shutdown notification
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    rx: watch::Receiver<bool>,
}

impl ShutdownHandle {
    /// True once no further callback can be invoked
    pub fn is_complete(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve when shutdown has completed
    ///
    /// Returns false if the dispatcher went away without completing, which
    /// happens when its event loop is torn down underneath it.
    pub async fn wait(&self) -> bool {
        let mut rx = self.rx.clone();
        let completed = rx.wait_for(|complete| *complete).await.is_ok();
        if !completed {
            warn!("callback dispatcher dropped before shutdown completed");
        }
        completed
    }

    /// Like [`wait`](Self::wait) with an upper bound; false on timeout
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait())
            .await
            .unwrap_or(false)
    }
}
