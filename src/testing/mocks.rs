//! Mock engine for testing
//!
//! [`MockNativeFactory`] stands in for the rumqttc engine. It records every
//! call, can be told to reject create/start/stop with a given error code, and
//! hands out [`MockNativeHandle`]s through which tests inject engine events
//! and decide when the engine lets go of its callback context.

use crate::error::{CrtError, ErrorCode};
use crate::mqtt::callbacks::CellToken;
use crate::mqtt::lifecycle::NativeEvent;
use crate::mqtt::options::ConnectionSettings;
use crate::mqtt::packets::DisconnectPacket;
use crate::native::{CreateFailure, NativeClient, NativeClientFactory, NativeClientOptions};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug)]
struct MockClientState {
    settings: ConnectionSettings,
    context: Mutex<Option<CellToken>>,
    starts: AtomicUsize,
    stops: Mutex<Vec<Option<DisconnectPacket>>>,
    releases: AtomicUsize,
    start_error: Option<ErrorCode>,
    stop_error: Option<ErrorCode>,
    defer_shutdown: bool,
}

/// Test-side view of one mock engine client
#[derive(Debug, Clone)]
pub struct MockNativeHandle {
    state: Arc<MockClientState>,
}

impl MockNativeHandle {
    /// Settings the engine received at create time
    pub fn settings(&self) -> &ConnectionSettings {
        &self.state.settings
    }

    pub fn starts(&self) -> usize {
        self.state.starts.load(Ordering::SeqCst)
    }

    /// Disconnect argument of every `stop` call, in order
    pub fn stops(&self) -> Vec<Option<DisconnectPacket>> {
        lock(&self.state.stops).clone()
    }

    pub fn releases(&self) -> usize {
        self.state.releases.load(Ordering::SeqCst)
    }

    /// Whether the engine still holds its callback context
    pub fn holds_context(&self) -> bool {
        lock(&self.state.context).is_some()
    }

    /// Post an event as if the engine produced it
    ///
    /// Returns false once the context has been let go.
    pub fn emit(&self, event: impl Into<NativeEvent>) -> bool {
        match lock(&self.state.context).as_ref() {
            Some(context) => {
                context.dispatch(event);
                true
            }
            None => false,
        }
    }

    /// Let go of the context, as the engine does once its work drains
    pub fn complete_shutdown(&self) {
        if let Some(context) = lock(&self.state.context).take() {
            context.release();
        }
    }
}

struct MockNativeClient {
    state: Arc<MockClientState>,
}

impl NativeClient for MockNativeClient {
    fn start(&self) -> Result<(), CrtError> {
        self.state.starts.fetch_add(1, Ordering::SeqCst);
        match self.state.start_error {
            Some(code) => Err(code.into()),
            None => Ok(()),
        }
    }

    fn stop(&self, disconnect: Option<&DisconnectPacket>) -> Result<(), CrtError> {
        lock(&self.state.stops).push(disconnect.cloned());
        match self.state.stop_error {
            Some(code) => Err(code.into()),
            None => Ok(()),
        }
    }

    fn release(self: Box<Self>) {
        self.state.releases.fetch_add(1, Ordering::SeqCst);
        if !self.state.defer_shutdown {
            MockNativeHandle {
                state: Arc::clone(&self.state),
            }
            .complete_shutdown();
        }
    }
}

/// Scriptable engine factory
#[derive(Debug, Default)]
pub struct MockNativeFactory {
    create_error: Option<ErrorCode>,
    start_error: Option<ErrorCode>,
    stop_error: Option<ErrorCode>,
    defer_shutdown: bool,
    create_attempts: AtomicUsize,
    created: Mutex<Vec<MockNativeHandle>>,
}

impl MockNativeFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every create fails with `code`
    pub fn with_create_failure(code: ErrorCode) -> Self {
        Self {
            create_error: Some(code),
            ..Default::default()
        }
    }

    /// Every start fails with `code`
    pub fn failing_start(mut self, code: ErrorCode) -> Self {
        self.start_error = Some(code);
        self
    }

    /// Every stop fails with `code`
    pub fn failing_stop(mut self, code: ErrorCode) -> Self {
        self.stop_error = Some(code);
        self
    }

    /// Keep the context after release until `complete_shutdown` is called
    pub fn deferring_shutdown(mut self) -> Self {
        self.defer_shutdown = true;
        self
    }

    pub fn create_attempts(&self) -> usize {
        self.create_attempts.load(Ordering::SeqCst)
    }

    /// Clients created successfully, oldest first
    pub fn created(&self) -> Vec<MockNativeHandle> {
        lock(&self.created).clone()
    }

    pub fn last_client(&self) -> Option<MockNativeHandle> {
        lock(&self.created).last().cloned()
    }
}

impl NativeClientFactory for MockNativeFactory {
    fn create(
        &self,
        options: NativeClientOptions,
    ) -> Result<Box<dyn NativeClient>, CreateFailure> {
        self.create_attempts.fetch_add(1, Ordering::SeqCst);

        if let Some(code) = self.create_error {
            return Err(CreateFailure {
                error: code.into(),
                context: options.context,
            });
        }

        let state = Arc::new(MockClientState {
            settings: options.settings,
            context: Mutex::new(Some(options.context)),
            starts: AtomicUsize::new(0),
            stops: Mutex::new(Vec::new()),
            releases: AtomicUsize::new(0),
            start_error: self.start_error,
            stop_error: self.stop_error,
            defer_shutdown: self.defer_shutdown,
        });
        lock(&self.created).push(MockNativeHandle {
            state: Arc::clone(&state),
        });

        Ok(Box::new(MockNativeClient { state }))
    }
}
