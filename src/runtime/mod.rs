//! Process-wide subsystem registry
//!
//! The client depends on three subsystems that must be brought up once per
//! process before any client is constructed, and torn down only after every
//! client has gone away:
//!
//! - `Auth` and `EventStream` carry no resources in this crate (their
//!   providers live outside it) and only track their state.
//! - `Mqtt` owns the multi-threaded event loop on which every engine task and
//!   callback dispatcher runs.
//!
//! # Contract
//!
//! [`initialize`] must be called exactly once at startup. Calling it a second
//! time without [`clean_up`] is a caller error: it is logged, not prevented.
//!
//! [`clean_up`] is optional and blocks until every engine task and callback
//! dispatcher has finished. It hangs if any client (or a clone of its
//! context) is still alive. It must be called from synchronous code, outside
//! any async runtime.
//!
//! ```rust,no_run
//! mqttkit::runtime::initialize();
//! // ... construct, use and drop clients ...
//! mqttkit::runtime::clean_up();
//! ```

pub mod tracker;

pub use tracker::{ResourceLease, ResourceTracker};

use crate::config::RuntimeSection;
use crate::error::{
    register_error_table, unregister_error_table, CrtError, ErrorCode, MQTT_KIT_ERROR_TABLE,
};
use once_cell::sync::Lazy;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::{Handle, Runtime};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Subsystems managed by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subsystem {
    Auth,
    EventStream,
    Mqtt,
}

impl Subsystem {
    /// Dependency order; clean-up runs it in reverse
    pub const INIT_ORDER: [Subsystem; 3] = [Subsystem::Auth, Subsystem::EventStream, Subsystem::Mqtt];

    pub fn name(self) -> &'static str {
        match self {
            Subsystem::Auth => "auth",
            Subsystem::EventStream => "event-stream",
            Subsystem::Mqtt => "mqtt",
        }
    }

    fn index(self) -> usize {
        match self {
            Subsystem::Auth => 0,
            Subsystem::EventStream => 1,
            Subsystem::Mqtt => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubsystemState {
    #[default]
    Uninitialized,
    Initialized,
}

#[derive(Debug, Default)]
struct RegistryState {
    states: [SubsystemState; 3],
    init_counts: [u32; 3],
    error_table_registered: bool,
    event_loop: Option<Runtime>,
    shutdown_timeout: Duration,
}

/// Init/clean-up authority for the client's subsystems
///
/// The process normally uses the single instance behind [`global`].
/// Independent instances are useful for isolated tests.
#[derive(Debug, Default)]
pub struct SubsystemRegistry {
    state: Mutex<RegistryState>,
    tracker: Arc<ResourceTracker>,
}

impl SubsystemRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Initialize with default runtime settings
    ///
    /// # Panics
    ///
    /// Panics if a subsystem fails to initialize; there is no way to proceed.
    pub fn initialize(&self) {
        self.initialize_with(&RuntimeSection::default());
    }

    /// Initialize every subsystem with explicit runtime settings
    ///
    /// # Panics
    ///
    /// Panics if a subsystem fails to initialize; there is no way to proceed.
    pub fn initialize_with(&self, config: &RuntimeSection) {
        if let Err(e) = self.try_initialize_with(config) {
            panic!("failed to initialize native subsystems: {e}");
        }
    }

    /// Initialize every subsystem, reporting failure instead of panicking
    ///
    /// A failure leaves earlier subsystems initialized; the process is not
    /// expected to continue.
    pub fn try_initialize_with(&self, config: &RuntimeSection) -> Result<(), CrtError> {
        let mut state = self.lock();

        for subsystem in Subsystem::INIT_ORDER {
            if state.states[subsystem.index()] == SubsystemState::Initialized {
                warn!(
                    subsystem = subsystem.name(),
                    "subsystem initialized again without clean_up"
                );
            }
            Self::init_subsystem(&mut state, subsystem, config)?;
        }

        if !state.error_table_registered {
            register_error_table(&MQTT_KIT_ERROR_TABLE);
            state.error_table_registered = true;
        }

        info!(
            event_loop_threads = config.event_loop_threads,
            "native subsystems initialized"
        );
        Ok(())
    }

    fn init_subsystem(
        state: &mut RegistryState,
        subsystem: Subsystem,
        config: &RuntimeSection,
    ) -> Result<(), CrtError> {
        if subsystem == Subsystem::Mqtt {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(config.event_loop_threads.max(1))
                .thread_name(config.thread_name.clone())
                .enable_all()
                .build()
                .map_err(|e| {
                    error!("Failed to build messaging event loop: {}", e);
                    CrtError::from(ErrorCode::EventLoopUnavailable)
                })?;
            state.event_loop = Some(runtime);
            state.shutdown_timeout = config.shutdown_timeout();
        }

        state.states[subsystem.index()] = SubsystemState::Initialized;
        state.init_counts[subsystem.index()] += 1;
        debug!(subsystem = subsystem.name(), "subsystem initialized");
        Ok(())
    }

    /// Tear every subsystem down in reverse order
    ///
    /// Blocks until all engine tasks and callback dispatchers have drained.
    /// Hangs forever if a client is still alive. Must not be called from
    /// inside an async runtime.
    pub fn clean_up(&self) {
        let (mut event_loop, shutdown_timeout) = {
            let mut state = self.lock();
            if state.error_table_registered {
                unregister_error_table(&MQTT_KIT_ERROR_TABLE);
                state.error_table_registered = false;
            }
            (state.event_loop.take(), state.shutdown_timeout)
        };

        for subsystem in Subsystem::INIT_ORDER.iter().rev().copied() {
            if subsystem == Subsystem::Mqtt {
                info!(
                    live = self.tracker.live(),
                    "waiting for engine resources to drain"
                );
                self.tracker.wait_for_drain();
                if let Some(runtime) = event_loop.take() {
                    runtime.shutdown_timeout(shutdown_timeout);
                }
            }

            self.lock().states[subsystem.index()] = SubsystemState::Uninitialized;
            debug!(subsystem = subsystem.name(), "subsystem cleaned up");
        }

        info!("native subsystems cleaned up");
    }

    pub fn state(&self, subsystem: Subsystem) -> SubsystemState {
        self.lock().states[subsystem.index()]
    }

    /// How many times `subsystem` has been initialized over the registry's life
    pub fn init_count(&self, subsystem: Subsystem) -> u32 {
        self.lock().init_counts[subsystem.index()]
    }

    pub fn is_error_table_registered(&self) -> bool {
        self.lock().error_table_registered
    }

    /// Engine tasks and dispatchers currently alive
    pub fn live_resources(&self) -> usize {
        self.tracker.live()
    }

    /// Handle to the messaging event loop
    ///
    /// Fails with `EventLoopUnavailable` unless the `Mqtt` subsystem is up.
    pub fn event_loop(&self) -> Result<EventLoopHandle, CrtError> {
        let state = self.lock();
        match (&state.event_loop, state.states[Subsystem::Mqtt.index()]) {
            (Some(runtime), SubsystemState::Initialized) => Ok(EventLoopHandle {
                runtime: runtime.handle().clone(),
                tracker: Arc::clone(&self.tracker),
            }),
            _ => Err(ErrorCode::EventLoopUnavailable.into()),
        }
    }
}

/// Handle to the messaging event loop that accounts for what it spawns
#[derive(Debug, Clone)]
pub struct EventLoopHandle {
    runtime: Handle,
    tracker: Arc<ResourceTracker>,
}

impl EventLoopHandle {
    /// Spawn a task that holds a resource lease until it finishes
    pub fn spawn<F>(&self, kind: &'static str, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let lease = self.tracker.acquire(kind);
        self.runtime.spawn(async move {
            future.await;
            drop(lease);
        })
    }

    /// Drive `future` to completion on the event loop from synchronous code
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    pub fn handle(&self) -> &Handle {
        &self.runtime
    }
}

static GLOBAL: Lazy<SubsystemRegistry> = Lazy::new(SubsystemRegistry::new);

/// The process-wide registry
pub fn global() -> &'static SubsystemRegistry {
    &GLOBAL
}

/// Initialize the process-wide registry with default settings
///
/// Must be called once before constructing any client.
pub fn initialize() {
    global().initialize();
}

/// Initialize the process-wide registry with explicit runtime settings
pub fn initialize_with(config: &RuntimeSection) {
    global().initialize_with(config);
}

/// Clean up the process-wide registry, blocking until all resources drain
pub fn clean_up() {
    global().clean_up();
}
