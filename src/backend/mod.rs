//! Backend module for controller polling
//!
//! This module handles all controller communication in a separate thread so
//! control calls never block on network I/O longer than they must. It uses
//! crossbeam channels for thread-safe communication with the caller.
//!
//! # Architecture
//!
//! The worker runs in its own thread, owning the driver exclusively:
//!
//! - [`PollingService`] - Caller-side handle: connect, start/stop, write, status
//! - [`PollingWorker`] - Worker loop that processes commands and polls tags
//! - `ServiceCommand` - Messages sent from handle to worker (crate-internal)
//!
//! Results flow back through the [`SampleStore`] and the shared
//! [`AppStatus`]; structured events go to an injected [`EventSink`].
//!
//! # Components
//!
//! - [`Driver`] - Capability contract for a controller link
//! - [`S7Driver`] - ISO-on-TCP client for S7-style PLCs
//! - [`SimulatedDriver`] - In-memory controller for testing (feature-gated)
//! - [`ReadPlanner`] - Coalesces nearby tags into block reads
//!
//! # Example
//!
//! ```ignore
//! use mini_scada::backend::{PollingService, SimulatedDriver};
//! use mini_scada::store::SampleStore;
//!
//! let service = PollingService::builder(SimulatedDriver::demo())
//!     .store(SampleStore::open("./workspace")?)
//!     .tags(tags)
//!     .spawn()?;
//!
//! service.connect("192.168.0.10", 0, 1)?;
//! service.start_polling()?;
//!
//! let latest = service.store().get_latest_values();
//! service.stop_polling();
//! service.shutdown()?;
//! ```

pub mod driver;
pub mod read_plan;
pub mod s7;
#[cfg(feature = "simulator")]
pub mod simulated;
pub mod worker;

pub use driver::{ConnectTarget, Driver, DriverStats, DEFAULT_PORT};
pub use read_plan::{ReadPlan, ReadPlanner, ReadRegion, DEFAULT_GAP_THRESHOLD};
pub use s7::{S7Driver, DEFAULT_IO_TIMEOUT_MS};
#[cfg(feature = "simulator")]
pub use simulated::{AnimatedTag, SimControls, SimPattern, SimulatedDriver};
pub use worker::{PollingWorker, SampleClock};

use crate::error::ServiceError;
use crate::events::{EventSink, NullSink};
use crate::status::{AppStatus, StatusSnapshot};
use crate::store::SampleStore;
use crate::types::{Sample, TagSpec, Value};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Command channel depth
const COMMAND_CHANNEL_SIZE: usize = 256;

/// Slack added to reply waits on top of one poll cycle
const REPLY_GRACE: Duration = Duration::from_secs(5);

/// Shortest accepted poll interval
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Commands sent from a [`PollingService`] to its worker
pub(crate) enum ServiceCommand {
    Connect {
        target: ConnectTarget,
        reply: Sender<Result<(), ServiceError>>,
    },
    Disconnect {
        reply: Sender<()>,
    },
    StartPolling {
        reply: Sender<Result<(), ServiceError>>,
    },
    StopPolling,
    SetTags {
        tags: Vec<TagSpec>,
        reply: Sender<Result<(), ServiceError>>,
    },
    SetActiveTags {
        names: Vec<String>,
        reply: Sender<Result<(), ServiceError>>,
    },
    SetPollInterval(Duration),
    WriteTag {
        name: String,
        value: Value,
        reply: Sender<Result<(), ServiceError>>,
    },
    ReadOnce {
        reply: Sender<Result<Vec<Sample>, ServiceError>>,
    },
    DriverStats {
        reply: Sender<DriverStats>,
    },
    Shutdown,
}

/// Polling parameters
#[derive(Debug, Clone, PartialEq)]
pub struct PollingConfig {
    /// Time between cycle starts
    pub interval: Duration,
    /// Let an in-flight cycle finish all tags when stop is requested
    pub finish_cycle_on_stop: bool,
    /// Coalesce tags into block reads when their gap is at most this many bytes
    pub coalesce_gap: Option<usize>,
    /// Upper bound for establishing a session
    pub connect_timeout: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            finish_cycle_on_stop: false,
            coalesce_gap: None,
            connect_timeout: Duration::from_millis(2000),
        }
    }
}

/// Builder for a [`PollingService`]
pub struct PollingServiceBuilder {
    driver: Box<dyn Driver>,
    store: Option<SampleStore>,
    tags: Vec<TagSpec>,
    config: PollingConfig,
    events: Arc<dyn EventSink>,
    status: AppStatus,
}

impl PollingServiceBuilder {
    /// Where samples go (defaults to an in-memory store)
    pub fn store(mut self, store: SampleStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Initial tag list
    pub fn tags(mut self, tags: Vec<TagSpec>) -> Self {
        self.tags = tags;
        self
    }

    pub fn config(mut self, config: PollingConfig) -> Self {
        self.config = config;
        self
    }

    /// Sink for structured events (defaults to [`NullSink`])
    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Publish status into an existing handle
    pub fn status(mut self, status: AppStatus) -> Self {
        self.status = status;
        self
    }

    /// Validate the tags, register them with the store and start the worker thread
    pub fn spawn(self) -> Result<PollingService, ServiceError> {
        let mut seen = std::collections::HashSet::new();
        for tag in &self.tags {
            if !seen.insert(tag.name()) {
                return Err(crate::error::TagSpecError::DuplicateName(tag.name().to_string()).into());
            }
        }

        let store = self.store.unwrap_or_else(SampleStore::in_memory);
        if !self.tags.is_empty() {
            store.upsert_tags(&self.tags)?;
        }

        let mut config = self.config;
        config.interval = config.interval.max(MIN_POLL_INTERVAL);

        let (command_tx, command_rx) = bounded(COMMAND_CHANNEL_SIZE);
        let stop_flag = Arc::new(AtomicBool::new(false));

        let mut worker = PollingWorker::new(
            self.driver,
            store.clone(),
            self.status.clone(),
            self.events,
            command_rx,
            Arc::clone(&stop_flag),
            config.clone(),
            self.tags,
        );

        let handle = std::thread::Builder::new()
            .name("mini-scada-poll".to_string())
            .spawn(move || worker.run())
            .map_err(|e| {
                tracing::error!("Failed to spawn polling worker: {}", e);
                ServiceError::WorkerGone
            })?;

        Ok(PollingService {
            command_tx,
            status: self.status,
            store,
            stop_flag,
            worker: Some(handle),
            connect_timeout: config.connect_timeout,
            interval: config.interval,
        })
    }
}

/// Caller-side handle to the polling worker
///
/// Control calls that need an answer (connect, write, tag changes) block
/// until the worker replies; the worker handles them between poll cycles.
/// Dropping the handle shuts the worker down.
pub struct PollingService {
    command_tx: Sender<ServiceCommand>,
    status: AppStatus,
    store: SampleStore,
    stop_flag: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    connect_timeout: Duration,
    interval: Duration,
}

impl PollingService {
    /// Start building a service around a driver
    pub fn builder(driver: impl Driver + 'static) -> PollingServiceBuilder {
        Self::builder_boxed(Box::new(driver))
    }

    /// Start building a service around a driver chosen at runtime
    pub fn builder_boxed(driver: Box<dyn Driver>) -> PollingServiceBuilder {
        PollingServiceBuilder {
            driver,
            store: None,
            tags: Vec::new(),
            config: PollingConfig::default(),
            events: Arc::new(NullSink),
            status: AppStatus::new(),
        }
    }

    fn send(&self, cmd: ServiceCommand) -> Result<(), ServiceError> {
        self.command_tx
            .send(cmd)
            .map_err(|_| ServiceError::WorkerGone)
    }

    fn await_reply<T>(&self, rx: Receiver<T>, timeout: Duration) -> Result<T, ServiceError> {
        match rx.recv_timeout(timeout) {
            Ok(value) => Ok(value),
            Err(RecvTimeoutError::Timeout) => Err(ServiceError::ReplyTimeout),
            Err(RecvTimeoutError::Disconnected) => Err(ServiceError::WorkerGone),
        }
    }

    /// Send a command carrying a reply channel and wait for the answer
    fn request<T>(
        &self,
        make: impl FnOnce(Sender<T>) -> ServiceCommand,
        timeout: Duration,
    ) -> Result<T, ServiceError> {
        let (reply_tx, reply_rx) = bounded(1);
        self.send(make(reply_tx))?;
        self.await_reply(reply_rx, timeout)
    }

    fn cycle_timeout(&self) -> Duration {
        self.interval + REPLY_GRACE
    }

    /// Connect to a controller on the default port
    pub fn connect(&self, address: &str, rack: u16, slot: u16) -> Result<(), ServiceError> {
        self.connect_target(ConnectTarget::new(address, rack, slot))
    }

    /// Connect to a controller
    ///
    /// Connecting again to the same target is a no-op; connecting to a
    /// different one while a session is open fails with `AlreadyConnected`.
    /// From `Faulted` this opens a fresh session.
    pub fn connect_target(&self, target: ConnectTarget) -> Result<(), ServiceError> {
        let timeout = self.connect_timeout + self.cycle_timeout();
        self.request(|reply| ServiceCommand::Connect { target, reply }, timeout)?
    }

    /// Stop polling if running, then close the session
    pub fn disconnect(&self) -> Result<(), ServiceError> {
        self.stop_flag.store(true, Ordering::SeqCst);
        self.request(|reply| ServiceCommand::Disconnect { reply }, self.cycle_timeout())
    }

    /// Begin cyclic polling
    ///
    /// Returns once the worker has entered `Polling`. Fails with
    /// `NotConnected`, without touching the controller, unless the service
    /// is `Connected` or `Stopped`. A preceding `stop_polling` is applied
    /// first, so stop followed by start always ends up polling.
    pub fn start_polling(&self) -> Result<(), ServiceError> {
        self.stop_flag.store(false, Ordering::SeqCst);
        self.request(
            |reply| ServiceCommand::StartPolling { reply },
            self.cycle_timeout(),
        )?
    }

    /// Request polling to halt
    ///
    /// The worker stops at the next tag boundary (or at the end of the
    /// cycle with `finish_cycle_on_stop`); samples already taken are kept.
    pub fn stop_polling(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        let _ = self.send(ServiceCommand::StopPolling);
    }

    /// Write a value to a tag and record it as a sample
    pub fn write_tag(&self, name: &str, value: Value) -> Result<(), ServiceError> {
        let name = name.to_string();
        self.request(
            |reply| ServiceCommand::WriteTag { name, value, reply },
            self.cycle_timeout(),
        )?
    }

    /// Replace the tag list (not while polling)
    pub fn set_tags(&self, tags: Vec<TagSpec>) -> Result<(), ServiceError> {
        self.request(
            |reply| ServiceCommand::SetTags { tags, reply },
            self.cycle_timeout(),
        )?
    }

    /// Poll only the named tags (not while polling)
    pub fn set_active_tags<S: AsRef<str>>(&self, names: &[S]) -> Result<(), ServiceError> {
        let names = names.iter().map(|n| n.as_ref().to_string()).collect();
        self.request(
            |reply| ServiceCommand::SetActiveTags { names, reply },
            self.cycle_timeout(),
        )?
    }

    /// Change the poll interval; takes effect from the next cycle
    pub fn set_poll_interval(&mut self, interval: Duration) -> Result<(), ServiceError> {
        let interval = interval.max(MIN_POLL_INTERVAL);
        self.interval = interval;
        self.send(ServiceCommand::SetPollInterval(interval))
    }

    /// Read every active tag once without storing (not while polling)
    pub fn read_once(&self) -> Result<Vec<Sample>, ServiceError> {
        self.request(|reply| ServiceCommand::ReadOnce { reply }, self.cycle_timeout())?
    }

    /// Copy of the driver's transfer statistics
    pub fn driver_stats(&self) -> Result<DriverStats, ServiceError> {
        self.request(|reply| ServiceCommand::DriverStats { reply }, self.cycle_timeout())
    }

    /// Consistent copy of the current status
    pub fn status(&self) -> StatusSnapshot {
        self.status.snapshot()
    }

    /// Shared status handle for observers on other threads
    pub fn status_handle(&self) -> AppStatus {
        self.status.clone()
    }

    pub fn store(&self) -> &SampleStore {
        &self.store
    }

    /// Stop the worker and wait for it to exit
    pub fn shutdown(mut self) -> Result<(), ServiceError> {
        self.join_worker()
    }

    fn join_worker(&mut self) -> Result<(), ServiceError> {
        let Some(handle) = self.worker.take() else {
            return Ok(());
        };
        self.stop_flag.store(true, Ordering::SeqCst);
        let _ = self.command_tx.send(ServiceCommand::Shutdown);
        handle.join().map_err(|_| {
            tracing::error!("Polling worker panicked");
            ServiceError::WorkerGone
        })?;
        if let Err(e) = self.store.sync() {
            tracing::warn!("Failed to sync sample store on shutdown: {}", e);
        }
        Ok(())
    }
}

impl Drop for PollingService {
    fn drop(&mut self) {
        let _ = self.join_worker();
    }
}
