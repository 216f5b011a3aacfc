//! Polling Worker Thread Implementation
//!
//! This module contains the main worker loop that runs in a separate thread
//! and owns the [`Driver`]. It communicates with [`PollingService`] handles
//! through crossbeam channels.
//!
//! # Responsibilities
//!
//! - **Command processing**: connect, disconnect, start/stop, tag changes, writes
//! - **Tag polling**: reads every active tag once per cycle at the configured interval
//! - **Decoding**: turns raw bytes into typed values, or error markers
//! - **Storage**: appends one sample per tag per cycle to the [`SampleStore`]
//! - **Status**: publishes state and counters to [`AppStatus`]
//!
//! # Scheduling
//!
//! While polling, the worker waits for commands with `recv_timeout` until the
//! next cycle deadline, so control messages are handled between cycles
//! without busy-waiting. Deadlines advance by the poll interval; a cycle that
//! runs past its successor's deadline is counted as an overrun and the
//! schedule is re-anchored to the current time.
//!
//! [`PollingService`]: super::PollingService

use super::driver::{ConnectTarget, Driver};
use super::read_plan::{ReadPlan, ReadPlanner};
use super::{PollingConfig, ServiceCommand};
use crate::decoder::{decode_at_with, decode_with, encode, merge_bit};
use crate::error::{ReadError, ServiceError, TagSpecError, WriteError};
use crate::events::{EventSink, ScadaEvent};
use crate::status::AppStatus;
use crate::store::SampleStore;
use crate::types::{DataType, Sample, SampleErrorKind, ServiceState, TagSpec, Value};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Wall-clock timestamps that never go backwards
///
/// Anchored once to the system clock, then advanced by a monotonic
/// `Instant`, so a wall-clock step during a run cannot reorder samples.
#[derive(Debug, Clone)]
pub struct SampleClock {
    wall_anchor: f64,
    mono_anchor: Instant,
    last: f64,
}

impl SampleClock {
    pub fn new() -> Self {
        let wall_anchor = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        Self {
            wall_anchor,
            mono_anchor: Instant::now(),
            last: wall_anchor,
        }
    }

    /// Seconds since the Unix epoch
    pub fn now(&mut self) -> f64 {
        let t = self.wall_anchor + self.mono_anchor.elapsed().as_secs_f64();
        self.last = self.last.max(t);
        self.last
    }
}

impl Default for SampleClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of acquiring one tag
struct Acquired {
    value: Value,
    /// Set when the read failed in a way that took the link down
    link_error: Option<ReadError>,
}

impl Acquired {
    fn decoded(result: Result<Value, crate::error::DecodeError>) -> Self {
        let value = match result {
            Ok(v) => v,
            Err(e) => Value::Error(SampleErrorKind::from(&e)),
        };
        Self {
            value,
            link_error: None,
        }
    }

    fn failed(err: ReadError, driver: &dyn Driver) -> Self {
        let link = is_link_failure(&err, driver);
        Self {
            value: Value::Error(SampleErrorKind::from(&err)),
            link_error: link.then_some(err),
        }
    }
}

/// A read error the session did not survive
fn is_link_failure(err: &ReadError, driver: &dyn Driver) -> bool {
    matches!(err, ReadError::NotConnected) || !driver.is_connected()
}

/// Read and decode one tag, using a coalesced region read when planned
///
/// `cache` holds each region's bytes for the current cycle; `None` marks a
/// region whose block read failed, whose tags fall back to their own reads.
fn acquire(
    driver: &mut dyn Driver,
    spec: &TagSpec,
    tag_index: usize,
    plan: Option<&ReadPlan>,
    cache: &mut HashMap<usize, Option<Vec<u8>>>,
) -> Acquired {
    let order = driver.byte_order();

    if let Some((region_index, region)) = plan.and_then(|p| {
        p.region_index(tag_index)
            .and_then(|r| p.regions().get(r).map(|region| (r, region)))
    }) {
        if !cache.contains_key(&region_index) {
            match driver.read_block(region.area, region.block_index, region.start, region.size) {
                Ok(bytes) => {
                    cache.insert(region_index, Some(bytes));
                }
                Err(e) if is_link_failure(&e, driver) => return Acquired::failed(e, driver),
                Err(e) => {
                    tracing::debug!(
                        "Block read {}{} +{} failed ({}), reading tags individually",
                        region.area,
                        region.block_index,
                        region.start,
                        e
                    );
                    cache.insert(region_index, None);
                }
            }
        }
        if let Some(Some(bytes)) = cache.get(&region_index) {
            return Acquired::decoded(decode_at_with(bytes, region.start, spec, order));
        }
    }

    match driver.read_block(
        spec.area(),
        spec.block_index(),
        spec.byte_offset(),
        spec.size(),
    ) {
        Ok(raw) => Acquired::decoded(decode_with(&raw, spec, order)),
        Err(e) => Acquired::failed(e, driver),
    }
}

/// The worker that owns the driver and runs the polling loop
pub struct PollingWorker {
    /// Controller link
    driver: Box<dyn Driver>,
    /// Durable sample storage
    store: SampleStore,
    /// Shared status written by this worker
    status: AppStatus,
    /// Structured event sink
    events: Arc<dyn EventSink>,
    /// Command receiver from service handles
    command_rx: Receiver<ServiceCommand>,
    /// Cooperative cancellation flag set by `stop_polling`
    stop_flag: Arc<AtomicBool>,
    /// Polling parameters
    config: PollingConfig,
    /// All configured tags, in order
    tags: Vec<TagSpec>,
    /// Indices into `tags` polled each cycle, in order
    active: Vec<usize>,
    /// Tags the driver reported as outside its region (set at start)
    out_of_region: Vec<bool>,
    /// Coalesced read plan for the current run
    plan: Option<ReadPlan>,
    /// Current state
    state: ServiceState,
    /// Target of the open session
    target: Option<ConnectTarget>,
    /// Timestamp source
    clock: SampleClock,
    /// Deadline of the next cycle while polling
    next_deadline: Option<Instant>,
    /// Cycles completed in the current run
    run_cycles: u64,
    /// Running flag
    running: bool,
}

impl PollingWorker {
    pub(crate) fn new(
        driver: Box<dyn Driver>,
        store: SampleStore,
        status: AppStatus,
        events: Arc<dyn EventSink>,
        command_rx: Receiver<ServiceCommand>,
        stop_flag: Arc<AtomicBool>,
        config: PollingConfig,
        tags: Vec<TagSpec>,
    ) -> Self {
        let active = (0..tags.len()).collect();
        status.update(|s| {
            s.active_tags = tags.len();
            s.poll_interval_secs = config.interval.as_secs_f64();
        });
        Self {
            driver,
            store,
            status,
            events,
            command_rx,
            stop_flag,
            config,
            tags,
            active,
            out_of_region: Vec::new(),
            plan: None,
            state: ServiceState::Idle,
            target: None,
            clock: SampleClock::new(),
            next_deadline: None,
            run_cycles: 0,
            running: true,
        }
    }

    /// Run the main worker loop until shutdown or all handles are dropped
    pub fn run(&mut self) {
        let span = tracing::info_span!("poll_worker", target = tracing::field::Empty);
        let _enter = span.enter();
        tracing::info!("Polling worker started");

        while self.running {
            if self.state == ServiceState::Polling {
                let deadline = self.next_deadline.unwrap_or_else(Instant::now);
                let wait = deadline.saturating_duration_since(Instant::now());
                match self.command_rx.recv_timeout(wait) {
                    Ok(cmd) => self.handle_command(cmd),
                    Err(RecvTimeoutError::Timeout) => self.run_cycle(),
                    Err(RecvTimeoutError::Disconnected) => self.running = false,
                }
            } else {
                match self.command_rx.recv() {
                    Ok(cmd) => self.handle_command(cmd),
                    Err(_) => self.running = false,
                }
            }

            if let Some(target) = &self.target {
                span.record("target", tracing::field::display(target));
            }
        }

        // Cleanup
        self.driver.disconnect();
        if self.state != ServiceState::Idle {
            self.set_state(ServiceState::Idle);
        }
        tracing::info!("Polling worker stopped");
    }

    /// Handle a single command
    fn handle_command(&mut self, cmd: ServiceCommand) {
        match cmd {
            ServiceCommand::Connect { target, reply } => {
                let _ = reply.send(self.handle_connect(target));
            }
            ServiceCommand::Disconnect { reply } => {
                self.handle_disconnect();
                let _ = reply.send(());
            }
            ServiceCommand::StartPolling { reply } => {
                let _ = reply.send(self.start_polling());
            }
            ServiceCommand::StopPolling => {
                if self.state == ServiceState::Polling {
                    self.halt_polling();
                }
            }
            ServiceCommand::SetTags { tags, reply } => {
                let _ = reply.send(self.set_tags(tags));
            }
            ServiceCommand::SetActiveTags { names, reply } => {
                let _ = reply.send(self.set_active_tags(names));
            }
            ServiceCommand::SetPollInterval(interval) => {
                self.config.interval = interval;
                self.status
                    .update(|s| s.poll_interval_secs = interval.as_secs_f64());
                tracing::debug!("Poll interval set to {:?}", interval);
            }
            ServiceCommand::WriteTag { name, value, reply } => {
                let _ = reply.send(self.write_tag(&name, value));
            }
            ServiceCommand::ReadOnce { reply } => {
                let _ = reply.send(self.read_once());
            }
            ServiceCommand::DriverStats { reply } => {
                let _ = reply.send(self.driver.stats().clone());
            }
            ServiceCommand::Shutdown => {
                self.running = false;
            }
        }
    }

    fn set_state(&mut self, to: ServiceState) {
        let from = self.state;
        self.state = to;
        self.status.set_service_state(to);
        if from != to {
            tracing::info!("Service state {} -> {}", from, to);
            self.events.emit(ScadaEvent::StateChanged { from, to });
        }
    }

    /// Handle connect command
    fn handle_connect(&mut self, target: ConnectTarget) -> Result<(), ServiceError> {
        if self.state.is_connected() {
            return match &self.target {
                Some(current) if *current == target => Ok(()),
                Some(current) => Err(ServiceError::AlreadyConnected {
                    current: current.to_string(),
                }),
                None => Err(ServiceError::AlreadyConnected {
                    current: "unknown target".to_string(),
                }),
            };
        }

        // From Faulted the old session may linger; start from a clean one
        self.driver.disconnect();
        self.target = Some(target.clone());
        self.status.update(|s| s.target = Some(target.clone()));
        self.set_state(ServiceState::Connecting);

        match self.driver.connect(&target, self.config.connect_timeout) {
            Ok(()) => {
                self.status.update(|s| s.last_error = None);
                self.set_state(ServiceState::Connected);
                tracing::info!("Connected to {}", target);
                self.events.emit(ScadaEvent::Connected { target });
                Ok(())
            }
            Err(e) => {
                let error_msg = format!("Failed to connect to {}: {}", target, e);
                tracing::error!("{}", error_msg);
                self.status.set_error(error_msg);
                self.set_state(ServiceState::Faulted);
                self.events.emit(ScadaEvent::ConnectFailed {
                    target,
                    error: e.to_string(),
                });
                self.target = None;
                self.set_state(ServiceState::Idle);
                Err(e.into())
            }
        }
    }

    /// Handle disconnect command
    fn handle_disconnect(&mut self) {
        if self.state == ServiceState::Polling {
            self.halt_polling();
        }
        self.driver.disconnect();
        self.target = None;
        self.plan = None;
        self.set_state(ServiceState::Idle);
        self.events.emit(ScadaEvent::Disconnected);
        tracing::info!("Disconnected");
    }

    /// Begin a polling run
    ///
    /// Outside `Connected`/`Stopped` the error is recorded and the driver
    /// is left untouched.
    fn start_polling(&mut self) -> Result<(), ServiceError> {
        if self.state == ServiceState::Polling {
            return Ok(());
        }
        if !self.state.can_start_polling() {
            let msg = format!("Cannot start polling in state {}", self.state);
            tracing::warn!("{}", msg);
            self.status.set_error(msg);
            return Err(ServiceError::NotConnected);
        }
        if !self.driver.is_connected() {
            self.fault("driver lost its session before polling started".to_string());
            return Err(ServiceError::NotConnected);
        }

        // Region check: out-of-range tags are reported once, then
        // produce error markers without touching the driver
        self.out_of_region = self
            .tags
            .iter()
            .map(|spec| {
                self.driver
                    .region_size(spec.area(), spec.block_index())
                    .is_some_and(|size| spec.end_offset() > size)
            })
            .collect();
        for (spec, _) in self
            .tags
            .iter()
            .zip(&self.out_of_region)
            .filter(|(_, out)| **out)
        {
            tracing::warn!(
                "Tag '{}' at {} is outside the controller's address range",
                spec.name(),
                spec.address()
            );
            self.events.emit(ScadaEvent::TagOutOfRegion {
                tag: spec.name().to_string(),
            });
        }

        self.plan = self.config.coalesce_gap.map(|gap| {
            let active: HashSet<usize> = self.active.iter().copied().collect();
            let out = &self.out_of_region;
            ReadPlanner::new(gap).plan_filtered(&self.tags, |i| active.contains(&i) && !out[i])
        });
        if let Some(plan) = &self.plan {
            tracing::debug!(
                "Coalesced {} tags into {} block reads",
                self.active.len(),
                plan.regions().len()
            );
        }

        self.run_cycles = 0;
        self.next_deadline = Some(Instant::now());
        self.set_state(ServiceState::Polling);
        self.events.emit(ScadaEvent::PollingStarted {
            tags: self.active.len(),
            interval_secs: self.config.interval.as_secs_f64(),
        });
        Ok(())
    }

    /// Polling -> Stopped
    fn halt_polling(&mut self) {
        self.next_deadline = None;
        self.set_state(ServiceState::Stopped);
        self.events.emit(ScadaEvent::PollingStopped {
            cycles: self.run_cycles,
        });
        tracing::info!("Polling stopped after {} cycles", self.run_cycles);
    }

    /// Record a link failure: release the session and enter Faulted
    fn fault(&mut self, error: String) {
        tracing::error!("Link failure: {}", error);
        self.driver.disconnect();
        self.next_deadline = None;
        self.plan = None;
        self.status.set_error(format!("Link lost: {}", error));
        self.set_state(ServiceState::Faulted);
        self.events.emit(ScadaEvent::LinkLost { error });
    }

    /// Store a sample, containing any failure to this sample only
    fn store_sample(&mut self, sample: &Sample) -> bool {
        match self.store.write(sample) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Dropped sample for '{}': {}", sample.tag_name, e);
                let msg = format!("Store write failed for '{}': {}", sample.tag_name, e);
                self.status.update(|s| {
                    s.store_failures += 1;
                    s.last_error = Some(msg);
                });
                self.events.emit(ScadaEvent::StoreFailure {
                    tag: sample.tag_name.clone(),
                    error: e.to_string(),
                });
                false
            }
        }
    }

    /// Run one poll cycle over the active tags
    fn run_cycle(&mut self) {
        let cycle_start = Instant::now();
        if self.stop_flag.load(Ordering::SeqCst) {
            self.halt_polling();
            return;
        }

        let cycle = self.status.snapshot().cycles_completed + 1;
        let mut cache = HashMap::new();
        let mut written = 0usize;
        let mut tag_errors = 0usize;
        let mut polled = 0usize;

        for pos in 0..self.active.len() {
            if !self.config.finish_cycle_on_stop && self.stop_flag.load(Ordering::SeqCst) {
                break;
            }
            let idx = self.active[pos];

            let acquired = if self.out_of_region.get(idx).copied().unwrap_or(false) {
                Acquired {
                    value: Value::Error(SampleErrorKind::AddressOutOfRange),
                    link_error: None,
                }
            } else {
                acquire(
                    self.driver.as_mut(),
                    &self.tags[idx],
                    idx,
                    self.plan.as_ref(),
                    &mut cache,
                )
            };

            if let Some(err) = acquired.link_error {
                // the rest of the cycle is abandoned
                self.finish_cycle(cycle, written, tag_errors, polled);
                self.fault(format!("reading '{}': {}", self.tags[idx].name(), err));
                return;
            }
            polled += 1;

            let sample = Sample::new(self.tags[idx].name(), self.clock.now(), acquired.value);
            if let Value::Error(kind) = sample.value {
                tag_errors += 1;
                tracing::warn!("Tag '{}' read failed: {}", sample.tag_name, kind);
                self.events.emit(ScadaEvent::TagError {
                    tag: sample.tag_name.clone(),
                    kind,
                });
            }
            if self.store_sample(&sample) {
                written += 1;
            }
        }

        let complete = self.finish_cycle(cycle, written, tag_errors, polled);
        if complete {
            let duration = cycle_start.elapsed();
            tracing::trace!(
                "Cycle {}: {} samples, {} errors in {:?}",
                cycle,
                written,
                tag_errors,
                duration
            );
            self.events.emit(ScadaEvent::CycleCompleted {
                cycle,
                samples: written,
                errors: tag_errors,
                duration_ms: duration.as_secs_f64() * 1000.0,
            });
        }

        if !complete || self.stop_flag.load(Ordering::SeqCst) {
            self.halt_polling();
            return;
        }

        // Schedule the next cycle
        let interval = self.config.interval;
        let scheduled = self.next_deadline.unwrap_or(cycle_start) + interval;
        let now = Instant::now();
        if scheduled < now {
            let late = now - scheduled;
            tracing::debug!("Cycle {} overran by {:?}", cycle, late);
            self.status.update(|s| s.cycles_overrun += 1);
            self.events.emit(ScadaEvent::CycleOverrun {
                cycle,
                late_ms: late.as_secs_f64() * 1000.0,
            });
            self.next_deadline = Some(now + interval);
        } else {
            self.next_deadline = Some(scheduled);
        }
    }

    /// Publish a cycle's counters and end-of-cycle timestamp
    ///
    /// Only a cycle that polled every active tag counts as completed.
    /// Returns whether it did.
    fn finish_cycle(&mut self, cycle: u64, written: usize, tag_errors: usize, polled: usize) -> bool {
        let complete = polled == self.active.len();
        let now = self.clock.now();
        if complete {
            self.run_cycles += 1;
        }
        self.status.update(|s| {
            if complete {
                s.cycles_completed += 1;
            } else {
                s.cycles_interrupted += 1;
            }
            s.samples_written += written as u64;
            s.tag_errors += tag_errors as u64;
            s.last_poll_timestamp = Some(now);
        });
        if !complete {
            let skipped = self.active.len() - polled;
            tracing::debug!("Cycle {} interrupted with {} tags skipped", cycle, skipped);
            self.events.emit(ScadaEvent::CycleInterrupted {
                cycle,
                samples: written,
                errors: tag_errors,
                skipped,
            });
        }
        complete
    }

    /// Replace the tag list
    fn set_tags(&mut self, tags: Vec<TagSpec>) -> Result<(), ServiceError> {
        if self.state == ServiceState::Polling {
            return Err(ServiceError::Busy("set_tags"));
        }
        let mut seen = HashSet::new();
        for tag in &tags {
            if !seen.insert(tag.name()) {
                return Err(TagSpecError::DuplicateName(tag.name().to_string()).into());
            }
        }
        self.store.upsert_tags(&tags)?;

        self.active = (0..tags.len()).collect();
        self.tags = tags;
        self.out_of_region.clear();
        self.plan = None;
        let count = self.tags.len();
        self.status.update(|s| s.active_tags = count);
        tracing::info!("Configured {} tags", count);
        Ok(())
    }

    /// Restrict polling to a subset of the configured tags
    fn set_active_tags(&mut self, names: Vec<String>) -> Result<(), ServiceError> {
        if self.state == ServiceState::Polling {
            return Err(ServiceError::Busy("set_active_tags"));
        }
        if let Some(unknown) = names
            .iter()
            .find(|n| !self.tags.iter().any(|t| t.name() == n.as_str()))
        {
            return Err(ServiceError::UnknownTag(unknown.clone()));
        }
        let wanted: HashSet<&str> = names.iter().map(String::as_str).collect();
        self.active = self
            .tags
            .iter()
            .enumerate()
            .filter(|(_, t)| wanted.contains(t.name()))
            .map(|(i, _)| i)
            .collect();
        let count = self.active.len();
        self.status.update(|s| s.active_tags = count);
        Ok(())
    }

    /// Write a value to a tag, then record it as a sample
    fn write_tag(&mut self, name: &str, value: Value) -> Result<(), ServiceError> {
        if !self.state.is_connected() {
            return Err(ServiceError::NotConnected);
        }
        let Some(spec) = self.tags.iter().find(|t| t.name() == name).cloned() else {
            return Err(ServiceError::UnknownTag(name.to_string()));
        };

        let order = self.driver.byte_order();
        let incompatible = || ServiceError::IncompatibleValue {
            tag: name.to_string(),
            value: value.to_string(),
        };
        let mut bytes = encode(&value, &spec, order).ok_or_else(incompatible)?;

        let result = (|| -> Result<(), WriteError> {
            if spec.data_type() == DataType::Bool {
                let current = self.driver.read_block(
                    spec.area(),
                    spec.block_index(),
                    spec.byte_offset(),
                    1,
                )?;
                let set = bytes.first().is_some_and(|b| *b != 0);
                let byte = current.first().copied().unwrap_or(0);
                bytes = vec![merge_bit(byte, spec.bit_offset(), set)];
            }
            self.driver
                .write_block(spec.area(), spec.block_index(), spec.byte_offset(), &bytes)
        })();

        if let Err(e) = result {
            tracing::error!("Failed to write to tag '{}': {}", name, e);
            if matches!(e, WriteError::NotConnected) || !self.driver.is_connected() {
                self.fault(format!("writing '{}': {}", name, e));
            }
            return Err(e.into());
        }

        // Record what the controller now holds, in canonical form
        let written = decode_with(&bytes, &spec, order).unwrap_or(value);
        tracing::info!("Wrote {} to tag '{}'", written, name);
        self.events.emit(ScadaEvent::TagWritten {
            tag: name.to_string(),
            value: written,
        });
        let sample = Sample::new(name, self.clock.now(), written);
        if self.store_sample(&sample) {
            self.status.update(|s| s.samples_written += 1);
        }
        Ok(())
    }

    /// One synchronous pass over the active tags without storing
    fn read_once(&mut self) -> Result<Vec<Sample>, ServiceError> {
        if self.state == ServiceState::Polling {
            return Err(ServiceError::Busy("read_once"));
        }
        if !self.state.is_connected() {
            return Err(ServiceError::NotConnected);
        }

        let mut cache = HashMap::new();
        let mut samples = Vec::with_capacity(self.active.len());
        for pos in 0..self.active.len() {
            let idx = self.active[pos];
            let acquired = acquire(self.driver.as_mut(), &self.tags[idx], idx, None, &mut cache);
            if let Some(err) = acquired.link_error {
                self.fault(format!("reading '{}': {}", self.tags[idx].name(), err));
                return Err(err.into());
            }
            samples.push(Sample::new(
                self.tags[idx].name(),
                self.clock.now(),
                acquired.value,
            ));
        }
        Ok(samples)
    }
}

#[cfg(all(test, feature = "simulator"))]
mod tests {
    use super::*;
    use crate::backend::simulated::SimulatedDriver;
    use crate::events::NullSink;
    use crate::types::Area;
    use crossbeam_channel::{bounded, Sender};

    fn level() -> TagSpec {
        TagSpec::new("TankLevel", Area::DataBlock, 1, 0, DataType::Real32).unwrap()
    }

    fn pump() -> TagSpec {
        TagSpec::new_bool("PumpOn", Area::DataBlock, 1, 4, 0).unwrap()
    }

    fn create_test_worker() -> (PollingWorker, Sender<ServiceCommand>, SampleStore) {
        let (cmd_tx, cmd_rx) = bounded(16);
        let mut driver = SimulatedDriver::new().with_region(Area::DataBlock, 1, 8);
        driver.set_value(&level(), Value::Float(50.0));
        driver.set_value(&pump(), Value::Bool(true));
        let store = SampleStore::in_memory();
        let worker = PollingWorker::new(
            Box::new(driver),
            store.clone(),
            AppStatus::new(),
            Arc::new(NullSink),
            cmd_rx,
            Arc::new(AtomicBool::new(false)),
            PollingConfig::default(),
            vec![level(), pump()],
        );
        (worker, cmd_tx, store)
    }

    #[test]
    fn test_worker_creation() {
        let (worker, _, _) = create_test_worker();
        assert_eq!(worker.state, ServiceState::Idle);
        assert_eq!(worker.active, vec![0, 1]);
    }

    #[test]
    fn test_start_polling_requires_connection() {
        let (mut worker, _, _) = create_test_worker();
        assert!(matches!(
            worker.start_polling(),
            Err(ServiceError::NotConnected)
        ));
        assert_eq!(worker.state, ServiceState::Idle);
        assert_eq!(worker.driver.stats().successful_reads, 0);
        assert!(worker.status.snapshot().last_error.is_some());
    }

    #[test]
    fn test_connect_and_cycle() {
        let (mut worker, _, store) = create_test_worker();
        worker.handle_connect(ConnectTarget::default()).unwrap();
        assert_eq!(worker.state, ServiceState::Connected);

        worker.start_polling().unwrap();
        assert_eq!(worker.state, ServiceState::Polling);
        worker.run_cycle();

        let latest = store.get_latest_values();
        assert_eq!(latest["TankLevel"].value, Value::Float(50.0));
        assert_eq!(latest["PumpOn"].value, Value::Bool(true));
        assert_eq!(worker.status.snapshot().cycles_completed, 1);
        assert_eq!(worker.status.snapshot().samples_written, 2);
    }

    #[test]
    fn test_connect_other_target_rejected() {
        let (mut worker, _, _) = create_test_worker();
        worker.handle_connect(ConnectTarget::default()).unwrap();
        // same target is a no-op
        worker.handle_connect(ConnectTarget::default()).unwrap();
        let err = worker
            .handle_connect(ConnectTarget::new("10.0.0.9", 0, 1))
            .unwrap_err();
        assert!(matches!(err, ServiceError::AlreadyConnected { .. }));
    }

    #[test]
    fn test_set_tags_rejects_duplicates_and_busy() {
        let (mut worker, _, _) = create_test_worker();
        let err = worker.set_tags(vec![level(), level()]).unwrap_err();
        assert!(matches!(
            err,
            ServiceError::TagSpec(TagSpecError::DuplicateName(_))
        ));

        worker.handle_connect(ConnectTarget::default()).unwrap();
        worker.start_polling().unwrap();
        assert!(matches!(
            worker.set_tags(vec![level()]),
            Err(ServiceError::Busy(_))
        ));
        assert!(matches!(
            worker.set_active_tags(vec!["TankLevel".into()]),
            Err(ServiceError::Busy(_))
        ));
    }

    #[test]
    fn test_set_active_tags() {
        let (mut worker, _, _) = create_test_worker();
        worker.set_active_tags(vec!["PumpOn".into()]).unwrap();
        assert_eq!(worker.active, vec![1]);
        assert!(matches!(
            worker.set_active_tags(vec!["Nope".into()]),
            Err(ServiceError::UnknownTag(_))
        ));
    }

    #[test]
    fn test_shutdown_command() {
        let (mut worker, cmd_tx, _) = create_test_worker();
        cmd_tx.send(ServiceCommand::Shutdown).unwrap();
        worker.run();
        assert!(!worker.running);
    }

    #[test]
    fn test_sample_clock_is_monotonic() {
        let mut clock = SampleClock::new();
        let mut last = clock.now();
        for _ in 0..1000 {
            let t = clock.now();
            assert!(t >= last);
            last = t;
        }
    }
}
