//! Structured events emitted by the polling service
//!
//! The service reports what it does through an injected [`EventSink`]
//! instead of printing. Pick a sink to match the host:
//!
//! - [`ChannelSink`] - forward events to another thread over a bounded channel
//! - [`EventLog`] - keep the last N formatted lines, like a UI console
//! - [`NullSink`] - discard everything
//!
//! Events are also traced through `tracing` by the service itself, so a
//! sink is only needed when the host wants to react to them.

use crate::backend::ConnectTarget;
use crate::types::{SampleErrorKind, ServiceState, Value};
use chrono::{DateTime, Local};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Default number of lines kept by [`EventLog`]
pub const DEFAULT_EVENT_LOG_CAPACITY: usize = 2000;

/// Severity of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventLevel {
    Info,
    Warn,
    Error,
}

/// Something the polling service did or observed
#[derive(Debug, Clone, PartialEq)]
pub enum ScadaEvent {
    StateChanged {
        from: ServiceState,
        to: ServiceState,
    },
    Connected {
        target: ConnectTarget,
    },
    ConnectFailed {
        target: ConnectTarget,
        error: String,
    },
    Disconnected,
    PollingStarted {
        tags: usize,
        interval_secs: f64,
    },
    PollingStopped {
        cycles: u64,
    },
    CycleCompleted {
        cycle: u64,
        samples: usize,
        errors: usize,
        duration_ms: f64,
    },
    /// Cycle cut short by a stop request or a link failure
    CycleInterrupted {
        cycle: u64,
        samples: usize,
        errors: usize,
        /// Active tags never reached in this cycle
        skipped: usize,
    },
    CycleOverrun {
        cycle: u64,
        late_ms: f64,
    },
    TagError {
        tag: String,
        kind: SampleErrorKind,
    },
    /// Tag lies outside the region the driver reports
    TagOutOfRegion {
        tag: String,
    },
    StoreFailure {
        tag: String,
        error: String,
    },
    LinkLost {
        error: String,
    },
    TagWritten {
        tag: String,
        value: Value,
    },
}

impl ScadaEvent {
    pub fn level(&self) -> EventLevel {
        match self {
            ScadaEvent::ConnectFailed { .. }
            | ScadaEvent::LinkLost { .. }
            | ScadaEvent::StoreFailure { .. } => EventLevel::Error,
            ScadaEvent::TagError { .. }
            | ScadaEvent::TagOutOfRegion { .. }
            | ScadaEvent::CycleInterrupted { .. }
            | ScadaEvent::CycleOverrun { .. } => EventLevel::Warn,
            _ => EventLevel::Info,
        }
    }
}

impl fmt::Display for ScadaEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScadaEvent::StateChanged { from, to } => write!(f, "State {} -> {}", from, to),
            ScadaEvent::Connected { target } => write!(f, "Connected to {}", target),
            ScadaEvent::ConnectFailed { target, error } => {
                write!(f, "Connect to {} failed: {}", target, error)
            }
            ScadaEvent::Disconnected => write!(f, "Disconnected"),
            ScadaEvent::PollingStarted {
                tags,
                interval_secs,
            } => write!(f, "Polling {} tags every {:.3}s", tags, interval_secs),
            ScadaEvent::PollingStopped { cycles } => {
                write!(f, "Polling stopped after {} cycles", cycles)
            }
            ScadaEvent::CycleCompleted {
                cycle,
                samples,
                errors,
                duration_ms,
            } => write!(
                f,
                "Cycle {}: {} samples, {} errors in {:.1} ms",
                cycle, samples, errors, duration_ms
            ),
            ScadaEvent::CycleInterrupted {
                cycle,
                samples,
                errors,
                skipped,
            } => write!(
                f,
                "Cycle {} interrupted: {} samples, {} errors, {} tags skipped",
                cycle, samples, errors, skipped
            ),
            ScadaEvent::CycleOverrun { cycle, late_ms } => {
                write!(f, "Cycle {} overran by {:.1} ms", cycle, late_ms)
            }
            ScadaEvent::TagError { tag, kind } => write!(f, "Tag '{}': {}", tag, kind),
            ScadaEvent::TagOutOfRegion { tag } => {
                write!(f, "Tag '{}' is outside the controller's address range", tag)
            }
            ScadaEvent::StoreFailure { tag, error } => {
                write!(f, "Dropped sample for '{}': {}", tag, error)
            }
            ScadaEvent::LinkLost { error } => write!(f, "Link lost: {}", error),
            ScadaEvent::TagWritten { tag, value } => write!(f, "Wrote {} to '{}'", value, tag),
        }
    }
}

/// Receiver of service events
///
/// Called from the worker thread; implementations must not block for long.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ScadaEvent);
}

impl<T: EventSink + ?Sized> EventSink for Arc<T> {
    fn emit(&self, event: ScadaEvent) {
        (**self).emit(event)
    }
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: ScadaEvent) {}
}

/// Forwards events over a bounded channel, dropping when the reader lags
#[derive(Debug)]
pub struct ChannelSink {
    tx: Sender<ScadaEvent>,
    dropped: AtomicU64,
}

impl ChannelSink {
    /// Create a sink and the receiver that drains it
    pub fn new(capacity: usize) -> (Self, Receiver<ScadaEvent>) {
        let (tx, rx) = bounded(capacity);
        (
            Self {
                tx,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    /// Events discarded because the channel was full or closed
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: ScadaEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// One line in an [`EventLog`]
#[derive(Debug, Clone)]
pub struct EventLine {
    pub time: DateTime<Local>,
    pub level: EventLevel,
    pub message: String,
}

impl fmt::Display for EventLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            EventLevel::Info => "INFO",
            EventLevel::Warn => "WARN",
            EventLevel::Error => "ERROR",
        };
        write!(
            f,
            "[{}] {:<5} {}",
            self.time.format("%H:%M:%S%.3f"),
            level,
            self.message
        )
    }
}

/// Bounded console of recent events
#[derive(Debug)]
pub struct EventLog {
    lines: Mutex<VecDeque<EventLine>>,
    capacity: usize,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_EVENT_LOG_CAPACITY))),
            capacity: capacity.max(1),
        }
    }

    /// Copy of the retained lines, oldest first
    pub fn lines(&self) -> Vec<EventLine> {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_LOG_CAPACITY)
    }
}

impl EventSink for EventLog {
    fn emit(&self, event: ScadaEvent) {
        let line = EventLine {
            time: Local::now(),
            level: event.level(),
            message: event.to_string(),
        };
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        if lines.len() >= self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_levels() {
        assert_eq!(ScadaEvent::Disconnected.level(), EventLevel::Info);
        assert_eq!(
            ScadaEvent::LinkLost {
                error: "x".into()
            }
            .level(),
            EventLevel::Error
        );
        assert_eq!(
            ScadaEvent::TagError {
                tag: "t".into(),
                kind: SampleErrorKind::Timeout
            }
            .level(),
            EventLevel::Warn
        );
    }

    #[test]
    fn test_channel_sink_drops_when_full() {
        let (sink, rx) = ChannelSink::new(2);
        for _ in 0..5 {
            sink.emit(ScadaEvent::Disconnected);
        }
        assert_eq!(rx.try_iter().count(), 2);
        assert_eq!(sink.dropped(), 3);
    }

    #[test]
    fn test_event_log_ring_buffer() {
        let log = EventLog::new(3);
        for cycle in 0..5 {
            log.emit(ScadaEvent::PollingStopped { cycles: cycle });
        }
        let lines = log.lines();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].message, "Polling stopped after 2 cycles");
        assert!(lines[2].to_string().contains("INFO"));
        log.clear();
        assert!(log.is_empty());
    }

    #[test]
    fn test_arc_sink_forwards() {
        let log = Arc::new(EventLog::new(10));
        let sink: Arc<dyn EventSink> = log.clone();
        sink.emit(ScadaEvent::Disconnected);
        assert_eq!(log.len(), 1);
    }
}
