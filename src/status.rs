//! Shared application status
//!
//! The polling worker publishes its state here; any number of observers
//! read consistent copies through [`AppStatus::snapshot`].

use crate::backend::ConnectTarget;
use crate::types::{ConnectionState, ServiceState};
use serde::Serialize;
use std::sync::{Arc, RwLock};

/// Point-in-time copy of the service status
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub service_state: ServiceState,
    pub connection_state: ConnectionState,
    /// Target of the current (or last attempted) session
    pub target: Option<ConnectTarget>,
    /// Wall-clock seconds at the end of the last poll cycle, full or interrupted
    pub last_poll_timestamp: Option<f64>,
    /// Most recent error, kept until the next successful connect
    pub last_error: Option<String>,
    /// Cycles that polled every active tag
    pub cycles_completed: u64,
    /// Cycles cut short by a stop request or a link failure
    pub cycles_interrupted: u64,
    /// Cycles that took longer than the poll interval
    pub cycles_overrun: u64,
    pub samples_written: u64,
    /// Error-marker samples produced by per-tag failures
    pub tag_errors: u64,
    /// Samples dropped because the store rejected them
    pub store_failures: u64,
    pub active_tags: usize,
    pub poll_interval_secs: f64,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            service_state: ServiceState::Idle,
            connection_state: ConnectionState::Disconnected,
            target: None,
            last_poll_timestamp: None,
            last_error: None,
            cycles_completed: 0,
            cycles_interrupted: 0,
            cycles_overrun: 0,
            samples_written: 0,
            tag_errors: 0,
            store_failures: 0,
            active_tags: 0,
            poll_interval_secs: 1.0,
        }
    }
}

/// Shared, read-mostly status handle
///
/// Cloning shares the same status. Only the crate mutates it, and every
/// mutation swaps in a complete new snapshot under the write lock.
#[derive(Debug, Clone, Default)]
pub struct AppStatus {
    inner: Arc<RwLock<StatusSnapshot>>,
}

impl AppStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consistent copy of the current status
    pub fn snapshot(&self) -> StatusSnapshot {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Build the next snapshot from the current one and publish it
    pub(crate) fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut StatusSnapshot),
    {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let mut next = guard.clone();
        f(&mut next);
        *guard = next;
    }

    pub(crate) fn set_service_state(&self, state: ServiceState) {
        self.update(|s| {
            s.service_state = state;
            s.connection_state = match state {
                ServiceState::Idle => ConnectionState::Disconnected,
                ServiceState::Connecting => ConnectionState::Connecting,
                ServiceState::Faulted => ConnectionState::Faulted,
                _ => ConnectionState::Connected,
            };
        });
    }

    pub(crate) fn set_error(&self, error: impl Into<String>) {
        let error = error.into();
        self.update(|s| s.last_error = Some(error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_snapshot() {
        let status = AppStatus::new();
        let snap = status.snapshot();
        assert_eq!(snap.service_state, ServiceState::Idle);
        assert_eq!(snap.connection_state, ConnectionState::Disconnected);
        assert!(snap.last_error.is_none());
    }

    #[test]
    fn test_state_drives_connection_state() {
        let status = AppStatus::new();
        status.set_service_state(ServiceState::Polling);
        assert_eq!(status.snapshot().connection_state, ConnectionState::Connected);
        status.set_service_state(ServiceState::Faulted);
        assert_eq!(status.snapshot().connection_state, ConnectionState::Faulted);
        status.set_service_state(ServiceState::Connecting);
        assert_eq!(status.snapshot().connection_state, ConnectionState::Connecting);
    }

    #[test]
    fn test_clones_observe_updates() {
        let status = AppStatus::new();
        let observer = status.clone();
        status.update(|s| {
            s.cycles_completed = 3;
            s.samples_written = 6;
        });
        status.set_error("boom");
        let snap = observer.snapshot();
        assert_eq!(snap.cycles_completed, 3);
        assert_eq!(snap.samples_written, 6);
        assert_eq!(snap.last_error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_snapshot_never_torn_under_concurrent_updates() {
        let status = AppStatus::new();
        let writer = status.clone();
        let handle = std::thread::spawn(move || {
            for i in 0..2000u64 {
                writer.update(|s| {
                    s.cycles_completed = i;
                    s.samples_written = i * 2;
                });
            }
        });
        for _ in 0..2000 {
            let snap = status.snapshot();
            assert_eq!(snap.samples_written, snap.cycles_completed * 2);
        }
        handle.join().unwrap();
    }
}
