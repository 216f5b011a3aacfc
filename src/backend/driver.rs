//! Driver trait for controller links
//!
//! This module provides the capability contract every controller link
//! implements, so the polling worker can run against a real PLC over
//! ISO-on-TCP or against the in-memory simulator without knowing which.

use crate::error::{ConnectError, ReadError, WriteError};
use crate::types::{Area, ByteOrder};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

/// Size of the rolling window for recent read times
const RECENT_WINDOW_SIZE: usize = 100;

/// Default ISO-on-TCP port
pub const DEFAULT_PORT: u16 = 102;

/// Where to connect: controller address plus rack/slot of the CPU
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectTarget {
    /// Host name or IP address
    pub address: String,
    /// CPU rack number
    #[serde(default)]
    pub rack: u16,
    /// CPU slot number
    #[serde(default = "default_slot")]
    pub slot: u16,
    /// TCP port
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_slot() -> u16 {
    1
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl ConnectTarget {
    pub fn new(address: impl Into<String>, rack: u16, slot: u16) -> Self {
        Self {
            address: address.into(),
            rack,
            slot,
            port: DEFAULT_PORT,
        }
    }

    /// Override the TCP port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// `host:port` form for socket resolution
    pub fn socket_address(&self) -> String {
        if self.address.contains(':') && !self.address.starts_with('[') {
            // bare IPv6 literal
            format!("[{}]:{}", self.address, self.port)
        } else {
            format!("{}:{}", self.address, self.port)
        }
    }
}

impl Default for ConnectTarget {
    fn default() -> Self {
        Self::new("127.0.0.1", 0, 1)
    }
}

impl fmt::Display for ConnectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} (rack {}, slot {})",
            self.address, self.port, self.rack, self.slot
        )
    }
}

/// Statistics for driver operations
///
/// Tracks success rates, timing, throughput, and latency metrics for block reads.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverStats {
    /// Total number of successful reads
    pub successful_reads: u64,
    /// Total number of failed reads
    pub failed_reads: u64,
    /// Total read time in microseconds
    pub total_read_time_us: u64,
    /// Last read time in microseconds
    pub last_read_time_us: u64,
    /// Total bytes read
    pub total_bytes_read: u64,

    // Latency tracking
    /// Minimum read time observed (microseconds)
    pub min_read_time_us: u64,
    /// Maximum read time observed (microseconds)
    pub max_read_time_us: u64,
    /// Rolling window of recent read times for jitter calculation
    pub recent_read_times: VecDeque<u64>,

    /// Number of successful block writes
    pub writes: u64,
    /// Number of failed block writes
    pub failed_writes: u64,
}

impl Default for DriverStats {
    fn default() -> Self {
        Self {
            successful_reads: 0,
            failed_reads: 0,
            total_read_time_us: 0,
            last_read_time_us: 0,
            total_bytes_read: 0,
            min_read_time_us: u64::MAX,
            max_read_time_us: 0,
            recent_read_times: VecDeque::with_capacity(RECENT_WINDOW_SIZE),
            writes: 0,
            failed_writes: 0,
        }
    }
}

impl DriverStats {
    /// Calculate average read time in microseconds
    pub fn avg_read_time_us(&self) -> f64 {
        if self.successful_reads == 0 {
            0.0
        } else {
            self.total_read_time_us as f64 / self.successful_reads as f64
        }
    }

    /// Calculate success rate as percentage
    pub fn success_rate(&self) -> f64 {
        let total = self.successful_reads + self.failed_reads;
        if total == 0 {
            100.0
        } else {
            (self.successful_reads as f64 / total as f64) * 100.0
        }
    }

    /// Record a successful read operation with latency tracking
    pub fn record_success(&mut self, time_us: u64, bytes: u64) {
        self.successful_reads += 1;
        self.total_read_time_us += time_us;
        self.last_read_time_us = time_us;
        self.total_bytes_read += bytes;

        self.min_read_time_us = self.min_read_time_us.min(time_us);
        self.max_read_time_us = self.max_read_time_us.max(time_us);

        self.recent_read_times.push_back(time_us);
        if self.recent_read_times.len() > RECENT_WINDOW_SIZE {
            self.recent_read_times.pop_front();
        }
    }

    /// Record a failed read operation
    pub fn record_failure(&mut self) {
        self.failed_reads += 1;
    }

    /// Record the outcome of a block write
    pub fn record_write(&mut self, ok: bool) {
        if ok {
            self.writes += 1;
        } else {
            self.failed_writes += 1;
        }
    }

    /// Calculate jitter (max - min) over recent window in microseconds
    pub fn jitter_us(&self) -> u64 {
        self.recent_max_us().saturating_sub(self.recent_min_us())
    }

    /// Calculate standard deviation of recent read times in microseconds
    pub fn stddev_us(&self) -> f64 {
        if self.recent_read_times.len() < 2 {
            return 0.0;
        }
        let n = self.recent_read_times.len() as f64;
        let mean = self.recent_read_times.iter().sum::<u64>() as f64 / n;
        let variance = self
            .recent_read_times
            .iter()
            .map(|&t| (t as f64 - mean).powi(2))
            .sum::<f64>()
            / (n - 1.0);
        variance.sqrt()
    }

    /// Get the recent min read time (from rolling window)
    pub fn recent_min_us(&self) -> u64 {
        self.recent_read_times.iter().min().copied().unwrap_or(0)
    }

    /// Get the recent max read time (from rolling window)
    pub fn recent_max_us(&self) -> u64 {
        self.recent_read_times.iter().max().copied().unwrap_or(0)
    }

    /// Reset all statistics
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Unified interface for controller links
///
/// Implementations must be `Send` so the polling worker thread can own
/// them. The worker never inspects the concrete type; everything it needs
/// goes through these methods.
///
/// Every blocking call is bounded: `connect` by its `timeout` argument,
/// reads and writes by whatever I/O timeout the driver was built with.
pub trait Driver: Send {
    /// Open a session to `target`
    ///
    /// A no-op returning `Ok` if a session is already open. Callers must
    /// `disconnect` before switching targets.
    fn connect(&mut self, target: &ConnectTarget, timeout: Duration) -> Result<(), ConnectError>;

    /// Close the session; a no-op when not connected
    fn disconnect(&mut self);

    /// Whether a session is currently open (never blocks)
    fn is_connected(&self) -> bool;

    /// Read `length` bytes starting at `byte_offset`
    ///
    /// `block_index` selects the data block for [`Area::DataBlock`] and is
    /// ignored for the other areas.
    fn read_block(
        &mut self,
        area: Area,
        block_index: u16,
        byte_offset: usize,
        length: usize,
    ) -> Result<Vec<u8>, ReadError>;

    /// Write `data` starting at `byte_offset`
    fn write_block(
        &mut self,
        area: Area,
        block_index: u16,
        byte_offset: usize,
        data: &[u8],
    ) -> Result<(), WriteError>;

    /// Byte order of multi-byte values on this link
    fn byte_order(&self) -> ByteOrder {
        ByteOrder::BigEndian
    }

    /// Addressable size of an area/block in bytes, if the driver knows it
    fn region_size(&self, _area: Area, _block_index: u16) -> Option<usize> {
        None
    }

    /// Get driver operation statistics
    fn stats(&self) -> &DriverStats;

    /// Get mutable reference to driver statistics
    fn stats_mut(&mut self) -> &mut DriverStats;

    /// Reset driver statistics
    fn reset_stats(&mut self) {
        self.stats_mut().reset();
    }
}
