//! Simulated controller for testing
//!
//! This module provides an in-memory controller that can be used for testing
//! the acquisition pipeline without a real PLC. It keeps one byte image per
//! (area, block) and animates selected tags with configurable patterns.
//!
//! # Features
//!
//! - **Byte images**: read and write DB/I/Q/M regions like a real CPU
//! - **Animated tags**: each tag can follow its own pattern, re-encoded on every read
//! - **Noise simulation**: add configurable noise to generated values,
//!   reproducible per driver through a seeded RNG ([`SimulatedDriver::with_seed`])
//! - **Fault injection**: refuse connects, fail addresses, drop the link
//!
//! # Data Patterns
//!
//! - [`SimPattern::Constant`] - Fixed value (useful for testing static displays)
//! - [`SimPattern::Sine`] - Sinusoidal wave with configurable frequency/amplitude
//! - [`SimPattern::Counter`] - Incrementing counter with wrap-around
//! - [`SimPattern::Random`] - Random values within a range
//! - [`SimPattern::Sawtooth`] - Linear ramp that resets periodically
//! - [`SimPattern::Square`] - Square wave alternating between two values
//! - [`SimPattern::Triangle`] - Triangle wave
//!
//! # Example
//!
//! ```ignore
//! let mut driver = SimulatedDriver::new().with_region(Area::DataBlock, 1, 64);
//! driver.animate(AnimatedTag::new(level_spec, SimPattern::Sine {
//!     frequency: 0.1,
//!     amplitude: 20.0,
//!     offset: 50.0,
//! }));
//! let controls = driver.controls();
//! controls.fail_address(Area::DataBlock, 1, 60, ReadError::Timeout);
//! ```
//!
//! # Enabling
//!
//! The simulator is behind the `simulator` feature, which is on by default.

use crate::decoder::{encode, merge_bit};
use crate::error::{ConnectError, ReadError, WriteError};
use crate::types::{Area, ByteOrder, DataType, TagSpec, Value};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::driver::{ConnectTarget, Driver, DriverStats};

/// Seed used when none is given
pub const DEFAULT_SIM_SEED: u64 = 12345;

/// Pattern for generating simulated data
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SimPattern {
    /// Constant value
    Constant(f64),
    /// Sine wave with frequency and amplitude
    Sine {
        frequency: f64,
        amplitude: f64,
        offset: f64,
    },
    /// Counter that increments on every read
    Counter { step: f64, min: f64, max: f64 },
    /// Random values within range
    Random { min: f64, max: f64 },
    /// Sawtooth wave
    Sawtooth { period: f64, amplitude: f64 },
    /// Square wave
    Square { period: f64, amplitude: f64 },
    /// Triangle wave
    Triangle { period: f64, amplitude: f64 },
}

impl Default for SimPattern {
    fn default() -> Self {
        SimPattern::Sine {
            frequency: 1.0,
            amplitude: 100.0,
            offset: 0.0,
        }
    }
}

/// A tag whose bytes are regenerated from a pattern on every read
#[derive(Debug, Clone)]
pub struct AnimatedTag {
    /// Where the generated value is written
    pub spec: TagSpec,
    /// Data generation pattern
    pub pattern: SimPattern,
    /// Current counter value (for Counter pattern)
    counter_value: f64,
    /// Noise amplitude to add (0.0 = no noise)
    pub noise_amplitude: f64,
}

impl AnimatedTag {
    pub fn new(spec: TagSpec, pattern: SimPattern) -> Self {
        let counter_value = match pattern {
            SimPattern::Counter { min, .. } => min,
            _ => 0.0,
        };
        Self {
            spec,
            pattern,
            counter_value,
            noise_amplitude: 0.0,
        }
    }

    /// Add noise to the generated values
    pub fn with_noise(mut self, amplitude: f64) -> Self {
        self.noise_amplitude = amplitude;
        self
    }

    /// Generate a value based on the pattern and elapsed time
    ///
    /// `rng` feeds the Random pattern and the noise.
    pub fn generate_value<R: Rng + ?Sized>(&mut self, elapsed_secs: f64, rng: &mut R) -> f64 {
        let base_value = match self.pattern {
            SimPattern::Constant(v) => v,
            SimPattern::Sine {
                frequency,
                amplitude,
                offset,
            } => offset + amplitude * (2.0 * std::f64::consts::PI * frequency * elapsed_secs).sin(),
            SimPattern::Counter { step, min, max } => {
                self.counter_value += step;
                if self.counter_value > max {
                    self.counter_value = min;
                } else if self.counter_value < min {
                    self.counter_value = max;
                }
                self.counter_value
            }
            SimPattern::Random { min, max } => min + rng.gen::<f64>() * (max - min),
            SimPattern::Sawtooth { period, amplitude } => {
                let t = elapsed_secs % period;
                amplitude * (t / period)
            }
            SimPattern::Square { period, amplitude } => {
                let t = elapsed_secs % period;
                if t < period / 2.0 {
                    amplitude
                } else {
                    -amplitude
                }
            }
            SimPattern::Triangle { period, amplitude } => {
                let t = elapsed_secs % period;
                let half = period / 2.0;
                if t < half {
                    amplitude * (2.0 * t / half - 1.0)
                } else {
                    amplitude * (1.0 - 2.0 * (t - half) / half)
                }
            }
        };

        if self.noise_amplitude > 0.0 {
            base_value + rng.gen_range(-1.0..=1.0) * self.noise_amplitude
        } else {
            base_value
        }
    }

    /// Convert a generated number into a value of the tag's type
    fn to_value(&self, raw: f64) -> Value {
        match self.spec.data_type() {
            DataType::Bool => Value::Bool(raw > 0.5),
            DataType::Real32 | DataType::Real64 => Value::Float(raw),
            DataType::Byte => Value::Int(raw.round().clamp(0.0, u8::MAX as f64) as i64),
            DataType::Word => Value::Int(raw.round().clamp(0.0, u16::MAX as f64) as i64),
            DataType::DWord => Value::Int(raw.round().clamp(0.0, u32::MAX as f64) as i64),
            DataType::Int16 => {
                Value::Int(raw.round().clamp(i16::MIN as f64, i16::MAX as f64) as i64)
            }
            DataType::Int32 => {
                Value::Int(raw.round().clamp(i32::MIN as f64, i32::MAX as f64) as i64)
            }
            DataType::Raw(_) => Value::Int(0),
        }
    }
}

/// Byte images keyed by (area, block)
#[derive(Debug, Default)]
struct SimMemory {
    images: HashMap<(Area, u16), Vec<u8>>,
}

impl SimMemory {
    fn key(area: Area, block: u16) -> (Area, u16) {
        (area, if area.has_blocks() { block } else { 0 })
    }

    fn add_region(&mut self, area: Area, block: u16, size: usize) {
        self.images.insert(Self::key(area, block), vec![0u8; size]);
    }

    fn size(&self, area: Area, block: u16) -> Option<usize> {
        self.images.get(&Self::key(area, block)).map(Vec::len)
    }

    fn read(&self, area: Area, block: u16, offset: usize, length: usize) -> Option<Vec<u8>> {
        let image = self.images.get(&Self::key(area, block))?;
        let end = offset.checked_add(length)?;
        image.get(offset..end).map(<[u8]>::to_vec)
    }

    fn write(&mut self, area: Area, block: u16, offset: usize, data: &[u8]) -> bool {
        let Some(image) = self.images.get_mut(&Self::key(area, block)) else {
            return false;
        };
        match offset
            .checked_add(data.len())
            .and_then(|end| image.get_mut(offset..end))
        {
            Some(dst) => {
                dst.copy_from_slice(data);
                true
            }
            None => false,
        }
    }
}

/// An address that fails every read covering it
#[derive(Debug, Clone)]
struct AddressFault {
    area: Area,
    block: u16,
    offset: usize,
    error: ReadError,
}

/// Shared simulator state, reachable from [`SimControls`] while the
/// driver itself is owned by the polling worker
#[derive(Debug)]
struct SimState {
    memory: SimMemory,
    animated: Vec<AnimatedTag>,
    rng: ChaCha8Rng,
    refuse_connect: Option<ConnectError>,
    address_faults: Vec<AddressFault>,
    drop_after_reads: Option<u64>,
    reads_since_connect: u64,
    total_reads: u64,
    connects: u64,
}

impl SimState {
    fn new(seed: u64) -> Self {
        Self {
            memory: SimMemory::default(),
            animated: Vec::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            refuse_connect: None,
            address_faults: Vec::new(),
            drop_after_reads: None,
            reads_since_connect: 0,
            total_reads: 0,
            connects: 0,
        }
    }
}

/// Cloneable handle for poking a [`SimulatedDriver`] from outside
#[derive(Debug, Clone)]
pub struct SimControls {
    state: Arc<Mutex<SimState>>,
}

impl SimControls {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Overwrite bytes in an image; returns false if out of range
    pub fn set_bytes(&self, area: Area, block: u16, offset: usize, data: &[u8]) -> bool {
        self.lock().memory.write(area, block, offset, data)
    }

    /// Read bytes straight from an image, bypassing faults and stats
    pub fn bytes(&self, area: Area, block: u16, offset: usize, length: usize) -> Option<Vec<u8>> {
        self.lock().memory.read(area, block, offset, length)
    }

    /// Make every subsequent connect fail with `error`
    pub fn refuse_connect(&self, error: ConnectError) {
        self.lock().refuse_connect = Some(error);
    }

    /// Let connects succeed again
    pub fn accept_connect(&self) {
        self.lock().refuse_connect = None;
    }

    /// Fail every read whose range covers the given byte
    pub fn fail_address(&self, area: Area, block: u16, offset: usize, error: ReadError) {
        self.lock().address_faults.push(AddressFault {
            area,
            block,
            offset,
            error,
        });
    }

    /// Remove all address faults
    pub fn clear_address_faults(&self) {
        self.lock().address_faults.clear();
    }

    /// Drop the link on the read after `reads` successful reads
    ///
    /// Counting restarts on every connect.
    pub fn drop_link_after(&self, reads: u64) {
        let mut state = self.lock();
        state.drop_after_reads = Some(reads);
        state.reads_since_connect = 0;
    }

    /// Total read_block calls since construction
    pub fn total_reads(&self) -> u64 {
        self.lock().total_reads
    }

    /// Number of successful connects since construction
    pub fn connects(&self) -> u64 {
        self.lock().connects
    }
}

/// Simulated controller for testing without real hardware
pub struct SimulatedDriver {
    /// Whether the simulator is "connected"
    connected: bool,
    /// Start time for pattern generation
    start_time: Instant,
    /// Shared images and fault configuration
    state: Arc<Mutex<SimState>>,
    /// Simulated read delay
    read_delay: Duration,
    /// Byte order used for images and animation
    byte_order: ByteOrder,
    /// Driver statistics
    stats: DriverStats,
}

impl SimulatedDriver {
    /// Create a simulator with no regions
    pub fn new() -> Self {
        Self {
            connected: false,
            start_time: Instant::now(),
            state: Arc::new(Mutex::new(SimState::new(DEFAULT_SIM_SEED))),
            read_delay: Duration::ZERO,
            byte_order: ByteOrder::BigEndian,
            stats: DriverStats::default(),
        }
    }

    /// A small tank-farm image: DB1 with a level, a pump bit and a counter,
    /// plus 16 bytes each of I, Q and M
    pub fn demo() -> Self {
        let mut driver = Self::new()
            .with_region(Area::DataBlock, 1, 64)
            .with_region(Area::Input, 0, 16)
            .with_region(Area::Output, 0, 16)
            .with_region(Area::Marker, 0, 16)
            .with_read_delay(Duration::from_micros(100));

        let specs = [
            TagSpec::new("TankLevel", Area::DataBlock, 1, 0, DataType::Real32),
            TagSpec::new_bool("PumpOn", Area::DataBlock, 1, 4, 0),
            TagSpec::new("BatchCount", Area::DataBlock, 1, 6, DataType::Int16),
        ];
        let patterns = [
            SimPattern::Sine {
                frequency: 0.05,
                amplitude: 20.0,
                offset: 50.0,
            },
            SimPattern::Square {
                period: 10.0,
                amplitude: 1.0,
            },
            SimPattern::Counter {
                step: 1.0,
                min: 0.0,
                max: 1000.0,
            },
        ];
        for (spec, pattern) in specs.into_iter().zip(patterns) {
            if let Ok(spec) = spec {
                driver.animate(AnimatedTag::new(spec, pattern));
            }
        }
        driver
    }

    /// Add a zero-filled image for an area/block
    pub fn with_region(self, area: Area, block: u16, size: usize) -> Self {
        self.lock().memory.add_region(area, block, size);
        self
    }

    /// Reseed the noise and Random pattern generator
    pub fn with_seed(self, seed: u64) -> Self {
        self.lock().rng = ChaCha8Rng::seed_from_u64(seed);
        self
    }

    /// Set the simulated read delay
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }

    /// Declare a byte order other than big-endian
    pub fn with_byte_order(mut self, order: ByteOrder) -> Self {
        self.byte_order = order;
        self
    }

    /// Animate a tag with a pattern
    pub fn animate(&mut self, tag: AnimatedTag) {
        self.lock().animated.push(tag);
    }

    /// Write a typed value into the image (BOOL preserves the other bits)
    pub fn set_value(&mut self, spec: &TagSpec, value: Value) -> bool {
        let order = self.byte_order;
        write_value(&mut self.lock().memory, spec, &value, order)
    }

    /// Handle for adjusting images and faults after the driver is moved
    pub fn controls(&self) -> SimControls {
        SimControls {
            state: Arc::clone(&self.state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn read_inner(
        &mut self,
        area: Area,
        block: u16,
        offset: usize,
        length: usize,
    ) -> Result<Vec<u8>, ReadError> {
        if !self.connected {
            return Err(ReadError::NotConnected);
        }

        if !self.read_delay.is_zero() {
            std::thread::sleep(self.read_delay);
        }

        let elapsed = self.start_time.elapsed().as_secs_f64();
        let order = self.byte_order;
        let mut state = self.lock();
        state.total_reads += 1;

        if let Some(limit) = state.drop_after_reads {
            if state.reads_since_connect >= limit {
                state.drop_after_reads = None;
                drop(state);
                self.connected = false;
                tracing::warn!("Simulated link dropped");
                return Err(ReadError::Timeout);
            }
        }
        state.reads_since_connect += 1;

        let end = offset.saturating_add(length);
        let block_key = if area.has_blocks() { block } else { 0 };
        if let Some(fault) = state.address_faults.iter().find(|f| {
            f.area == area
                && (!area.has_blocks() || f.block == block_key)
                && f.offset >= offset
                && f.offset < end
        }) {
            return Err(fault.error.clone());
        }

        // Regenerate animated tags that overlap the requested range
        let SimState {
            memory,
            animated,
            rng,
            ..
        } = &mut *state;
        for tag in animated.iter_mut() {
            let spec = &tag.spec;
            if spec.area() == area
                && spec.block_index() == block_key
                && spec.byte_offset() < end
                && spec.end_offset() > offset
            {
                let raw = tag.generate_value(elapsed, &mut *rng);
                let value = tag.to_value(raw);
                write_value(memory, &tag.spec, &value, order);
            }
        }

        state
            .memory
            .read(area, block, offset, length)
            .ok_or(ReadError::AddressOutOfRange {
                area,
                block: block_key,
                offset,
                length,
            })
    }
}

fn write_value(memory: &mut SimMemory, spec: &TagSpec, value: &Value, order: ByteOrder) -> bool {
    let Some(mut bytes) = encode(value, spec, order) else {
        return false;
    };
    let (area, block, offset) = (spec.area(), spec.block_index(), spec.byte_offset());
    if spec.data_type() == DataType::Bool {
        let Some(current) = memory.read(area, block, offset, 1) else {
            return false;
        };
        let set = bytes[0] != 0;
        bytes = vec![merge_bit(current[0], spec.bit_offset(), set)];
    }
    memory.write(area, block, offset, &bytes)
}

impl Default for SimulatedDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for SimulatedDriver {
    fn connect(&mut self, target: &ConnectTarget, _timeout: Duration) -> Result<(), ConnectError> {
        if self.connected {
            return Ok(());
        }
        let mut state = self.lock();
        if let Some(err) = state.refuse_connect.clone() {
            return Err(err);
        }
        state.connects += 1;
        state.reads_since_connect = 0;
        drop(state);

        self.connected = true;
        self.start_time = Instant::now();
        tracing::info!("Simulated controller connected: {}", target);
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.connected {
            self.connected = false;
            tracing::info!("Simulated controller disconnected");
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn read_block(
        &mut self,
        area: Area,
        block_index: u16,
        byte_offset: usize,
        length: usize,
    ) -> Result<Vec<u8>, ReadError> {
        let start = Instant::now();
        let result = self.read_inner(area, block_index, byte_offset, length);
        // Ensure minimum 1us to avoid division by zero in rate calculations
        let elapsed = start.elapsed().as_micros().max(1) as u64;

        match &result {
            Ok(bytes) => self.stats.record_success(elapsed, bytes.len() as u64),
            Err(_) => self.stats.record_failure(),
        }
        result
    }

    fn write_block(
        &mut self,
        area: Area,
        block_index: u16,
        byte_offset: usize,
        data: &[u8],
    ) -> Result<(), WriteError> {
        if !self.connected {
            self.stats.record_write(false);
            return Err(WriteError::NotConnected);
        }
        let ok = self.lock().memory.write(area, block_index, byte_offset, data);
        self.stats.record_write(ok);
        if ok {
            Ok(())
        } else {
            Err(WriteError::AddressOutOfRange {
                area,
                block: block_index,
                offset: byte_offset,
                length: data.len(),
            })
        }
    }

    fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    fn region_size(&self, area: Area, block_index: u16) -> Option<usize> {
        self.lock().memory.size(area, block_index)
    }

    fn stats(&self) -> &DriverStats {
        &self.stats
    }

    fn stats_mut(&mut self) -> &mut DriverStats {
        &mut self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::decode;

    const TIMEOUT: Duration = Duration::from_millis(100);

    fn connected() -> SimulatedDriver {
        let mut driver = SimulatedDriver::new().with_region(Area::DataBlock, 1, 16);
        driver.connect(&ConnectTarget::default(), TIMEOUT).unwrap();
        driver
    }

    #[test]
    fn test_simulated_connect() {
        let mut driver = SimulatedDriver::new();
        assert!(!driver.is_connected());

        driver.connect(&ConnectTarget::default(), TIMEOUT).unwrap();
        assert!(driver.is_connected());
        // second connect is a no-op
        driver.connect(&ConnectTarget::default(), TIMEOUT).unwrap();
        assert_eq!(driver.controls().connects(), 1);

        driver.disconnect();
        assert!(!driver.is_connected());
    }

    #[test]
    fn test_read_requires_connection() {
        let mut driver = SimulatedDriver::new().with_region(Area::DataBlock, 1, 16);
        assert_eq!(
            driver.read_block(Area::DataBlock, 1, 0, 4),
            Err(ReadError::NotConnected)
        );
        assert_eq!(driver.stats().failed_reads, 1);
    }

    #[test]
    fn test_write_then_read_block() {
        let mut driver = connected();
        driver
            .write_block(Area::DataBlock, 1, 0, &[0x42, 0x48, 0x00, 0x00])
            .unwrap();
        let bytes = driver.read_block(Area::DataBlock, 1, 0, 4).unwrap();
        assert_eq!(bytes, vec![0x42, 0x48, 0x00, 0x00]);
        assert_eq!(driver.stats().successful_reads, 1);
        assert_eq!(driver.stats().writes, 1);
    }

    #[test]
    fn test_read_out_of_region() {
        let mut driver = connected();
        assert!(matches!(
            driver.read_block(Area::DataBlock, 1, 14, 4),
            Err(ReadError::AddressOutOfRange { offset: 14, .. })
        ));
        assert!(matches!(
            driver.read_block(Area::DataBlock, 2, 0, 1),
            Err(ReadError::AddressOutOfRange { .. })
        ));
        assert_eq!(driver.region_size(Area::DataBlock, 1), Some(16));
        assert_eq!(driver.region_size(Area::Marker, 0), None);
    }

    #[test]
    fn test_non_db_areas_ignore_block() {
        let mut driver = SimulatedDriver::new().with_region(Area::Marker, 0, 4);
        driver.connect(&ConnectTarget::default(), TIMEOUT).unwrap();
        driver.write_block(Area::Marker, 9, 1, &[0xAB]).unwrap();
        assert_eq!(driver.read_block(Area::Marker, 0, 1, 1).unwrap(), vec![0xAB]);
    }

    #[test]
    fn test_animated_counter() {
        let mut driver = connected();
        let spec = TagSpec::new("Count", Area::DataBlock, 1, 2, DataType::Int16).unwrap();
        driver.animate(AnimatedTag::new(
            spec.clone(),
            SimPattern::Counter {
                step: 1.0,
                min: 0.0,
                max: 10.0,
            },
        ));

        let first = driver.read_block(Area::DataBlock, 1, 2, 2).unwrap();
        let second = driver.read_block(Area::DataBlock, 1, 2, 2).unwrap();
        assert_eq!(decode(&first, &spec).unwrap(), Value::Int(1));
        assert_eq!(decode(&second, &spec).unwrap(), Value::Int(2));

        // reads that do not cover the tag leave it alone
        driver.read_block(Area::DataBlock, 1, 8, 2).unwrap();
        let third = driver.read_block(Area::DataBlock, 1, 0, 4).unwrap();
        assert_eq!(decode(&third[2..], &spec).unwrap(), Value::Int(3));
    }

    #[test]
    fn test_set_value_bool_preserves_neighbours() {
        let mut driver = connected();
        driver.write_block(Area::DataBlock, 1, 4, &[0b1000_0000]).unwrap();
        let pump = TagSpec::new_bool("PumpOn", Area::DataBlock, 1, 4, 0).unwrap();
        assert!(driver.set_value(&pump, Value::Bool(true)));
        assert_eq!(
            driver.read_block(Area::DataBlock, 1, 4, 1).unwrap(),
            vec![0b1000_0001]
        );
    }

    #[test]
    fn test_fault_injection_address() {
        let mut driver = connected();
        driver
            .controls()
            .fail_address(Area::DataBlock, 1, 8, ReadError::ProtocolError("bad".into()));
        assert!(driver.read_block(Area::DataBlock, 1, 0, 4).is_ok());
        assert!(matches!(
            driver.read_block(Area::DataBlock, 1, 6, 4),
            Err(ReadError::ProtocolError(_))
        ));
        assert!(driver.is_connected());

        driver.controls().clear_address_faults();
        assert!(driver.read_block(Area::DataBlock, 1, 6, 4).is_ok());
    }

    #[test]
    fn test_fault_injection_drop_link() {
        let mut driver = connected();
        driver.controls().drop_link_after(2);
        assert!(driver.read_block(Area::DataBlock, 1, 0, 1).is_ok());
        assert!(driver.read_block(Area::DataBlock, 1, 0, 1).is_ok());
        assert_eq!(
            driver.read_block(Area::DataBlock, 1, 0, 1),
            Err(ReadError::Timeout)
        );
        assert!(!driver.is_connected());

        // reconnect recovers
        driver.connect(&ConnectTarget::default(), TIMEOUT).unwrap();
        assert!(driver.read_block(Area::DataBlock, 1, 0, 1).is_ok());
    }

    #[test]
    fn test_fault_injection_refuse_connect() {
        let mut driver = SimulatedDriver::new();
        let controls = driver.controls();
        controls.refuse_connect(ConnectError::AuthRejected("slot".into()));
        assert_eq!(
            driver.connect(&ConnectTarget::default(), TIMEOUT),
            Err(ConnectError::AuthRejected("slot".into()))
        );
        assert!(!driver.is_connected());

        controls.accept_connect();
        assert!(driver.connect(&ConnectTarget::default(), TIMEOUT).is_ok());
    }

    #[test]
    fn test_demo_image() {
        let mut driver = SimulatedDriver::demo();
        driver.connect(&ConnectTarget::default(), TIMEOUT).unwrap();
        let level = TagSpec::new("TankLevel", Area::DataBlock, 1, 0, DataType::Real32).unwrap();
        let bytes = driver.read_block(Area::DataBlock, 1, 0, 4).unwrap();
        match decode(&bytes, &level).unwrap() {
            Value::Float(v) => assert!((30.0..=70.0).contains(&v)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_pattern_values() {
        let spec = TagSpec::new("x", Area::DataBlock, 1, 0, DataType::Real32).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut constant = AnimatedTag::new(spec.clone(), SimPattern::Constant(42.0));
        assert_eq!(constant.generate_value(0.0, &mut rng), 42.0);
        assert_eq!(constant.generate_value(1.0, &mut rng), 42.0);

        let mut square = AnimatedTag::new(
            spec,
            SimPattern::Square {
                period: 2.0,
                amplitude: 1.0,
            },
        );
        assert_eq!(square.generate_value(0.5, &mut rng), 1.0);
        assert_eq!(square.generate_value(1.5, &mut rng), -1.0);
    }

    fn random_driver(seed: u64) -> (SimulatedDriver, TagSpec) {
        let spec = TagSpec::new("Noise", Area::DataBlock, 1, 0, DataType::Real32).unwrap();
        let mut driver = SimulatedDriver::new()
            .with_region(Area::DataBlock, 1, 4)
            .with_seed(seed);
        driver.animate(
            AnimatedTag::new(spec.clone(), SimPattern::Random { min: 0.0, max: 10.0 })
                .with_noise(0.5),
        );
        driver.connect(&ConnectTarget::default(), TIMEOUT).unwrap();
        (driver, spec)
    }

    fn random_values(driver: &mut SimulatedDriver, spec: &TagSpec) -> Vec<Value> {
        (0..8)
            .map(|_| decode(&driver.read_block(Area::DataBlock, 1, 0, 4).unwrap(), spec).unwrap())
            .collect()
    }

    #[test]
    fn test_seeded_noise_is_reproducible_per_driver() {
        let (mut a, spec) = random_driver(42);
        let (mut b, _) = random_driver(42);
        let (mut c, _) = random_driver(7);

        let from_a = random_values(&mut a, &spec);
        assert_eq!(from_a, random_values(&mut b, &spec));
        assert_ne!(from_a, random_values(&mut c, &spec));
        for value in from_a {
            match value {
                Value::Float(v) => assert!((-0.5..=10.5).contains(&v), "{}", v),
                other => panic!("unexpected value {:?}", other),
            }
        }
    }
}
