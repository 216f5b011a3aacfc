//! Mock construction helpers

use mini_scada::backend::{ConnectTarget, Driver, DriverStats, SimulatedDriver};
use mini_scada::error::{ConnectError, ReadError, WriteError};
use mini_scada::types::{Area, ByteOrder, TagSpec, Value};
use mockall::mock;
use std::time::Duration;

mock! {
    pub Driver {}

    impl Driver for Driver {
        fn connect(&mut self, target: &ConnectTarget, timeout: Duration) -> Result<(), ConnectError>;
        fn disconnect(&mut self);
        fn is_connected(&self) -> bool;
        fn read_block(
            &mut self,
            area: Area,
            block_index: u16,
            byte_offset: usize,
            length: usize,
        ) -> Result<Vec<u8>, ReadError>;
        fn write_block(
            &mut self,
            area: Area,
            block_index: u16,
            byte_offset: usize,
            data: &[u8],
        ) -> Result<(), WriteError>;
        fn byte_order(&self) -> ByteOrder;
        fn region_size(&self, area: Area, block_index: u16) -> Option<usize>;
        fn stats(&self) -> &DriverStats;
        fn stats_mut(&mut self) -> &mut DriverStats;
    }
}

/// A driver mock that fails the test on any controller I/O
pub fn create_no_io_driver() -> MockDriver {
    let mut driver = MockDriver::new();
    driver.expect_connect().never();
    driver.expect_read_block().never();
    driver.expect_write_block().never();
    driver.expect_disconnect().return_const(());
    driver.expect_is_connected().return_const(false);
    driver.expect_byte_order().return_const(ByteOrder::BigEndian);
    driver.expect_region_size().return_const(None::<usize>);
    driver.expect_stats().return_const(DriverStats::default());
    driver
}

/// Simulator with a 32-byte DB1 holding the given values
pub fn create_test_simulator(values: &[(&TagSpec, Value)]) -> SimulatedDriver {
    let mut driver = SimulatedDriver::new().with_region(Area::DataBlock, 1, 32);
    for (spec, value) in values {
        assert!(driver.set_value(spec, *value), "value does not fit {}", spec.name());
    }
    driver
}
