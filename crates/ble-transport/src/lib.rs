//! ble-transport: wireless sensor peripheral abstractions
//!
//! This crate provides async traits and types for discovering sensor peripherals,
//! connecting to them, enabling their sensors, reading metrics and receiving motion
//! notifications. The default build enables a `mock` backend so that binaries and
//! tests run on any host without a radio.

mod types;
pub use types::{
    Capability, HumidityReading, MotionReading, MotionSensor, PeripheralEvent, PeripheralId,
    Timestamp, Vector3,
};

mod error;
pub use error::{Result, TransportError};

mod traits;
pub use traits::{Peripheral, Scanner};

#[cfg(feature = "mock")]
mod mock;

#[cfg(feature = "mock")]
pub use mock::{MockPeripheral, MockRead, MockReadings, MockScanner};
