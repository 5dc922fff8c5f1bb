use crate::{
    Capability, HumidityReading, MotionSensor, PeripheralEvent, PeripheralId, Result,
    TransportError,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Source of advertised peripherals.
#[async_trait]
pub trait Scanner: Send + Sync {
    /// Wait for the next advertised peripheral.
    ///
    /// Ids already seen may be reported again so that a unit which dropped its
    /// link can be picked up once it advertises anew.
    async fn discover(&self) -> Result<Arc<dyn Peripheral>>;
}

/// A single wireless sensor unit.
#[async_trait]
pub trait Peripheral: Send + Sync {
    fn id(&self) -> &PeripheralId;

    /// Model tag, informational only.
    fn kind(&self) -> &str;

    /// Subscribe to motion notifications and the disconnect signal.
    fn subscribe(&self) -> broadcast::Receiver<PeripheralEvent>;

    /// Establish the link and discover services.
    async fn connect_and_set_up(&self) -> Result<()>;

    /// Power up one sensor. Models lacking it report `Unsupported`.
    async fn enable(&self, capability: Capability) -> Result<()>;

    /// Set the motion notification period.
    async fn set_motion_period(&self, _period: Duration) -> Result<()> {
        Err(TransportError::Unsupported("motion period"))
    }

    /// Start notifications for one motion sensor.
    async fn notify(&self, sensor: MotionSensor) -> Result<()>;

    async fn read_rssi(&self) -> Result<i16>;

    async fn read_humidity(&self) -> Result<HumidityReading>;

    async fn read_pressure(&self) -> Result<f64>;

    async fn read_lux(&self) -> Result<f64>;

    async fn read_battery(&self) -> Result<u8> {
        Err(TransportError::Unsupported("battery level"))
    }

    async fn disconnect(&self) -> Result<()>;
}
