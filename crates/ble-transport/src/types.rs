use core::fmt;
use time::OffsetDateTime;

/// Stable identifier of a peripheral, usually its hardware address.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct PeripheralId(String);

impl PeripheralId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeripheralId {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// One sensor a peripheral model may carry.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Capability {
    IrTemperature,
    Humidity,
    Luxometer,
    BarometricPressure,
    Battery,
    Accelerometer,
    Gyroscope,
    Magnetometer,
}

impl Capability {
    /// Environmental sensors, enabled in this order during configuration.
    pub const ENVIRONMENTAL: [Capability; 4] = [
        Capability::IrTemperature,
        Capability::Humidity,
        Capability::Luxometer,
        Capability::BarometricPressure,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Capability::IrTemperature => "ir_temperature",
            Capability::Humidity => "humidity",
            Capability::Luxometer => "luxometer",
            Capability::BarometricPressure => "barometric_pressure",
            Capability::Battery => "battery",
            Capability::Accelerometer => "accelerometer",
            Capability::Gyroscope => "gyroscope",
            Capability::Magnetometer => "magnetometer",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Motion sensors that report through notifications rather than polling.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum MotionSensor {
    Accelerometer,
    Gyroscope,
    Magnetometer,
}

impl MotionSensor {
    pub const ALL: [MotionSensor; 3] = [
        MotionSensor::Accelerometer,
        MotionSensor::Gyroscope,
        MotionSensor::Magnetometer,
    ];

    pub fn capability(self) -> Capability {
        match self {
            MotionSensor::Accelerometer => Capability::Accelerometer,
            MotionSensor::Gyroscope => Capability::Gyroscope,
            MotionSensor::Magnetometer => Capability::Magnetometer,
        }
    }
}

/// Three-axis reading
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn is_zero(&self) -> bool {
        self.x == 0.0 && self.y == 0.0 && self.z == 0.0
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Timestamp(pub OffsetDateTime);

impl Timestamp {
    pub fn now() -> Self {
        Self(OffsetDateTime::now_utc())
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MotionReading {
    pub sensor: MotionSensor,
    pub value: Vector3,
    pub timestamp: Timestamp,
}

/// Joint temperature + relative humidity reading from the humidity sensor.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HumidityReading {
    pub temperature: f64,
    pub humidity: f64,
}

/// Asynchronous events pushed by a connected peripheral.
#[derive(Clone, Debug, PartialEq)]
pub enum PeripheralEvent {
    Motion(MotionReading),
    Disconnected,
}
