//! Telemetry samples and per-read outcomes.

use ble_transport::{HumidityReading, MotionReading, MotionSensor, PeripheralId, TransportError};
use publish_link::Channel;
use serde_json::Number;
use std::collections::BTreeMap;
use time::OffsetDateTime;

pub const RSSI: &str = "rssi";
pub const PRESSURE: &str = "pressure";
pub const HUMIDITY: &str = "humidity";
pub const TEMPERATURE: &str = "temperature";
pub const LUX: &str = "lux";
pub const BATTERY: &str = "battery";

/// Outcome of one metric read.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome<T> {
    Value(T),
    /// The unit lacks the sensor (or never enabled it).
    Unsupported,
    Failed(String),
}

impl<T> ReadOutcome<T> {
    pub fn value(self) -> Option<T> {
        match self {
            ReadOutcome::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ReadOutcome::Failed(_))
    }
}

impl<T> From<Result<T, TransportError>> for ReadOutcome<T> {
    fn from(res: Result<T, TransportError>) -> Self {
        match res {
            Ok(v) => ReadOutcome::Value(v),
            Err(e) if e.is_unsupported() => ReadOutcome::Unsupported,
            Err(e) => ReadOutcome::Failed(e.to_string()),
        }
    }
}

/// Everything one poll cycle gathered, settled or not.
#[derive(Debug, Clone, PartialEq)]
pub struct AirReadings {
    pub rssi: ReadOutcome<i16>,
    pub humidity: ReadOutcome<HumidityReading>,
    pub pressure: ReadOutcome<f64>,
    pub lux: ReadOutcome<f64>,
    pub battery: ReadOutcome<u8>,
}

impl AirReadings {
    pub fn failures(&self) -> usize {
        [
            self.rssi.is_failed(),
            self.humidity.is_failed(),
            self.pressure.is_failed(),
            self.lux.is_failed(),
            self.battery.is_failed(),
        ]
        .into_iter()
        .filter(|f| *f)
        .count()
    }
}

/// One immutable telemetry record. Absent metrics have no key at all.
///
/// Counts from the radio (rssi, battery) stay integral on the wire; sensor
/// readings are floats. A non-finite reading is treated as absent.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    device_id: PeripheralId,
    channel: Channel,
    taken_at: OffsetDateTime,
    values: BTreeMap<&'static str, Number>,
}

fn put_float(values: &mut BTreeMap<&'static str, Number>, key: &'static str, v: f64) {
    if let Some(n) = Number::from_f64(v) {
        values.insert(key, n);
    }
}

impl Sample {
    /// Combine one poll cycle into an `air` sample.
    pub fn air(device_id: PeripheralId, readings: AirReadings) -> Self {
        let mut values = BTreeMap::new();
        if let Some(rssi) = readings.rssi.value() {
            values.insert(RSSI, Number::from(rssi));
        }
        if let Some(h) = readings.humidity.value() {
            put_float(&mut values, HUMIDITY, h.humidity);
            put_float(&mut values, TEMPERATURE, h.temperature);
        }
        if let Some(p) = readings.pressure.value() {
            put_float(&mut values, PRESSURE, p);
        }
        if let Some(lux) = readings.lux.value() {
            put_float(&mut values, LUX, lux);
        }
        if let Some(battery) = readings.battery.value() {
            values.insert(BATTERY, Number::from(battery));
        }
        Self {
            device_id,
            channel: Channel::Air,
            taken_at: OffsetDateTime::now_utc(),
            values,
        }
    }

    /// A motion sample, or `None` when all three axes read exactly zero.
    ///
    /// A genuine all-zero reading cannot be told apart from noise and is
    /// dropped along with it.
    pub fn motion(device_id: PeripheralId, reading: &MotionReading) -> Option<Self> {
        if reading.value.is_zero() {
            return None;
        }
        let channel = match reading.sensor {
            MotionSensor::Accelerometer => Channel::Accel,
            MotionSensor::Gyroscope => Channel::Gyro,
            MotionSensor::Magnetometer => Channel::Mag,
        };
        let mut values = BTreeMap::new();
        put_float(&mut values, "x", reading.value.x);
        put_float(&mut values, "y", reading.value.y);
        put_float(&mut values, "z", reading.value.z);
        Some(Self {
            device_id,
            channel,
            taken_at: reading.timestamp.0,
            values,
        })
    }

    pub fn device_id(&self) -> &PeripheralId {
        &self.device_id
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn taken_at(&self) -> OffsetDateTime {
        self.taken_at
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).and_then(Number::as_f64)
    }

    pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.values.keys().copied()
    }

    /// JSON object of the present metrics, without the envelope.
    pub fn body(&self) -> serde_json::Value {
        let map = self
            .values
            .iter()
            .map(|(k, v)| ((*k).to_string(), serde_json::Value::Number(v.clone())))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }
}
