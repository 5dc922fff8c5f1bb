use crate::{
    Capability, HumidityReading, MotionReading, MotionSensor, Peripheral, PeripheralEvent,
    PeripheralId, Result, Scanner, Timestamp, TransportError, Vector3,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

/// Baseline values returned by a [`MockPeripheral`].
#[derive(Clone, Debug, PartialEq)]
pub struct MockReadings {
    pub rssi: i16,
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
    pub lux: f64,
    pub battery: u8,
}

impl Default for MockReadings {
    fn default() -> Self {
        Self {
            rssi: -60,
            temperature: 21.5,
            humidity: 45.0,
            pressure: 1013.0,
            lux: 320.0,
            battery: 90,
        }
    }
}

/// Polled metrics a test can force into failure.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum MockRead {
    Rssi,
    Humidity,
    Pressure,
    Lux,
    Battery,
}

#[derive(Default)]
struct MockState {
    readings: MockReadings,
    failing: HashSet<MockRead>,
    fail_connect: bool,
    connected: bool,
    enabled: HashSet<Capability>,
    notifying: HashSet<MotionSensor>,
    motion_period: Option<Duration>,
}

/// An in-process peripheral. Each instance is independent.
pub struct MockPeripheral {
    id: PeripheralId,
    kind: String,
    supported: HashSet<Capability>,
    jitter: bool,
    read_delay: Duration,
    state: Mutex<MockState>,
    events: broadcast::Sender<PeripheralEvent>,
    reads: AtomicU64,
}

impl MockPeripheral {
    /// A unit that supports every capability.
    pub fn new(id: impl Into<PeripheralId>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            id: id.into(),
            kind: "mock-sensortag".to_string(),
            supported: [
                Capability::IrTemperature,
                Capability::Humidity,
                Capability::Luxometer,
                Capability::BarometricPressure,
                Capability::Battery,
                Capability::Accelerometer,
                Capability::Gyroscope,
                Capability::Magnetometer,
            ]
            .into_iter()
            .collect(),
            jitter: false,
            read_delay: Duration::ZERO,
            state: Mutex::new(MockState::default()),
            events,
            reads: AtomicU64::new(0),
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn with_capabilities(mut self, caps: impl IntoIterator<Item = Capability>) -> Self {
        self.supported = caps.into_iter().collect();
        self
    }

    pub fn with_readings(self, readings: MockReadings) -> Self {
        self.state.lock().readings = readings;
        self
    }

    /// Add small random noise to every read.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Make every read take this long before settling.
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }

    pub fn failing_connect(self) -> Self {
        self.state.lock().fail_connect = true;
        self
    }

    pub fn fail_read(&self, read: MockRead) {
        self.state.lock().failing.insert(read);
    }

    pub fn set_readings(&self, readings: MockReadings) {
        self.state.lock().readings = readings;
    }

    /// Push a motion notification. Returns false when notifications for that
    /// sensor were never started, in which case nothing is emitted.
    pub fn emit_motion(&self, sensor: MotionSensor, x: f64, y: f64, z: f64) -> bool {
        if !self.state.lock().notifying.contains(&sensor) {
            return false;
        }
        let reading = MotionReading {
            sensor,
            value: Vector3::new(x, y, z),
            timestamp: Timestamp::now(),
        };
        self.events.send(PeripheralEvent::Motion(reading)).is_ok()
    }

    /// Simulate the link dropping.
    pub fn trigger_disconnect(&self) {
        let notifying = {
            let mut st = self.state.lock();
            st.connected = false;
            std::mem::take(&mut st.notifying).len()
        };
        let listeners = self.events.send(PeripheralEvent::Disconnected).unwrap_or(0);
        debug!(device = %self.id, notifying, listeners, "mock link dropped");
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    pub fn enabled(&self) -> HashSet<Capability> {
        self.state.lock().enabled.clone()
    }

    pub fn notifying(&self) -> HashSet<MotionSensor> {
        self.state.lock().notifying.clone()
    }

    pub fn motion_period(&self) -> Option<Duration> {
        self.state.lock().motion_period
    }

    /// Number of metric reads issued so far.
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    async fn settle(&self, read: MockRead, cap: Option<Capability>) -> Result<MockReadings> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if !self.read_delay.is_zero() {
            tokio::time::sleep(self.read_delay).await;
        }
        if let Some(cap) = cap {
            if !self.supported.contains(&cap) {
                return Err(TransportError::Unsupported(cap.as_str()));
            }
        }
        let st = self.state.lock();
        if !st.connected {
            return Err(TransportError::Disconnected);
        }
        if st.failing.contains(&read) {
            return Err(TransportError::Io(format!("{read:?} read failed")));
        }
        Ok(st.readings.clone())
    }

    fn noise(&self, span: f64) -> f64 {
        if self.jitter {
            rand::thread_rng().gen_range(-span..span)
        } else {
            0.0
        }
    }
}

#[async_trait]
impl Peripheral for MockPeripheral {
    fn id(&self) -> &PeripheralId {
        &self.id
    }

    fn kind(&self) -> &str {
        &self.kind
    }

    fn subscribe(&self) -> broadcast::Receiver<PeripheralEvent> {
        self.events.subscribe()
    }

    async fn connect_and_set_up(&self) -> Result<()> {
        let mut st = self.state.lock();
        if st.fail_connect {
            debug!(device = %self.id, "mock refusing connection");
            return Err(TransportError::Io(format!("{} refused connection", self.id)));
        }
        st.connected = true;
        Ok(())
    }

    async fn enable(&self, capability: Capability) -> Result<()> {
        if !self.supported.contains(&capability) {
            return Err(TransportError::Unsupported(capability.as_str()));
        }
        self.state.lock().enabled.insert(capability);
        Ok(())
    }

    async fn set_motion_period(&self, period: Duration) -> Result<()> {
        self.state.lock().motion_period = Some(period);
        Ok(())
    }

    async fn notify(&self, sensor: MotionSensor) -> Result<()> {
        if !self.supported.contains(&sensor.capability()) {
            return Err(TransportError::Unsupported(sensor.capability().as_str()));
        }
        self.state.lock().notifying.insert(sensor);
        Ok(())
    }

    async fn read_rssi(&self) -> Result<i16> {
        let r = self.settle(MockRead::Rssi, None).await?;
        Ok(r.rssi + self.noise(3.0) as i16)
    }

    async fn read_humidity(&self) -> Result<HumidityReading> {
        let r = self.settle(MockRead::Humidity, Some(Capability::Humidity)).await?;
        Ok(HumidityReading {
            temperature: r.temperature + self.noise(0.5),
            humidity: r.humidity + self.noise(2.0),
        })
    }

    async fn read_pressure(&self) -> Result<f64> {
        let r = self
            .settle(MockRead::Pressure, Some(Capability::BarometricPressure))
            .await?;
        Ok(r.pressure + self.noise(1.5))
    }

    async fn read_lux(&self) -> Result<f64> {
        let r = self.settle(MockRead::Lux, Some(Capability::Luxometer)).await?;
        Ok((r.lux + self.noise(25.0)).max(0.0))
    }

    async fn read_battery(&self) -> Result<u8> {
        let r = self.settle(MockRead::Battery, Some(Capability::Battery)).await?;
        Ok(r.battery)
    }

    async fn disconnect(&self) -> Result<()> {
        self.trigger_disconnect();
        Ok(())
    }
}

/// Scripted scanner: peripherals are "advertised" by pushing them in.
pub struct MockScanner {
    tx: Mutex<Option<mpsc::UnboundedSender<Arc<dyn Peripheral>>>>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Arc<dyn Peripheral>>>,
    scans: AtomicU64,
}

impl MockScanner {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx: Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
            scans: AtomicU64::new(0),
        }
    }

    pub fn advertise(&self, peripheral: Arc<dyn Peripheral>) {
        if let Some(tx) = self.tx.lock().as_ref() {
            let _ = tx.send(peripheral);
        }
    }

    /// Stop scanning once the queued advertisements are drained.
    pub fn shutdown(&self) {
        if self.tx.lock().take().is_some() {
            debug!("mock scanner shut down");
        }
    }

    /// Number of times a scan was (re)started.
    pub fn scan_count(&self) -> u64 {
        self.scans.load(Ordering::SeqCst)
    }
}

impl Default for MockScanner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Scanner for MockScanner {
    async fn discover(&self) -> Result<Arc<dyn Peripheral>> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.rx.lock().await;
        rx.recv().await.ok_or(TransportError::ScanStopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unsupported_capability_is_reported() {
        let p = MockPeripheral::new("AA:BB:CC")
            .with_capabilities([Capability::Humidity, Capability::BarometricPressure]);
        p.connect_and_set_up().await.unwrap();

        assert!(p.enable(Capability::Humidity).await.is_ok());
        let err = p.enable(Capability::Luxometer).await.unwrap_err();
        assert!(err.is_unsupported());
        assert!(p.read_lux().await.unwrap_err().is_unsupported());
        assert_eq!(p.enabled().len(), 1);
    }

    #[tokio::test]
    async fn motion_only_flows_after_notify() {
        let p = MockPeripheral::new("AA:BB:CC");
        let mut rx = p.subscribe();
        p.connect_and_set_up().await.unwrap();

        assert!(!p.emit_motion(MotionSensor::Gyroscope, 1.0, 0.0, 0.0));
        p.notify(MotionSensor::Gyroscope).await.unwrap();
        assert!(p.emit_motion(MotionSensor::Gyroscope, 1.0, 0.0, 0.0));

        let event = rx.recv().await.unwrap();
        assert!(matches!(
            event,
            PeripheralEvent::Motion(MotionReading {
                sensor: MotionSensor::Gyroscope,
                value: Vector3 { x, y, z },
                ..
            }) if x == 1.0 && y == 0.0 && z == 0.0
        ));
    }

    #[tokio::test]
    async fn reads_fail_after_disconnect() {
        let p = MockPeripheral::new("AA:BB:CC");
        let mut rx = p.subscribe();
        p.connect_and_set_up().await.unwrap();
        assert_eq!(p.read_pressure().await.unwrap(), 1013.0);

        p.trigger_disconnect();
        assert_eq!(rx.recv().await.unwrap(), PeripheralEvent::Disconnected);
        assert_eq!(
            p.read_pressure().await.unwrap_err(),
            TransportError::Disconnected
        );
        assert_eq!(p.read_count(), 2);
    }

    #[tokio::test]
    async fn injected_disconnect_stops_notifications() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("ble_transport=debug")
            .with_test_writer()
            .try_init();
        let p = MockPeripheral::new("AA:BB:CC");
        let mut rx = p.subscribe();
        p.connect_and_set_up().await.unwrap();
        p.notify(MotionSensor::Accelerometer).await.unwrap();
        p.notify(MotionSensor::Magnetometer).await.unwrap();

        p.trigger_disconnect();
        assert!(!p.is_connected());
        assert!(p.notifying().is_empty());
        assert_eq!(rx.recv().await.unwrap(), PeripheralEvent::Disconnected);
        assert!(!p.emit_motion(MotionSensor::Accelerometer, 1.0, 1.0, 1.0));

        // Nobody listening is fine.
        drop(rx);
        p.trigger_disconnect();
    }

    #[tokio::test]
    async fn forced_read_failure() {
        let p = MockPeripheral::new("AA:BB:CC");
        p.connect_and_set_up().await.unwrap();
        p.fail_read(MockRead::Rssi);
        assert!(matches!(p.read_rssi().await, Err(TransportError::Io(_))));
        assert!(p.read_humidity().await.is_ok());
    }

    #[tokio::test]
    async fn scanner_yields_in_order_then_stops() {
        let scanner = MockScanner::new();
        scanner.advertise(Arc::new(MockPeripheral::new("01")));
        scanner.advertise(Arc::new(MockPeripheral::new("02")));
        scanner.shutdown();

        assert_eq!(scanner.discover().await.unwrap().id().as_str(), "01");
        assert_eq!(scanner.discover().await.unwrap().id().as_str(), "02");
        assert!(matches!(
            scanner.discover().await,
            Err(TransportError::ScanStopped)
        ));
        assert_eq!(scanner.scan_count(), 3);
    }
}
