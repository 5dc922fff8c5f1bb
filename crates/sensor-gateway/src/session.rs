//! Lifecycle of one physical device, from first discovery to disconnect.
//!
//! A session is created per discovery. It owns the peripheral handle, the
//! device's registry entry and its poll timer, and releases all three when the
//! device drops its link. Rediscovering the same id later starts a fresh session.

use crate::aggregator::{forward, poll_loop, Aggregator};
use crate::config::SessionConfig;
use crate::error::{GatewayError, Result};
use crate::metrics::MetricsHub;
use crate::sample::Sample;
use ble_transport::{Capability, MotionSensor, Peripheral, PeripheralEvent, PeripheralId};
use device_registry::{Registry, RegistryEntry, SessionId};
use publish_link::PublishLink;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Discovered,
    Connecting,
    Configuring,
    Active,
    Disconnecting,
    Terminated,
}

/// Handles every session shares with the rest of the gateway.
#[derive(Clone)]
pub struct GatewayContext {
    pub link: PublishLink,
    pub registry: Registry,
    pub metrics: MetricsHub,
}

pub struct DeviceSession {
    id: PeripheralId,
    session: SessionId,
    peripheral: Arc<dyn Peripheral>,
    ctx: GatewayContext,
    config: SessionConfig,
    state: SessionState,
    capabilities: BTreeSet<Capability>,
    events: Option<broadcast::Receiver<PeripheralEvent>>,
    poll_handle: Option<JoinHandle<()>>,
}

impl DeviceSession {
    pub fn new(peripheral: Arc<dyn Peripheral>, ctx: GatewayContext, config: SessionConfig) -> Self {
        // Subscribe before connecting so an early disconnect is not missed.
        let events = peripheral.subscribe();
        Self {
            id: peripheral.id().clone(),
            session: SessionId::new(),
            peripheral,
            ctx,
            config,
            state: SessionState::Discovered,
            capabilities: BTreeSet::new(),
            events: Some(events),
            poll_handle: None,
        }
    }

    pub fn id(&self) -> &PeripheralId {
        &self.id
    }

    pub fn session_id(&self) -> SessionId {
        self.session
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn capabilities(&self) -> &BTreeSet<Capability> {
        &self.capabilities
    }

    pub fn has_poll_handle(&self) -> bool {
        self.poll_handle.is_some()
    }

    fn transition(&mut self, next: SessionState) {
        debug!(device = %self.id, from = ?self.state, to = ?next, "session state change");
        self.state = next;
    }

    /// Connect, configure sensors and enter Active.
    ///
    /// A connect failure terminates the session. Individual sensors that fail
    /// to configure are logged and left out of the capability set.
    pub async fn handshake(&mut self) -> Result<()> {
        if self.state != SessionState::Discovered {
            return Err(GatewayError::InvalidState {
                device: self.id.to_string(),
                state: self.state,
                expected: SessionState::Discovered,
            });
        }
        info!(device = %self.id, kind = self.peripheral.kind(), "discovered, connecting");
        self.transition(SessionState::Connecting);
        if let Err(source) = self.peripheral.connect_and_set_up().await {
            self.ctx.metrics.gw.handshake_failures.inc();
            self.events = None;
            self.transition(SessionState::Terminated);
            return Err(GatewayError::Handshake {
                device: self.id.to_string(),
                source,
            });
        }

        self.transition(SessionState::Configuring);
        self.configure().await;
        self.activate();
        Ok(())
    }

    async fn configure(&mut self) {
        let mut wanted: Vec<Capability> = Capability::ENVIRONMENTAL.to_vec();
        if self.config.include_battery {
            wanted.push(Capability::Battery);
        }
        for cap in wanted {
            match self.peripheral.enable(cap).await {
                Ok(()) => {
                    self.capabilities.insert(cap);
                }
                Err(e) if e.is_unsupported() => {
                    debug!(device = %self.id, capability = %cap, "not supported by this model");
                }
                Err(e) => {
                    warn!(device = %self.id, capability = %cap, error = %e, "sensor setup failed");
                }
            }
        }

        if let Err(e) = self.peripheral.set_motion_period(self.config.motion_period).await {
            debug!(device = %self.id, error = %e, "motion period not applied");
        }
        for sensor in MotionSensor::ALL {
            let cap = sensor.capability();
            let res = match self.peripheral.enable(cap).await {
                Ok(()) => self.peripheral.notify(sensor).await,
                Err(e) => Err(e),
            };
            match res {
                Ok(()) => {
                    self.capabilities.insert(cap);
                }
                Err(e) if e.is_unsupported() => {
                    debug!(device = %self.id, capability = %cap, "not supported by this model");
                }
                Err(e) => {
                    warn!(device = %self.id, capability = %cap, error = %e, "motion setup failed");
                }
            }
        }
    }

    fn activate(&mut self) {
        let entry = RegistryEntry::new(
            self.session,
            self.peripheral.kind(),
            self.capabilities.clone(),
        );
        if self.ctx.registry.activate(self.id.clone(), entry).is_some() {
            debug!(device = %self.id, "took over registry entry from a stale session");
        } else {
            self.ctx.metrics.gw.sessions_active.inc();
        }
        let active = self.ctx.registry.len();

        let aggregator = Aggregator::new(
            Arc::clone(&self.peripheral),
            self.session,
            self.capabilities.clone(),
            self.ctx.registry.clone(),
            self.ctx.link.clone(),
            self.ctx.metrics.clone(),
            self.config.read_timeout,
        );
        self.poll_handle = Some(tokio::spawn(poll_loop(
            aggregator,
            self.config.first_poll_delay,
            self.config.poll_interval,
        )));
        self.transition(SessionState::Active);
        let caps: Vec<&str> = self.capabilities.iter().map(|c| c.as_str()).collect();
        info!(device = %self.id, capabilities = ?caps, active, "ready");
    }

    /// Forward motion notifications until the device disconnects, then tear
    /// the session down.
    pub async fn run(mut self) {
        if self.state != SessionState::Active {
            warn!(device = %self.id, state = ?self.state, "run called on inactive session");
            return;
        }
        if let Some(mut events) = self.events.take() {
            loop {
                match events.recv().await {
                    Ok(PeripheralEvent::Motion(reading)) => {
                        self.on_motion(&reading).await;
                    }
                    Ok(PeripheralEvent::Disconnected) | Err(RecvError::Closed) => break,
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(device = %self.id, skipped, "motion notifications lagged");
                    }
                }
            }
        }
        self.terminate();
    }

    async fn on_motion(&self, reading: &ble_transport::MotionReading) {
        if !self.capabilities.contains(&reading.sensor.capability()) {
            return;
        }
        match Sample::motion(self.id.clone(), reading) {
            Some(sample) => {
                self.ctx.registry.touch(&self.id, self.session);
                forward(&self.ctx.link, &self.ctx.metrics, &sample).await;
            }
            None => self.ctx.metrics.gw.motion_suppressed.inc(),
        }
    }

    /// Release the poll timer and the registry entry.
    fn terminate(&mut self) {
        self.transition(SessionState::Disconnecting);
        if let Some(handle) = self.poll_handle.take() {
            handle.abort();
        }
        if self.ctx.registry.remove(&self.id, self.session) {
            self.ctx.metrics.gw.sessions_active.dec();
        }
        let active = self.ctx.registry.len();
        self.events = None;
        self.transition(SessionState::Terminated);
        info!(device = %self.id, active, "disconnected");
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        if let Some(handle) = self.poll_handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ble_transport::{MockPeripheral, MockReadings};
    use publish_link::{Channel, Credentials, LinkConfig, MockTelemetryTransport};
    use std::time::Duration;
    use time::OffsetDateTime;

    fn creds() -> Credentials {
        Credentials {
            org: "abc123".to_string(),
            gateway_type: "gateway".to_string(),
            id: "gw1".to_string(),
            auth_method: "token".to_string(),
            auth_token: "t".to_string(),
            domain: "example.com".to_string(),
        }
    }

    async fn context(connected: bool) -> (GatewayContext, Arc<MockTelemetryTransport>) {
        let transport = Arc::new(if connected {
            MockTelemetryTransport::new()
        } else {
            MockTelemetryTransport::manual()
        });
        let link = PublishLink::new(transport.clone(), creds(), LinkConfig::default());
        let _commands = link.connect().await.unwrap();
        settle().await;
        let ctx = GatewayContext {
            link,
            registry: Registry::new(),
            metrics: MetricsHub::new().unwrap(),
        };
        (ctx, transport)
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    fn config() -> SessionConfig {
        SessionConfig {
            poll_interval: Duration::from_secs(60),
            first_poll_delay: Duration::from_secs(12),
            ..SessionConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn end_to_end_partial_capabilities() {
        let (ctx, transport) = context(true).await;
        let p = Arc::new(
            MockPeripheral::new("AA:BB:CC")
                .with_capabilities([Capability::Humidity, Capability::BarometricPressure])
                .with_readings(MockReadings {
                    rssi: -58,
                    temperature: 21.0,
                    humidity: 45.0,
                    pressure: 1013.0,
                    ..MockReadings::default()
                }),
        );
        let mut session = DeviceSession::new(p.clone(), ctx.clone(), config());
        session.handshake().await.unwrap();
        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(
            session.capabilities().iter().copied().collect::<Vec<_>>(),
            vec![Capability::Humidity, Capability::BarometricPressure]
        );
        assert!(ctx.registry.contains(p.id()));

        // first poll fires after the arming delay plus one period
        tokio::time::sleep(Duration::from_secs(73)).await;
        let air = transport.published_on(Channel::Air);
        assert_eq!(air.len(), 1);
        assert_eq!(air[0].topic(), "iot-2/type/sensortag/id/AA:BB:CC/evt/air/fmt/json");
        let payload: serde_json::Value = serde_json::from_str(&air[0].payload).unwrap();
        assert_eq!(
            payload,
            serde_json::json!({
                "d": { "rssi": -58, "humidity": 45.0, "temperature": 21.0, "pressure": 1013.0 }
            })
        );
    }

    #[tokio::test]
    async fn accelerometer_notifications_publish_non_zero_only() {
        let (ctx, transport) = context(true).await;
        let p = Arc::new(MockPeripheral::new("AA:BB:CC"));
        let mut session = DeviceSession::new(p.clone(), ctx.clone(), config());
        session.handshake().await.unwrap();
        assert_eq!(p.motion_period(), Some(Duration::from_millis(200)));
        let task = tokio::spawn(session.run());

        assert!(p.emit_motion(MotionSensor::Accelerometer, 0.1, 0.0, 0.0));
        assert!(p.emit_motion(MotionSensor::Accelerometer, 0.0, 0.0, 0.0));
        settle().await;

        let accel = transport.published_on(Channel::Accel);
        assert_eq!(accel.len(), 1);
        let payload: serde_json::Value = serde_json::from_str(&accel[0].payload).unwrap();
        assert_eq!(payload, serde_json::json!({ "d": { "x": 0.1, "y": 0.0, "z": 0.0 } }));
        assert_eq!(ctx.metrics.gw.motion_suppressed.get(), 1);

        p.trigger_disconnect();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn connect_failure_terminates_without_registering() {
        let (ctx, _transport) = context(true).await;
        let p = Arc::new(MockPeripheral::new("AA:BB:CC").failing_connect());
        let mut session = DeviceSession::new(p.clone(), ctx.clone(), config());

        let err = session.handshake().await.unwrap_err();
        assert!(matches!(err, GatewayError::Handshake { .. }));
        assert_eq!(session.state(), SessionState::Terminated);
        assert!(!session.has_poll_handle());
        assert!(ctx.registry.is_empty());
        assert_eq!(ctx.metrics.gw.handshake_failures.get(), 1);

        let again = session.handshake().await.unwrap_err();
        assert!(matches!(again, GatewayError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn unsupported_sensors_are_left_out() {
        let (ctx, _transport) = context(true).await;
        let p = Arc::new(
            MockPeripheral::new("AA:BB:CC")
                .with_capabilities([Capability::Luxometer, Capability::Gyroscope]),
        );
        let mut session = DeviceSession::new(p.clone(), ctx.clone(), config());
        session.handshake().await.unwrap();

        let caps = session.capabilities();
        assert_eq!(caps.len(), 2);
        assert!(caps.contains(&Capability::Gyroscope));
        assert!(!caps.contains(&Capability::Accelerometer));
        assert_eq!(p.notifying().len(), 1);
        assert_eq!(
            ctx.registry.get(p.id()).unwrap().capabilities,
            caps.clone()
        );
    }

    #[tokio::test]
    async fn battery_is_skipped_when_disabled() {
        let (ctx, _transport) = context(true).await;
        let p = Arc::new(MockPeripheral::new("AA:BB:CC"));
        let cfg = SessionConfig {
            include_battery: false,
            ..config()
        };
        let mut session = DeviceSession::new(p.clone(), ctx, cfg);
        session.handshake().await.unwrap();
        assert!(!session.capabilities().contains(&Capability::Battery));
        assert!(!p.enabled().contains(&Capability::Battery));
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_polling_and_clears_registry() {
        let (ctx, transport) = context(true).await;
        let p = Arc::new(MockPeripheral::new("AA:BB:CC"));
        let mut session = DeviceSession::new(p.clone(), ctx.clone(), config());
        session.handshake().await.unwrap();
        assert_eq!(ctx.metrics.gw.sessions_active.get(), 1);
        let task = tokio::spawn(session.run());

        tokio::time::sleep(Duration::from_secs(73)).await;
        assert_eq!(transport.published_on(Channel::Air).len(), 1);
        let reads = p.read_count();

        p.trigger_disconnect();
        task.await.unwrap();
        assert!(!ctx.registry.contains(p.id()));
        assert_eq!(ctx.metrics.gw.sessions_active.get(), 0);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(p.read_count(), reads);
        assert_eq!(transport.published_on(Channel::Air).len(), 1);
    }

    #[tokio::test]
    async fn disconnect_during_handshake_is_seen_by_run() {
        let (ctx, _transport) = context(true).await;
        let p = Arc::new(MockPeripheral::new("AA:BB:CC"));
        let mut session = DeviceSession::new(p.clone(), ctx.clone(), config());
        session.handshake().await.unwrap();
        p.trigger_disconnect();

        session.run().await;
        assert!(ctx.registry.is_empty());
    }

    #[tokio::test]
    async fn stale_session_cannot_evict_its_replacement() {
        let (ctx, _transport) = context(true).await;
        let old_unit = Arc::new(MockPeripheral::new("AA:BB:CC"));
        let mut old = DeviceSession::new(old_unit.clone(), ctx.clone(), config());
        old.handshake().await.unwrap();

        let new_unit = Arc::new(MockPeripheral::new("AA:BB:CC"));
        let mut fresh = DeviceSession::new(new_unit.clone(), ctx.clone(), config());
        fresh.handshake().await.unwrap();
        assert_ne!(old.session_id(), fresh.session_id());

        old_unit.trigger_disconnect();
        old.run().await;
        assert!(ctx.registry.is_owned_by(new_unit.id(), fresh.session_id()));
        assert_eq!(ctx.metrics.gw.sessions_active.get(), 1);
    }

    #[tokio::test]
    async fn active_gauge_follows_each_session() {
        let (ctx, _transport) = context(true).await;
        let units: Vec<_> = ["01", "02", "03"]
            .into_iter()
            .map(|id| Arc::new(MockPeripheral::new(id)))
            .collect();

        let mut tasks = Vec::new();
        for unit in &units {
            let mut session = DeviceSession::new(unit.clone(), ctx.clone(), config());
            session.handshake().await.unwrap();
            tasks.push(tokio::spawn(session.run()));
        }
        assert_eq!(ctx.metrics.gw.sessions_active.get(), 3);

        units[1].trigger_disconnect();
        tasks.remove(1).await.unwrap();
        assert_eq!(ctx.metrics.gw.sessions_active.get(), 2);
        assert_eq!(ctx.registry.len(), 2);

        for unit in &units {
            unit.trigger_disconnect();
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(ctx.metrics.gw.sessions_active.get(), 0);
        assert!(ctx.registry.is_empty());
    }

    #[tokio::test]
    async fn motion_still_touches_last_seen_while_link_down() {
        let (ctx, transport) = context(false).await;
        let p = Arc::new(MockPeripheral::new("AA:BB:CC"));
        let mut session = DeviceSession::new(p.clone(), ctx.clone(), config());
        session.handshake().await.unwrap();
        let earlier = OffsetDateTime::from_unix_timestamp(1_600_000_000).unwrap();
        assert!(ctx.registry.touch_at(p.id(), session.session_id(), earlier));
        let task = tokio::spawn(session.run());

        for _ in 0..100 {
            p.emit_motion(MotionSensor::Gyroscope, 1.0, 2.0, 3.0);
            settle().await;
        }
        assert_eq!(transport.publish_calls(), 0);
        assert_eq!(ctx.metrics.gw.samples_dropped.get(), 100);
        assert!(ctx.registry.get(p.id()).unwrap().last_seen > earlier);

        p.trigger_disconnect();
        task.await.unwrap();
    }
}
