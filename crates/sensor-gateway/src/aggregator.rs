//! Periodic metric polling for one Active device.
//!
//! Each poll tick fans out one concurrent read per metric, waits for all of them
//! to settle, and folds whatever came back into a single `air` sample. A missing
//! capability, a failed read or a timed-out read only removes that metric from
//! the sample.

use crate::metrics::MetricsHub;
use crate::sample::{AirReadings, ReadOutcome, Sample};
use ble_transport::{Capability, Peripheral, PeripheralId};
use device_registry::{Registry, SessionId};
use publish_link::{PublishLink, PublishOutcome};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

pub struct Aggregator {
    peripheral: Arc<dyn Peripheral>,
    device_id: PeripheralId,
    session: SessionId,
    capabilities: BTreeSet<Capability>,
    registry: Registry,
    link: PublishLink,
    metrics: MetricsHub,
    read_timeout: Duration,
}

impl Aggregator {
    pub fn new(
        peripheral: Arc<dyn Peripheral>,
        session: SessionId,
        capabilities: BTreeSet<Capability>,
        registry: Registry,
        link: PublishLink,
        metrics: MetricsHub,
        read_timeout: Duration,
    ) -> Self {
        let device_id = peripheral.id().clone();
        Self {
            peripheral,
            device_id,
            session,
            capabilities,
            registry,
            link,
            metrics,
            read_timeout,
        }
    }

    fn is_registered(&self) -> bool {
        self.registry.is_owned_by(&self.device_id, self.session)
    }

    async fn read<T, F>(&self, gate: Option<Capability>, fut: F) -> ReadOutcome<T>
    where
        F: Future<Output = ble_transport::Result<T>>,
    {
        if let Some(cap) = gate {
            if !self.capabilities.contains(&cap) {
                return ReadOutcome::Unsupported;
            }
        }
        match tokio::time::timeout(self.read_timeout, fut).await {
            Ok(res) => res.into(),
            Err(_) => ReadOutcome::Failed(format!("read timed out after {:?}", self.read_timeout)),
        }
    }

    /// Issue every read concurrently and wait until all have settled.
    pub async fn collect(&self) -> AirReadings {
        let p = &self.peripheral;
        let (rssi, humidity, pressure, lux, battery) = tokio::join!(
            self.read(None, p.read_rssi()),
            self.read(Some(Capability::Humidity), p.read_humidity()),
            self.read(Some(Capability::BarometricPressure), p.read_pressure()),
            self.read(Some(Capability::Luxometer), p.read_lux()),
            self.read(Some(Capability::Battery), p.read_battery()),
        );
        AirReadings {
            rssi,
            humidity,
            pressure,
            lux,
            battery,
        }
    }

    /// Run one poll cycle. Returns the sample it produced, whether or not the
    /// link accepted it, or `None` when the device left the registry.
    pub async fn run_cycle(&self) -> Option<Sample> {
        if !self.is_registered() {
            debug!(device = %self.device_id, "stale poll tick, device not registered");
            return None;
        }
        let readings = self.collect().await;
        if !self.is_registered() {
            debug!(device = %self.device_id, "device left during poll cycle, discarding sample");
            return None;
        }
        let failures = readings.failures();
        if failures > 0 {
            self.metrics.gw.read_failures.inc_by(failures as u64);
            debug!(device = %self.device_id, failures, "partial poll cycle");
        }
        let sample = Sample::air(self.device_id.clone(), readings);
        self.registry.touch(&self.device_id, self.session);
        debug!(device = %self.device_id, body = %sample.body(), "air sample");
        forward(&self.link, &self.metrics, &sample).await;
        Some(sample)
    }
}

/// Hand a sample to the link if it is up; otherwise drop it.
pub(crate) async fn forward(
    link: &PublishLink,
    metrics: &MetricsHub,
    sample: &Sample,
) -> PublishOutcome {
    if !link.is_connected() {
        metrics.gw.samples_dropped.inc();
        return PublishOutcome::Dropped;
    }
    let outcome = link
        .publish(sample.device_id().as_str(), sample.channel(), &sample.body())
        .await;
    match outcome {
        PublishOutcome::Sent => metrics.gw.samples_published.inc(),
        PublishOutcome::Dropped => metrics.gw.samples_dropped.inc(),
        PublishOutcome::Failed => metrics.gw.publish_failures.inc(),
    }
    outcome
}

/// Poll timer body. Cycles run one after another on this task, so two cycles
/// for the same device never overlap.
pub(crate) async fn poll_loop(aggregator: Aggregator, first_delay: Duration, period: Duration) {
    tokio::time::sleep(first_delay).await;
    if !aggregator.is_registered() {
        info!(device = %aggregator.device_id, "spurious timer, device is not present; not polling");
        return;
    }
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        if !aggregator.is_registered() {
            break;
        }
        aggregator.run_cycle().await;
    }
}
