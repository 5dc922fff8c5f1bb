use ble_transport::{Capability, MockPeripheral, MockScanner, MotionSensor, Peripheral};
use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// A handful of simulated sensor units behind a scripted scanner.
pub struct SimFleet {
    scanner: Arc<MockScanner>,
    units: Vec<Arc<MockPeripheral>>,
}

impl SimFleet {
    pub fn new(count: usize) -> Self {
        let mut rng = rand::thread_rng();
        let units = (0..count)
            .map(|i| {
                let mut caps = vec![
                    Capability::IrTemperature,
                    Capability::Humidity,
                    Capability::BarometricPressure,
                    Capability::Accelerometer,
                    Capability::Gyroscope,
                    Capability::Magnetometer,
                ];
                // Older units have no light sensor or battery service.
                if rng.gen_bool(0.7) {
                    caps.push(Capability::Luxometer);
                }
                if rng.gen_bool(0.5) {
                    caps.push(Capability::Battery);
                }
                let kind = if caps.contains(&Capability::Luxometer) {
                    "CC2650"
                } else {
                    "CC2541"
                };
                Arc::new(
                    MockPeripheral::new(format!("B0:B4:48:00:00:{i:02X}").as_str())
                        .with_kind(kind)
                        .with_capabilities(caps)
                        .with_jitter(true),
                )
            })
            .collect();
        Self {
            scanner: Arc::new(MockScanner::new()),
            units,
        }
    }

    pub fn scanner(&self) -> Arc<MockScanner> {
        Arc::clone(&self.scanner)
    }

    pub fn advertise_all(&self) {
        for unit in &self.units {
            self.scanner.advertise(unit.clone());
        }
    }

    /// Push random motion and, now and then, drop a unit's link and bring it
    /// back a little later.
    pub async fn run(self, period: Duration) {
        if self.units.is_empty() {
            return;
        }
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let (unit, sensor, axes, drop_link) = {
                let mut rng = rand::thread_rng();
                let Some(unit) = self.units.choose(&mut rng).cloned() else {
                    return;
                };
                let Some(sensor) = MotionSensor::ALL.choose(&mut rng).copied() else {
                    return;
                };
                let axes = if rng.gen_bool(0.1) {
                    [0.0; 3]
                } else {
                    [
                        rng.gen_range(-2.0..2.0),
                        rng.gen_range(-2.0..2.0),
                        rng.gen_range(-2.0..2.0),
                    ]
                };
                (unit, sensor, axes, rng.gen_bool(0.01))
            };

            if drop_link && unit.is_connected() {
                info!(device = %unit.id(), "simulated link loss");
                unit.trigger_disconnect();
                let scanner = self.scanner();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs(15)).await;
                    scanner.advertise(unit);
                });
                continue;
            }
            unit.emit_motion(sensor, axes[0], axes[1], axes[2]);
        }
    }
}
