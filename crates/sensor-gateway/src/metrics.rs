use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

#[derive(Clone)]
pub struct GatewayMetrics {
    pub samples_published: IntCounter,
    pub samples_dropped: IntCounter,
    pub publish_failures: IntCounter,
    pub motion_suppressed: IntCounter,
    pub read_failures: IntCounter,
    pub handshake_failures: IntCounter,
    pub sessions_active: IntGauge,
}

#[derive(Clone)]
pub struct MetricsHub {
    pub registry: Registry,
    pub gw: GatewayMetrics,
}

fn counter(name: &str, help: &str) -> Result<IntCounter, String> {
    IntCounter::new(name, help).map_err(|e| format!("metrics init error: {e}"))
}

impl MetricsHub {
    pub fn new() -> Result<Self, String> {
        let registry = Registry::new();
        let gw = GatewayMetrics {
            samples_published: counter("gw_samples_published", "Samples handed to the transport")?,
            samples_dropped: counter(
                "gw_samples_dropped",
                "Samples dropped because the publish link was down",
            )?,
            publish_failures: counter("gw_publish_failures", "Sends rejected by the transport")?,
            motion_suppressed: counter(
                "gw_motion_suppressed",
                "All-zero motion readings filtered as noise",
            )?,
            read_failures: counter("gw_read_failures", "Metric reads that failed or timed out")?,
            handshake_failures: counter(
                "gw_handshake_failures",
                "Peripheral connect handshakes that failed",
            )?,
            sessions_active: IntGauge::new("gw_sessions_active", "Devices in the Active state")
                .map_err(|e| format!("metrics init error: {e}"))?,
        };
        let _ = registry.register(Box::new(gw.samples_published.clone()));
        let _ = registry.register(Box::new(gw.samples_dropped.clone()));
        let _ = registry.register(Box::new(gw.publish_failures.clone()));
        let _ = registry.register(Box::new(gw.motion_suppressed.clone()));
        let _ = registry.register(Box::new(gw.read_failures.clone()));
        let _ = registry.register(Box::new(gw.handshake_failures.clone()));
        let _ = registry.register(Box::new(gw.sessions_active.clone()));
        Ok(Self { registry, gw })
    }

    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            return format!("error encoding metrics: {e}");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}
