//! sensor-gateway: device sessions and the telemetry pipeline
//!
//! This crate ties the peripheral transport, the device registry and the publish
//! link together:
//! - Discovery of advertised peripherals, one handshake at a time
//! - A per-device session state machine owning that device's poll timer
//! - Concurrent metric polling folded into `air` samples
//! - Motion notification forwarding with all-zero readings suppressed
//! - Remote gateway commands and the host identity check

mod error;
pub use error::{GatewayError, Result};

mod config;
pub use config::{load_config, GatewayConfig, GatewaySettings, SessionConfig};

mod metrics;
pub use metrics::{GatewayMetrics, MetricsHub};

mod sample;
pub use sample::{AirReadings, ReadOutcome, Sample};

mod aggregator;
pub use aggregator::Aggregator;

mod session;
pub use session::{DeviceSession, GatewayContext, SessionState};

mod discovery;
pub use discovery::DiscoveryLoop;

mod commands;
pub use commands::{
    CommandDispatcher, DryRunHostCommands, GatewayCommand, HostCommands, ShellHostCommands,
};

mod host;
pub use host::{
    check_gateway_identity, HostIdentity, IdentityCheck, StaticHostIdentity, SysfsHostIdentity,
};

/// Keys that can appear in an `air` sample body.
pub mod keys {
    pub use crate::sample::{BATTERY, HUMIDITY, LUX, PRESSURE, RSSI, TEMPERATURE};
}
