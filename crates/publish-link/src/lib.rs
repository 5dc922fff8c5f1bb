//! publish-link: managed connection to the remote telemetry endpoint
//!
//! [`PublishLink`] mirrors the connect/error callbacks of a [`TelemetryTransport`]
//! into a connected flag, subscribes to gateway commands on every connect, and
//! drops (never queues) messages published while disconnected. The `mqtt` feature
//! adds a broker-backed transport; `mock` (default) records sends in memory.

mod types;
pub use types::{
    command_filter, envelope, Channel, ConnectionState, Credentials, InboundCommand, LinkEvent,
    OutboundEvent,
};

mod error;
pub use error::{LinkError, Result};

mod traits;
pub use traits::TelemetryTransport;

mod link;
pub use link::{LinkConfig, PublishLink, PublishOutcome};

#[cfg(feature = "mqtt")]
mod mqtt;

#[cfg(feature = "mqtt")]
pub use mqtt::{MqttSettings, MqttTelemetryTransport};

#[cfg(feature = "mock")]
mod mock;

#[cfg(feature = "mock")]
pub use mock::MockTelemetryTransport;
