use crate::{Credentials, LinkEvent, OutboundEvent, Result};
use async_trait::async_trait;
use tokio::sync::broadcast;

/// Client for the remote telemetry endpoint.
///
/// Implementations own reconnection; the link above only mirrors the
/// connected/error callbacks they raise on [`TelemetryTransport::events`].
#[async_trait]
pub trait TelemetryTransport: Send + Sync {
    /// Start connecting. Success is reported later as [`LinkEvent::Connected`].
    async fn connect(&self, credentials: &Credentials) -> Result<()>;

    /// Subscribe to one gateway command by name.
    async fn subscribe_command(&self, command: &str) -> Result<()>;

    /// Send one message.
    async fn publish(&self, event: &OutboundEvent) -> Result<()>;

    /// Connect, error and command callbacks.
    fn events(&self) -> broadcast::Receiver<LinkEvent>;
}
