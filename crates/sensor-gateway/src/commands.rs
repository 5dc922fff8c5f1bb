//! Remote gateway commands and the host actions behind them.

use crate::error::{GatewayError, Result};
use crate::metrics::MetricsHub;
use async_trait::async_trait;
use device_registry::Registry;
use publish_link::{Channel, InboundCommand, PublishLink, PublishOutcome};
use std::path::PathBuf;
use std::str::FromStr;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum GatewayCommand {
    Reboot,
    Update,
    ListSensors,
}

impl GatewayCommand {
    pub const ALL: [GatewayCommand; 3] = [
        GatewayCommand::Reboot,
        GatewayCommand::Update,
        GatewayCommand::ListSensors,
    ];

    pub fn name(self) -> &'static str {
        match self {
            GatewayCommand::Reboot => "reboot-gateway",
            GatewayCommand::Update => "update-gateway",
            GatewayCommand::ListSensors => "list-sensors",
        }
    }

    /// Names to subscribe to on every connect.
    pub fn names() -> Vec<String> {
        Self::ALL.iter().map(|c| c.name().to_string()).collect()
    }
}

impl FromStr for GatewayCommand {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| GatewayError::UnknownCommand(s.to_string()))
    }
}

/// Host-level side effects of remote commands.
#[async_trait]
pub trait HostCommands: Send + Sync {
    async fn reboot(&self) -> Result<()>;

    /// Update the gateway software. `Ok(true)` when the update succeeded.
    async fn update(&self) -> Result<bool>;
}

/// Runs the real host commands.
#[derive(Debug, Clone, Default)]
pub struct ShellHostCommands {
    update_dir: Option<PathBuf>,
}

impl ShellHostCommands {
    pub fn new(update_dir: Option<PathBuf>) -> Self {
        Self { update_dir }
    }
}

#[async_trait]
impl HostCommands for ShellHostCommands {
    async fn reboot(&self) -> Result<()> {
        let status = Command::new("reboot")
            .status()
            .await
            .map_err(|e| GatewayError::Host(format!("reboot: {e}")))?;
        if !status.success() {
            return Err(GatewayError::Host(format!("reboot exited with {status}")));
        }
        Ok(())
    }

    async fn update(&self) -> Result<bool> {
        let mut cmd = Command::new("sudo");
        cmd.args(["git", "reset", "--hard"]);
        if let Some(dir) = &self.update_dir {
            cmd.current_dir(dir);
        }
        let status = cmd
            .status()
            .await
            .map_err(|e| GatewayError::Host(format!("git reset: {e}")))?;
        Ok(status.success())
    }
}

/// Logs instead of touching the host. Used in simulation mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunHostCommands;

#[async_trait]
impl HostCommands for DryRunHostCommands {
    async fn reboot(&self) -> Result<()> {
        info!("dry run: would reboot the host");
        Ok(())
    }

    async fn update(&self) -> Result<bool> {
        info!("dry run: would update the gateway");
        Ok(true)
    }
}

pub struct CommandDispatcher<H> {
    link: PublishLink,
    registry: Registry,
    metrics: MetricsHub,
    host: H,
    gateway_id: String,
}

impl<H: HostCommands> CommandDispatcher<H> {
    pub fn new(link: PublishLink, registry: Registry, metrics: MetricsHub, host: H) -> Self {
        let gateway_id = link.credentials().id.clone();
        Self {
            link,
            registry,
            metrics,
            host,
            gateway_id,
        }
    }

    /// Handle one inbound command.
    pub async fn dispatch(&self, cmd: &InboundCommand) -> Result<()> {
        let command: GatewayCommand = cmd.name.parse()?;
        info!(command = command.name(), "gateway command received");
        match command {
            GatewayCommand::Reboot => self.host.reboot().await,
            GatewayCommand::Update => {
                if self.host.update().await? {
                    info!("gateway updated");
                    self.reply(Channel::GatewayUpdated, serde_json::json!({}))
                        .await;
                } else {
                    warn!("gateway update failed");
                }
                Ok(())
            }
            GatewayCommand::ListSensors => {
                let listing = serde_json::to_value(self.registry.listing())?;
                self.reply(Channel::SensorsListed, listing).await;
                Ok(())
            }
        }
    }

    async fn reply(&self, channel: Channel, body: serde_json::Value) {
        let outcome = self.link.publish(&self.gateway_id, channel, &body).await;
        match outcome {
            PublishOutcome::Sent => self.metrics.gw.samples_published.inc(),
            PublishOutcome::Dropped => {
                self.metrics.gw.samples_dropped.inc();
                debug!(%channel, "reply dropped, link down");
            }
            PublishOutcome::Failed => self.metrics.gw.publish_failures.inc(),
        }
    }

    /// Drain the command stream until the link goes away.
    pub async fn run(self, mut commands: mpsc::UnboundedReceiver<InboundCommand>) {
        while let Some(cmd) = commands.recv().await {
            if let Err(e) = self.dispatch(&cmd).await {
                warn!(command = %cmd.name, error = %e, "gateway command not handled");
            }
        }
        debug!("command stream closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ble_transport::{Capability, PeripheralId};
    use device_registry::{RegistryEntry, SessionId};
    use publish_link::{Credentials, LinkConfig, MockTelemetryTransport};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use time::OffsetDateTime;

    #[derive(Default)]
    struct Counters {
        reboots: AtomicU32,
        updates: AtomicU32,
    }

    struct FakeHost {
        calls: Arc<Counters>,
        update_ok: bool,
    }

    #[async_trait]
    impl HostCommands for FakeHost {
        async fn reboot(&self) -> Result<()> {
            self.calls.reboots.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn update(&self) -> Result<bool> {
            self.calls.updates.fetch_add(1, Ordering::SeqCst);
            Ok(self.update_ok)
        }
    }

    fn creds() -> Credentials {
        Credentials {
            org: "abc123".to_string(),
            gateway_type: "gateway".to_string(),
            id: "b827eb000001".to_string(),
            auth_method: "token".to_string(),
            auth_token: "t".to_string(),
            domain: "example.com".to_string(),
        }
    }

    async fn dispatcher(
        update_ok: bool,
    ) -> (
        CommandDispatcher<FakeHost>,
        Arc<MockTelemetryTransport>,
        Arc<Counters>,
        Registry,
    ) {
        let transport = Arc::new(MockTelemetryTransport::new());
        let link = PublishLink::new(transport.clone(), creds(), LinkConfig::default());
        let _commands = link.connect().await.unwrap();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        let calls = Arc::new(Counters::default());
        let registry = Registry::new();
        let host = FakeHost {
            calls: calls.clone(),
            update_ok,
        };
        let d = CommandDispatcher::new(link, registry.clone(), MetricsHub::new().unwrap(), host);
        (d, transport, calls, registry)
    }

    fn command(name: &str) -> InboundCommand {
        InboundCommand {
            name: name.to_string(),
            format: "json".to_string(),
            payload: b"{}".to_vec(),
        }
    }

    #[test]
    fn names_round_trip() {
        for c in GatewayCommand::ALL {
            assert_eq!(c.name().parse::<GatewayCommand>().unwrap(), c);
        }
        assert!(matches!(
            "self-destruct".parse::<GatewayCommand>(),
            Err(GatewayError::UnknownCommand(_))
        ));
    }

    #[tokio::test]
    async fn list_sensors_publishes_registry_snapshot() {
        let (d, transport, _calls, registry) = dispatcher(true).await;
        let session = SessionId::new();
        let id = PeripheralId::new("AA:BB:CC");
        registry.activate(
            id.clone(),
            RegistryEntry::new(session, "CC2650", [Capability::Humidity].into_iter().collect()),
        );
        let at = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        registry.touch_at(&id, session, at);

        d.dispatch(&command("list-sensors")).await.unwrap();
        let sent = transport.published_on(Channel::SensorsListed);
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].topic(),
            "iot-2/type/sensortag/id/b827eb000001/evt/sensors-listed/fmt/json"
        );
        let payload: serde_json::Value = serde_json::from_str(&sent[0].payload).unwrap();
        assert_eq!(
            payload,
            serde_json::json!({ "d": { "devices": { "AA:BB:CC": 1_700_000_000 } } })
        );
    }

    #[tokio::test]
    async fn successful_update_is_acknowledged() {
        let (d, transport, calls, _registry) = dispatcher(true).await;
        d.dispatch(&command("update-gateway")).await.unwrap();
        assert_eq!(calls.updates.load(Ordering::SeqCst), 1);
        let sent = transport.published_on(Channel::GatewayUpdated);
        assert_eq!(sent.len(), 1);
        let payload: serde_json::Value = serde_json::from_str(&sent[0].payload).unwrap();
        assert_eq!(payload, serde_json::json!({ "d": {} }));
    }

    #[tokio::test]
    async fn failed_update_sends_nothing() {
        let (d, transport, calls, _registry) = dispatcher(false).await;
        d.dispatch(&command("update-gateway")).await.unwrap();
        assert_eq!(calls.updates.load(Ordering::SeqCst), 1);
        assert!(transport.published().is_empty());
    }

    #[tokio::test]
    async fn run_routes_commands_and_skips_unknown() {
        let (d, transport, calls, _registry) = dispatcher(true).await;
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(command("bogus")).unwrap();
        tx.send(command("reboot-gateway")).unwrap();
        drop(tx);

        d.run(rx).await;
        assert_eq!(calls.reboots.load(Ordering::SeqCst), 1);
        assert!(transport.published().is_empty());
    }
}
