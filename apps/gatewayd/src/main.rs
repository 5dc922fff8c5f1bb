use anyhow::{Context, Result};
use clap::Parser;
use device_registry::Registry;
use publish_link::{
    LinkConfig, MockTelemetryTransport, MqttSettings, MqttTelemetryTransport, PublishLink,
    TelemetryTransport,
};
use sensor_gateway::{
    check_gateway_identity, load_config, CommandDispatcher, DiscoveryLoop, DryRunHostCommands,
    GatewayCommand, GatewayContext, HostIdentity, MetricsHub, ShellHostCommands,
    StaticHostIdentity, SysfsHostIdentity,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

mod sim;

const LIST_SENSORS_EVERY: Duration = Duration::from_secs(300);

#[derive(Parser)]
#[command(name = "gatewayd")]
#[command(about = "Sensor gateway: discovers peripherals and relays their telemetry")]
struct Args {
    /// Gateway config (credentials and tuning)
    #[arg(long, default_value = "gateway.yaml")]
    config: PathBuf,

    /// Log filter, overrides RUST_LOG (e.g. "info", "sensor_gateway=debug")
    #[arg(long)]
    log_level: Option<String>,

    /// Simulate the telemetry endpoint and host commands as well as peripherals
    #[arg(long)]
    mock: bool,

    /// Number of simulated peripherals
    #[arg(long, default_value = "3")]
    mock_devices: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_tracing(args.log_level.as_deref());

    let config = load_config(&args.config)?;
    info!(
        client = %config.credentials.client_id(),
        poll_secs = config.gateway.poll_interval_secs,
        "gatewayd starting"
    );

    let identity: Box<dyn HostIdentity> = if args.mock {
        Box::new(StaticHostIdentity(config.credentials.id.clone()))
    } else {
        Box::new(SysfsHostIdentity::new(config.gateway.host_interface.clone()))
    };
    check_gateway_identity(identity.as_ref(), &config.credentials.id);

    let metrics = MetricsHub::new().map_err(|e| anyhow::anyhow!(e))?;
    let registry = Registry::new();
    let link_config = LinkConfig {
        event_device_type: config.gateway.event_device_type.clone(),
        commands: GatewayCommand::names(),
    };

    let link = if args.mock {
        let transport = Arc::new(MockTelemetryTransport::new());
        let link = PublishLink::new(
            transport.clone(),
            config.credentials.clone(),
            link_config,
        );
        let commands = link.connect().await.context("starting publish link")?;
        let dispatcher = CommandDispatcher::new(
            link.clone(),
            registry.clone(),
            metrics.clone(),
            DryRunHostCommands,
        );
        tokio::spawn(dispatcher.run(commands));

        // Stand in for the operator asking for the device list now and then.
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(LIST_SENSORS_EVERY);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                transport.emit_command(GatewayCommand::ListSensors.name());
            }
        });
        link
    } else {
        let transport: Arc<dyn TelemetryTransport> =
            Arc::new(MqttTelemetryTransport::new(MqttSettings {
                port: config.gateway.broker_port,
                ..MqttSettings::default()
            }));
        let link = PublishLink::new(transport, config.credentials.clone(), link_config);
        let commands = link.connect().await.context("starting publish link")?;
        let dispatcher = CommandDispatcher::new(
            link.clone(),
            registry.clone(),
            metrics.clone(),
            ShellHostCommands::new(config.gateway.update_dir.clone()),
        );
        tokio::spawn(dispatcher.run(commands));
        warn!("no radio backend in this build; peripherals are simulated");
        link
    };

    let fleet = sim::SimFleet::new(args.mock_devices);
    let scanner = fleet.scanner();
    fleet.advertise_all();
    let motion_period = Duration::from_millis(config.gateway.motion_period_ms.max(50));
    tokio::spawn(fleet.run(motion_period));
    info!(devices = args.mock_devices, "simulated fleet advertising");

    let ctx = GatewayContext {
        link,
        registry,
        metrics: metrics.clone(),
    };
    let discovery = DiscoveryLoop::new(
        scanner,
        ctx,
        config.gateway.session_config(),
        config.gateway.discovery_resume_delay(),
    );
    let discovery_task = tokio::spawn(discovery.run());

    tokio::signal::ctrl_c()
        .await
        .context("waiting for ctrl-c")?;
    info!("shutting down");
    discovery_task.abort();

    let report = metrics.encode_text();
    if report.is_empty() {
        warn!("no metrics recorded");
    } else {
        info!("final metrics:\n{report}");
    }
    Ok(())
}

fn setup_tracing(level: Option<&str>) {
    let filter = level
        .and_then(|l| tracing_subscriber::EnvFilter::try_new(l).ok())
        .unwrap_or_else(tracing_subscriber::EnvFilter::from_default_env);
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
