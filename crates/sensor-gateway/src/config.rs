//! Gateway configuration: credentials plus tuning knobs, loaded from one YAML file.

use anyhow::{ensure, Context};
use publish_link::Credentials;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub credentials: Credentials,
    #[serde(default)]
    pub gateway: GatewaySettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    pub poll_interval_secs: u64,
    /// Delay before a newly Active device's poll timer is armed.
    pub first_poll_delay_secs: u64,
    pub motion_period_ms: u64,
    pub read_timeout_secs: u64,
    pub include_battery: bool,
    /// Pause after each handshake before scanning again.
    pub discovery_resume_delay_ms: u64,
    pub event_device_type: String,
    pub broker_port: u16,
    pub host_interface: Option<String>,
    pub update_dir: Option<PathBuf>,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            first_poll_delay_secs: 12,
            motion_period_ms: 200,
            read_timeout_secs: 10,
            include_battery: true,
            discovery_resume_delay_ms: 0,
            event_device_type: "sensortag".to_string(),
            broker_port: 1883,
            host_interface: None,
            update_dir: None,
        }
    }
}

impl GatewaySettings {
    pub fn discovery_resume_delay(&self) -> Duration {
        Duration::from_millis(self.discovery_resume_delay_ms)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            first_poll_delay: Duration::from_secs(self.first_poll_delay_secs),
            motion_period: Duration::from_millis(self.motion_period_ms),
            read_timeout: Duration::from_secs(self.read_timeout_secs),
            include_battery: self.include_battery,
        }
    }
}

/// Per-session timing, derived from [`GatewaySettings`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub poll_interval: Duration,
    pub first_poll_delay: Duration,
    pub motion_period: Duration,
    pub read_timeout: Duration,
    pub include_battery: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        GatewaySettings::default().session_config()
    }
}

impl GatewayConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        let c = &self.credentials;
        for (key, value) in [
            ("org", &c.org),
            ("type", &c.gateway_type),
            ("id", &c.id),
            ("auth-method", &c.auth_method),
            ("auth-token", &c.auth_token),
        ] {
            ensure!(!value.trim().is_empty(), "credentials.{key} must not be empty");
        }
        ensure!(
            self.gateway.poll_interval_secs > 0,
            "gateway.poll_interval_secs must be positive"
        );
        ensure!(
            self.gateway.read_timeout_secs > 0,
            "gateway.read_timeout_secs must be positive"
        );
        Ok(())
    }
}

pub fn load_config(path: impl AsRef<Path>) -> anyhow::Result<GatewayConfig> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path).with_context(|| {
        format!(
            "reading gateway config: {} (it must hold the gateway registration: org, type, id, auth-method, auth-token)",
            path.display()
        )
    })?;
    let cfg: GatewayConfig =
        serde_yaml::from_str(&raw).with_context(|| format!("parsing yaml: {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validating config: {}", path.display()))?;
    Ok(cfg)
}
