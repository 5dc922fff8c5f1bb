//! Host identity check.
//!
//! The configured gateway id is expected to be the host's hardware address.
//! Neither a mismatch nor a failure to read the address stops the gateway.

use crate::error::{GatewayError, Result};
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

pub trait HostIdentity {
    /// Stable hardware identifier, lowercase hex without separators.
    fn hardware_id(&self) -> Result<String>;
}

/// Reads interface MAC addresses from sysfs.
#[derive(Debug, Clone)]
pub struct SysfsHostIdentity {
    root: PathBuf,
    interface: Option<String>,
}

impl SysfsHostIdentity {
    pub fn new(interface: Option<String>) -> Self {
        Self::with_root("/sys/class/net", interface)
    }

    pub fn with_root(root: impl Into<PathBuf>, interface: Option<String>) -> Self {
        Self {
            root: root.into(),
            interface,
        }
    }

    fn read_mac(&self, iface: &str) -> Option<String> {
        let raw = fs::read_to_string(self.root.join(iface).join("address")).ok()?;
        let mac: String = raw
            .trim()
            .chars()
            .filter(|c| *c != ':')
            .collect::<String>()
            .to_ascii_lowercase();
        if mac.is_empty() || mac.chars().all(|c| c == '0') {
            None
        } else {
            Some(mac)
        }
    }
}

impl HostIdentity for SysfsHostIdentity {
    fn hardware_id(&self) -> Result<String> {
        if let Some(iface) = &self.interface {
            return self
                .read_mac(iface)
                .ok_or_else(|| GatewayError::Identity(format!("no usable address on {iface}")));
        }
        let entries = fs::read_dir(&self.root)
            .map_err(|e| GatewayError::Identity(format!("{}: {e}", self.root.display())))?;
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n != "lo")
            .collect();
        names.sort();
        names
            .iter()
            .find_map(|n| self.read_mac(n))
            .ok_or_else(|| GatewayError::Identity("no non-loopback interface with an address".into()))
    }
}

/// Fixed identity, for simulation and tests.
#[derive(Debug, Clone)]
pub struct StaticHostIdentity(pub String);

impl HostIdentity for StaticHostIdentity {
    fn hardware_id(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityCheck {
    Match,
    Mismatch { host: String },
    Unresolved(String),
}

/// Compare the host's hardware id against the configured gateway id.
pub fn check_gateway_identity(resolver: &dyn HostIdentity, configured_id: &str) -> IdentityCheck {
    match resolver.hardware_id() {
        Ok(host) if host.eq_ignore_ascii_case(configured_id) => {
            info!(id = configured_id, "gateway id matches host");
            IdentityCheck::Match
        }
        Ok(host) => {
            warn!(configured = configured_id, host = %host, "gateway id does not match host hardware id");
            IdentityCheck::Mismatch { host }
        }
        Err(e) => {
            warn!(error = %e, "could not resolve host hardware id");
            IdentityCheck::Unresolved(e.to_string())
        }
    }
}
