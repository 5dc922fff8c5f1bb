//! Discovery loop: one handshake at a time, then scan again.

use crate::config::SessionConfig;
use crate::session::{DeviceSession, GatewayContext};
use ble_transport::{Peripheral, Scanner, TransportError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const SCAN_RETRY_DELAY: Duration = Duration::from_secs(5);

pub struct DiscoveryLoop {
    scanner: Arc<dyn Scanner>,
    ctx: GatewayContext,
    config: SessionConfig,
    resume_delay: Duration,
}

impl DiscoveryLoop {
    pub fn new(
        scanner: Arc<dyn Scanner>,
        ctx: GatewayContext,
        config: SessionConfig,
        resume_delay: Duration,
    ) -> Self {
        Self {
            scanner,
            ctx,
            config,
            resume_delay,
        }
    }

    /// Scan until the scanner stops.
    ///
    /// Each discovered device gets a new session whose handshake is awaited
    /// before scanning resumes, so at most one handshake is ever in flight.
    /// Devices already Active are skipped.
    pub async fn run(self) {
        info!("discovery started");
        loop {
            let peripheral = match self.scanner.discover().await {
                Ok(p) => p,
                Err(TransportError::ScanStopped) => {
                    info!("scanner stopped, discovery finished");
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "scan failed, retrying");
                    tokio::time::sleep(SCAN_RETRY_DELAY).await;
                    continue;
                }
            };

            if self.ctx.registry.contains(peripheral.id()) {
                debug!(device = %peripheral.id(), "already active, ignoring advertisement");
                continue;
            }

            let mut session = DeviceSession::new(peripheral, self.ctx.clone(), self.config.clone());
            match session.handshake().await {
                Ok(()) => {
                    tokio::spawn(session.run());
                }
                Err(e) => warn!(error = %e, "handshake failed"),
            }

            if !self.resume_delay.is_zero() {
                tokio::time::sleep(self.resume_delay).await;
            }
        }
    }
}
