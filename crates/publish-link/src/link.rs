//! The gateway's single managed connection to the telemetry endpoint.

use crate::{
    envelope, Channel, ConnectionState, Credentials, InboundCommand, LinkError, LinkEvent,
    OutboundEvent, Result, TelemetryTransport,
};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// Options that do not come from the credential source.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Device type under which every event is published.
    pub event_device_type: String,
    /// Gateway commands subscribed to after each successful connect.
    pub commands: Vec<String>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            event_device_type: "sensortag".to_string(),
            commands: Vec::new(),
        }
    }
}

/// Result of a publish attempt. None of these is an error for the caller.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PublishOutcome {
    Sent,
    /// Link was disconnected; nothing reached the transport.
    Dropped,
    /// The transport rejected the send; the link is now disconnected.
    Failed,
}

struct Inner {
    transport: Arc<dyn TelemetryTransport>,
    credentials: Credentials,
    config: LinkConfig,
    state: RwLock<ConnectionState>,
    started: AtomicBool,
}

impl Inner {
    fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.write();
        if *state != next {
            debug!(from = ?*state, to = ?next, "publish link state change");
            *state = next;
        }
    }
}

/// Cheaply cloneable handle; every clone shares one connection state.
#[derive(Clone)]
pub struct PublishLink {
    inner: Arc<Inner>,
}

impl PublishLink {
    pub fn new(
        transport: Arc<dyn TelemetryTransport>,
        credentials: Credentials,
        config: LinkConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                credentials,
                config,
                state: RwLock::new(ConnectionState::Disconnected),
                started: AtomicBool::new(false),
            }),
        }
    }

    pub fn credentials(&self) -> &Credentials {
        &self.inner.credentials
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Start the link and return the stream of inbound commands.
    ///
    /// Transport callbacks are pumped on a background task for the rest of the
    /// process lifetime. A connect error is logged and leaves the link
    /// disconnected; retrying is the transport's business.
    pub async fn connect(&self) -> Result<mpsc::UnboundedReceiver<InboundCommand>> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(LinkError::AlreadyStarted);
        }
        let events = self.inner.transport.events();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(pump(Arc::clone(&self.inner), events, tx));

        let creds = &self.inner.credentials;
        info!(client = %creds.client_id(), host = %creds.broker_host(), "connecting publish link");
        if let Err(e) = self.inner.transport.connect(creds).await {
            warn!(error = %e, "publish link connect error");
            self.inner.set_state(ConnectionState::Disconnected);
        }
        Ok(rx)
    }

    /// Publish `body` wrapped in the `{"d": ...}` envelope.
    ///
    /// Nothing is sent while disconnected; the message is dropped, not queued.
    pub async fn publish(
        &self,
        device_id: &str,
        channel: Channel,
        body: &serde_json::Value,
    ) -> PublishOutcome {
        if !self.is_connected() {
            debug!(device = device_id, %channel, "publish link down, dropping message");
            return PublishOutcome::Dropped;
        }
        let event = OutboundEvent {
            device_type: self.inner.config.event_device_type.clone(),
            device_id: device_id.to_string(),
            channel,
            format: "json",
            payload: envelope(body).to_string(),
        };
        match self.inner.transport.publish(&event).await {
            Ok(()) => PublishOutcome::Sent,
            Err(e) => {
                warn!(device = device_id, %channel, error = %e, "publish failed");
                self.inner.set_state(ConnectionState::Disconnected);
                PublishOutcome::Failed
            }
        }
    }
}

async fn pump(
    inner: Arc<Inner>,
    mut events: broadcast::Receiver<LinkEvent>,
    commands: mpsc::UnboundedSender<InboundCommand>,
) {
    loop {
        match events.recv().await {
            Ok(LinkEvent::Connected) => {
                info!("gateway client connected");
                inner.set_state(ConnectionState::Connected);
                for name in &inner.config.commands {
                    if let Err(e) = inner.transport.subscribe_command(name).await {
                        warn!(command = %name, error = %e, "command subscription failed");
                    }
                }
            }
            Ok(LinkEvent::Error(reason)) => {
                warn!(%reason, "publish link error");
                inner.set_state(ConnectionState::Disconnected);
            }
            Ok(LinkEvent::Command(cmd)) => {
                if commands.send(cmd).is_err() {
                    debug!("command receiver gone, ignoring command");
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "publish link events lagged");
            }
            Err(RecvError::Closed) => {
                inner.set_state(ConnectionState::Disconnected);
                break;
            }
        }
    }
}
