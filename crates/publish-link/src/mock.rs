use crate::{
    Channel, Credentials, InboundCommand, LinkError, LinkEvent, OutboundEvent, Result,
    TelemetryTransport,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::broadcast;

/// In-process telemetry transport that records everything it is asked to send.
pub struct MockTelemetryTransport {
    events: broadcast::Sender<LinkEvent>,
    auto_connect: bool,
    fail_connect: AtomicBool,
    fail_publish: AtomicBool,
    connects: AtomicU64,
    publishes: AtomicU64,
    published: Mutex<Vec<OutboundEvent>>,
    subscriptions: Mutex<Vec<String>>,
}

impl MockTelemetryTransport {
    /// Reports `Connected` as soon as `connect` is called.
    pub fn new() -> Self {
        Self::build(true)
    }

    /// Never connects on its own; drive it with [`MockTelemetryTransport::emit`].
    pub fn manual() -> Self {
        Self::build(false)
    }

    fn build(auto_connect: bool) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            events,
            auto_connect,
            fail_connect: AtomicBool::new(false),
            fail_publish: AtomicBool::new(false),
            connects: AtomicU64::new(0),
            publishes: AtomicU64::new(0),
            published: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    pub fn emit(&self, event: LinkEvent) {
        let _ = self.events.send(event);
    }

    pub fn emit_command(&self, name: &str) {
        self.emit(LinkEvent::Command(InboundCommand {
            name: name.to_string(),
            format: "json".to_string(),
            payload: b"{}".to_vec(),
        }));
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn connect_calls(&self) -> u64 {
        self.connects.load(Ordering::SeqCst)
    }

    /// Every call into `publish`, including rejected ones.
    pub fn publish_calls(&self) -> u64 {
        self.publishes.load(Ordering::SeqCst)
    }

    pub fn published(&self) -> Vec<OutboundEvent> {
        self.published.lock().clone()
    }

    pub fn published_on(&self, channel: Channel) -> Vec<OutboundEvent> {
        self.published
            .lock()
            .iter()
            .filter(|e| e.channel == channel)
            .cloned()
            .collect()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().clone()
    }
}

impl Default for MockTelemetryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TelemetryTransport for MockTelemetryTransport {
    async fn connect(&self, credentials: &Credentials) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect.load(Ordering::SeqCst) {
            let reason = format!("{} unreachable", credentials.broker_host());
            self.emit(LinkEvent::Error(reason.clone()));
            return Err(LinkError::Connect(reason));
        }
        if self.auto_connect {
            self.emit(LinkEvent::Connected);
        }
        Ok(())
    }

    async fn subscribe_command(&self, command: &str) -> Result<()> {
        self.subscriptions.lock().push(command.to_string());
        Ok(())
    }

    async fn publish(&self, event: &OutboundEvent) -> Result<()> {
        self.publishes.fetch_add(1, Ordering::SeqCst);
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(LinkError::Publish("broker rejected message".to_string()));
        }
        self.published.lock().push(event.clone());
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }
}
