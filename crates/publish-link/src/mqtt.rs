//! MQTT backend for the telemetry endpoint.
//!
//! The event loop runs on its own task for the life of the process. Broker
//! errors are reported as [`LinkEvent::Error`] and the loop keeps polling, which
//! makes the client reconnect; every `ConnAck` is reported as
//! [`LinkEvent::Connected`].

use crate::{
    command_filter, Credentials, InboundCommand, LinkError, LinkEvent, OutboundEvent, Result,
    TelemetryTransport,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub port: u16,
    pub keep_alive: Duration,
    /// Pause between a broker error and the next reconnect attempt.
    pub reconnect_delay: Duration,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            port: 1883,
            keep_alive: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

pub struct MqttTelemetryTransport {
    settings: MqttSettings,
    client: Mutex<Option<AsyncClient>>,
    events: broadcast::Sender<LinkEvent>,
}

impl MqttTelemetryTransport {
    pub fn new(settings: MqttSettings) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            settings,
            client: Mutex::new(None),
            events,
        }
    }

    fn client(&self) -> Result<AsyncClient> {
        self.client.lock().clone().ok_or(LinkError::NotConnected)
    }
}

async fn drive(
    mut eventloop: EventLoop,
    events: broadcast::Sender<LinkEvent>,
    reconnect_delay: Duration,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                debug!(code = ?ack.code, "broker accepted connection");
                let _ = events.send(LinkEvent::Connected);
            }
            Ok(Event::Incoming(Packet::Publish(msg))) => {
                match InboundCommand::from_topic(&msg.topic, &msg.payload) {
                    Some(cmd) => {
                        let _ = events.send(LinkEvent::Command(cmd));
                    }
                    None => debug!(topic = %msg.topic, "ignoring non-command message"),
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "mqtt connection error");
                let _ = events.send(LinkEvent::Error(e.to_string()));
                tokio::time::sleep(reconnect_delay).await;
            }
        }
    }
}

#[async_trait]
impl TelemetryTransport for MqttTelemetryTransport {
    async fn connect(&self, credentials: &Credentials) -> Result<()> {
        let mut slot = self.client.lock();
        if slot.is_some() {
            return Err(LinkError::AlreadyStarted);
        }
        let host = credentials.broker_host();
        let mut options = MqttOptions::new(credentials.client_id(), host.clone(), self.settings.port);
        options.set_keep_alive(self.settings.keep_alive);
        options.set_credentials(credentials.username(), credentials.auth_token.clone());

        let (client, eventloop) = AsyncClient::new(options, 64);
        *slot = Some(client);
        drop(slot);

        info!(%host, port = self.settings.port, "mqtt event loop starting");
        tokio::spawn(drive(
            eventloop,
            self.events.clone(),
            self.settings.reconnect_delay,
        ));
        Ok(())
    }

    async fn subscribe_command(&self, command: &str) -> Result<()> {
        let client = self.client()?;
        client
            .subscribe(command_filter(command), QoS::AtMostOnce)
            .await
            .map_err(|e| LinkError::Subscribe {
                command: command.to_string(),
                reason: e.to_string(),
            })
    }

    async fn publish(&self, event: &OutboundEvent) -> Result<()> {
        let client = self.client()?;
        client
            .publish(
                event.topic(),
                QoS::AtMostOnce,
                false,
                event.payload.clone().into_bytes(),
            )
            .await
            .map_err(|e| LinkError::Publish(e.to_string()))
    }

    fn events(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }
}
