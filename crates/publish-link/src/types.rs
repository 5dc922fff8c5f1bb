use core::fmt;
use serde::{Deserialize, Serialize};

fn default_domain() -> String {
    "internetofthings.ibmcloud.com".to_string()
}

/// Gateway registration with the telemetry endpoint.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub org: String,
    #[serde(rename = "type")]
    pub gateway_type: String,
    pub id: String,
    #[serde(rename = "auth-method")]
    pub auth_method: String,
    #[serde(rename = "auth-token")]
    pub auth_token: String,
    #[serde(default = "default_domain")]
    pub domain: String,
}

impl Credentials {
    /// Client identifier used for a gateway-class connection.
    pub fn client_id(&self) -> String {
        format!("g:{}:{}:{}", self.org, self.gateway_type, self.id)
    }

    /// Username for token auth; the token itself is the password.
    pub fn username(&self) -> &str {
        if self.auth_method == "token" {
            "use-token-auth"
        } else {
            &self.auth_method
        }
    }

    pub fn broker_host(&self) -> String {
        format!("{}.messaging.{}", self.org, self.domain)
    }
}

// Keep the token out of logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("org", &self.org)
            .field("gateway_type", &self.gateway_type)
            .field("id", &self.id)
            .field("auth_method", &self.auth_method)
            .field("auth_token", &"<redacted>")
            .field("domain", &self.domain)
            .finish()
    }
}

/// Logical event name appended to the publish topic.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Channel {
    Air,
    Accel,
    Gyro,
    Mag,
    SensorsListed,
    GatewayUpdated,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Air => "air",
            Channel::Accel => "accel",
            Channel::Gyro => "gyro",
            Channel::Mag => "mag",
            Channel::SensorsListed => "sensors-listed",
            Channel::GatewayUpdated => "gateway-updated",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

/// A remote command addressed to the gateway.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundCommand {
    pub name: String,
    pub format: String,
    pub payload: Vec<u8>,
}

impl InboundCommand {
    /// Parse a message received on `iot-2/type/<t>/id/<i>/cmd/<name>/fmt/<fmt>`.
    pub fn from_topic(topic: &str, payload: &[u8]) -> Option<Self> {
        let parts: Vec<&str> = topic.split('/').collect();
        match parts.as_slice() {
            ["iot-2", "type", _, "id", _, "cmd", name, "fmt", format]
                if !name.is_empty() =>
            {
                Some(Self {
                    name: (*name).to_string(),
                    format: (*format).to_string(),
                    payload: payload.to_vec(),
                })
            }
            _ => None,
        }
    }
}

/// Subscription filter for one gateway command, addressed to the gateway or
/// to any device behind it.
pub fn command_filter(command: &str) -> String {
    format!("iot-2/type/+/id/+/cmd/{command}/fmt/+")
}

/// Callbacks raised by the underlying telemetry transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkEvent {
    Connected,
    Error(String),
    Command(InboundCommand),
}

/// One self-contained outbound message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundEvent {
    pub device_type: String,
    pub device_id: String,
    pub channel: Channel,
    pub format: &'static str,
    pub payload: String,
}

impl OutboundEvent {
    pub fn topic(&self) -> String {
        format!(
            "iot-2/type/{}/id/{}/evt/{}/fmt/{}",
            self.device_type, self.device_id, self.channel, self.format
        )
    }
}

/// Wrap a body in the `{"d": ...}` envelope expected by the endpoint.
pub fn envelope(body: &serde_json::Value) -> serde_json::Value {
    serde_json::json!({ "d": body })
}
