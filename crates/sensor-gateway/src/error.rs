use crate::session::SessionState;
use ble_transport::TransportError;
use publish_link::LinkError;
use thiserror::Error;

pub type Result<T, E = GatewayError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("handshake with {device} failed: {source}")]
    Handshake {
        device: String,
        #[source]
        source: TransportError,
    },
    #[error("session for {device} is {state:?}, expected {expected:?}")]
    InvalidState {
        device: String,
        state: SessionState,
        expected: SessionState,
    },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("host command failed: {0}")]
    Host(String),
    #[error("host identity unavailable: {0}")]
    Identity(String),
    #[error("encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}
