use thiserror::Error;

pub type Result<T, E = LinkError> = core::result::Result<T, E>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LinkError {
    #[error("link is not connected")]
    NotConnected,
    #[error("link already started")]
    AlreadyStarted,
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("subscribe to command '{command}' failed: {reason}")]
    Subscribe { command: String, reason: String },
    #[error("publish failed: {0}")]
    Publish(String),
}
