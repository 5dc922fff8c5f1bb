use thiserror::Error;

pub type Result<T, E = TransportError> = core::result::Result<T, E>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("peripheral not found: {0}")]
    NotFound(String),
    #[error("operation not supported by this peripheral: {0}")]
    Unsupported(&'static str),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("timeout")]
    Timeout,
    #[error("peripheral disconnected")]
    Disconnected,
    #[error("scanner stopped")]
    ScanStopped,
}

impl TransportError {
    /// True when the peripheral model simply lacks the requested sensor.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, TransportError::Unsupported(_))
    }
}
