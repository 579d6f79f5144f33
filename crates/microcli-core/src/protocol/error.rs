//! Protocol errors

use thiserror::Error;

/// Errors that can occur while driving the device
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Not connected to device")]
    NotConnected,

    #[error("Transport already open")]
    AlreadyOpen,

    #[error("I/O failure: {0}")]
    IoFailure(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Close failed: {0}")]
    CloseFailure(String),

    #[error("Timed out waiting for device")]
    Timeout,

    #[error("A reply is already pending")]
    ReplyPending,

    #[error("Busy: {0}")]
    Busy(&'static str),

    #[error("Invalid response from device: '{0}'")]
    InvalidResponse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Shorthand for an `InvalidParameter` with a formatted message
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        ProtocolError::InvalidParameter(msg.into())
    }
}
