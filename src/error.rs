//! Error types for the audio link

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio device errors. Always fatal to the session that hits them.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),
}

/// Datagram payload errors. These are dropped by the receive path and never
/// surface as a session failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Datagram truncated at {0} bytes")]
    Truncated(usize),

    #[error("Unexpected address pattern: {0}")]
    UnknownAddress(String),

    #[error("Unexpected type tag: {0}")]
    UnexpectedTypeTag(String),

    #[error("Payload size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },
}

/// Network errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Transport closed")]
    Closed,
}

impl NetworkError {
    /// True for the connect/listen failures reported back to the caller.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, NetworkError::BindFailed(_) | NetworkError::ConnectionFailed(_))
    }
}

/// Control-surface misuse
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Command {command} not accepted in state {state}")]
    InvalidState {
        command: &'static str,
        state: crate::session::SessionState,
    },
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
