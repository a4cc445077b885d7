//! Transport errors.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by the pipe transport.
#[derive(Debug, Error)]
pub enum PipeError {
    #[error("I/O error on pipe: {0}")]
    Io(#[from] std::io::Error),

    #[error("no serializer registered for type '{0}'")]
    UnregisteredType(&'static str),

    #[error("no serializer registered with id {0}")]
    UnknownSerializerId(i32),

    #[error("serializer id {0} is already registered")]
    DuplicateId(i32),

    #[error("type '{0}' is already registered")]
    DuplicateType(&'static str),

    #[error("failed to serialize '{type_name}': {reason}")]
    Serialize { type_name: &'static str, reason: String },

    #[error("failed to deserialize payload with serializer id {id}: {reason}")]
    Deserialize { id: i32, reason: String },

    #[error("unexpected response type, expected '{expected}'")]
    UnexpectedResponse { expected: &'static str },

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("pipe is not connected")]
    NotConnected,

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("operation was cancelled")]
    Cancelled,

    #[error("server loop did not exit within {0:?} of disposal")]
    DisposeTimeout(Duration),

    #[error("request handler failed: {0}")]
    Handler(String),
}

impl PipeError {
    /// Whether the error stems from explicit cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipeError::Cancelled)
    }
}

/// Result type for transport operations.
pub type PipeResult<T> = Result<T, PipeError>;
