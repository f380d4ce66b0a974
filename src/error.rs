use thiserror::Error;

use crate::reading::SensorKind;

/// Motion sensor error types
#[derive(Error, Debug, Clone)]
pub enum SensorError {
    #[error("{kind} sensor not available")]
    Unavailable { kind: SensorKind },

    #[error("timed out after {waited_ms} ms waiting for {kind} data")]
    Timeout { kind: SensorKind, waited_ms: u64 },

    #[error("{0} is not supported on this platform")]
    Unsupported(String),

    #[error("stream closed: {0}")]
    StreamClosed(String),

    #[error("unknown method: {0}")]
    UnknownMethod(String),

    #[error("unknown event channel: {0}")]
    UnknownChannel(String),

    #[error("backend error: {0}")]
    Backend(String),
}

/// Result type for sensor operations
pub type Result<T> = std::result::Result<T, SensorError>;

impl SensorError {
    /// Stable error code reported across the host bridge.
    pub fn code(&self) -> &'static str {
        match self {
            SensorError::Unavailable { .. } => "UNAVAILABLE",
            SensorError::Timeout { .. } => "TIMEOUT",
            SensorError::Unsupported(_) => "UNSUPPORTED",
            SensorError::StreamClosed(_) => "STREAM_CLOSED",
            SensorError::UnknownMethod(_) => "UNKNOWN_METHOD",
            SensorError::UnknownChannel(_) => "UNKNOWN_CHANNEL",
            SensorError::Backend(_) => "BACKEND_ERROR",
        }
    }
}
