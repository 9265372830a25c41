use thiserror::Error;

/// Errors from the host protocol boundary.
#[derive(Debug, Error)]
pub enum Error {
    /// The host-supplied registration arguments were missing or malformed.
    #[error("invalid registration arguments: {0}")]
    Registration(String),

    /// The WebSocket connection to the host failed.
    #[error("host connection error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    /// An inbound frame could not be decoded.
    #[error("invalid event frame: {0}")]
    Decode(#[from] serde_json::Error),

    /// An outbound command could not be delivered to the writer task.
    #[error("command channel closed")]
    CommandChannelClosed,
}

impl Error {
    pub fn registration(message: impl Into<String>) -> Self {
        Error::Registration(message.into())
    }
}
