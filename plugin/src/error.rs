//! Unified error handling for the plugin.
//!
//! Every backend maps its faults into this taxonomy so the engine can treat
//! fetch outcomes uniformly: log with the owning action tag and render the
//! error display state. Nothing below `main` terminates the process.

use thiserror::Error;

/// Unified error type for settings parsing, backend fetches, and display
/// updates.
#[derive(Debug, Error)]
pub enum InboxError {
    /// Settings JSON from the host (or property inspector) did not decode.
    #[error("malformed settings: {0}")]
    MalformedSettings(#[from] serde_json::Error),

    /// Transport-level failure reaching the backend (connect, timeout, IO).
    #[error("backend unreachable: {0}")]
    BackendUnavailable(String),

    /// The backend refused the request: missing credentials or a non-2xx
    /// response.
    #[error("backend rejected request: {0}")]
    BackendRejected(String),

    /// The backend answered with a shape we do not understand.
    #[error("unexpected backend response: {0}")]
    BackendProtocolError(String),

    /// A host display command failed. When this happens while reporting
    /// another error, both are carried in the message.
    #[error("display update failed: {0}")]
    DisplayUpdateFailed(String),
}

impl InboxError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        InboxError::BackendUnavailable(message.into())
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        InboxError::BackendRejected(message.into())
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        InboxError::BackendProtocolError(message.into())
    }

    /// A required settings field is empty.
    pub fn missing_field(field: &str) -> Self {
        InboxError::BackendRejected(format!("missing {field}"))
    }

    /// Classify a `reqwest` failure into the taxonomy.
    pub fn from_http(err: reqwest::Error) -> Self {
        if err.is_decode() {
            InboxError::BackendProtocolError(err.to_string())
        } else {
            // Timeouts, connection refusals, TLS faults, body IO.
            InboxError::BackendUnavailable(err.to_string())
        }
    }

    /// Reject any non-2xx response, keeping the status in the message.
    pub fn from_status(backend: &str, status: reqwest::StatusCode) -> Self {
        InboxError::BackendRejected(format!("{backend} returned {status}"))
    }
}

impl From<streamdeck::Error> for InboxError {
    fn from(err: streamdeck::Error) -> Self {
        InboxError::DisplayUpdateFailed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_field_is_a_rejection() {
        let err = InboxError::missing_field("ApiToken");
        assert!(matches!(err, InboxError::BackendRejected(_)));
        assert_eq!(err.to_string(), "backend rejected request: missing ApiToken");
    }

    #[test]
    fn test_display_errors_wrap_transport_errors() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        drop(rx);
        let sink = streamdeck::CommandSink::new(tx);
        let err: InboxError = sink.open_url("https://example.com").unwrap_err().into();
        assert!(matches!(err, InboxError::DisplayUpdateFailed(_)));
    }
}
