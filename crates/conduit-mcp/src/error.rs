//! Failures of provider transports and sessions.

use std::time::Duration;

use conduit_core::TransportKind;
use thiserror::Error;

/// Moving bytes to or from one provider failed.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The provider command could not be started.
    #[error("failed to spawn process: {0}")]
    SpawnFailed(std::io::Error),

    /// Writing a frame failed.
    #[error("write error: {0}")]
    WriteError(std::io::Error),

    /// Reading a frame failed.
    #[error("read error: {0}")]
    ReadError(std::io::Error),

    /// A line from the provider was not valid UTF-8.
    #[error("invalid UTF-8 from provider: {0}")]
    InvalidEncoding(#[from] std::string::FromUtf8Error),

    /// HTTP request failed before a response arrived.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider answered with a non-success status.
    #[error("HTTP status {status}: {body}")]
    Status { status: u16, body: String },

    /// The provider broke the transport's framing rules.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// No traffic within the allowed window.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The provider hung up mid-session.
    #[error("connection closed")]
    ConnectionClosed,

    /// Used before `connect` or after `close`.
    #[error("not connected")]
    NotConnected,
}

/// A session-level failure.
#[derive(Debug, Error)]
pub enum McpError {
    /// The underlying transport gave up.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Connecting or the initialize handshake failed.
    #[error("failed to connect to '{provider}' over {kind}: {source}")]
    Connection {
        provider: String,
        kind: TransportKind,
        #[source]
        source: Box<McpError>,
    },

    /// A frame that is not valid JSON-RPC for this exchange.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Operation attempted before a successful connect, or after close.
    #[error("session '{provider}' is not initialized (state: {state})")]
    NotInitialized { provider: String, state: String },

    /// No active session carries this name.
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    /// The provider answered with a JSON-RPC error object.
    #[error("server error (code {code}): {message}")]
    ServerError { code: i32, message: String },

    /// Encoding a request or decoding a result failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// No response within the session's read timeout.
    #[error("request '{method}' timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },
}

impl McpError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// From the `code` and `message` of a JSON-RPC error.
    pub fn server_error(code: i32, message: impl Into<String>) -> Self {
        Self::ServerError {
            code,
            message: message.into(),
        }
    }

    /// Wrap a setup failure with the provider's identity.
    pub fn connection(provider: impl Into<String>, kind: TransportKind, source: McpError) -> Self {
        Self::Connection {
            provider: provider.into(),
            kind,
            source: Box::new(source),
        }
    }

    /// Whether the failure came from the transport rather than the provider.
    pub fn is_transport(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout { .. } => true,
            Self::Connection { source, .. } => source.is_transport(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_messages() {
        let err = TransportError::ConnectionClosed;
        assert_eq!(err.to_string(), "connection closed");

        let err = TransportError::Status {
            status: 401,
            body: r#"{"detail":"Invalid or missing API key"}"#.to_string(),
        };
        assert!(err.to_string().starts_with("HTTP status 401"));
    }

    #[test]
    fn test_session_error_messages() {
        let err = McpError::UnknownProvider("nope".to_string());
        assert_eq!(err.to_string(), "unknown provider: nope");

        let err = McpError::server_error(-32602, "Unknown tool: x");
        assert_eq!(err.to_string(), "server error (code -32602): Unknown tool: x");
    }

    #[test]
    fn test_connection_error_carries_kind_and_cause() {
        let err = McpError::connection(
            "weather",
            TransportKind::Sse,
            TransportError::ConnectionClosed.into(),
        );
        assert_eq!(
            err.to_string(),
            "failed to connect to 'weather' over sse: transport error: connection closed"
        );
        assert!(err.is_transport());
        assert!(std::error::Error::source(&err).is_some());
    }
}
