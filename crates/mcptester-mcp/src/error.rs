//! MCP-specific error types.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to spawn the child process.
    #[error("failed to spawn process: {0}")]
    Spawn(std::io::Error),

    /// Failed to write to the transport.
    #[error("write error: {0}")]
    Write(std::io::Error),

    /// Failed to read from the transport.
    #[error("read error: {0}")]
    Read(std::io::Error),

    /// Connection was closed unexpectedly.
    #[error("connection closed")]
    ConnectionClosed,

    /// Transport is not connected.
    #[error("not connected")]
    NotConnected,

    /// `start` was called twice.
    #[error("transport already started")]
    AlreadyStarted,

    /// Failed to terminate the process.
    #[error("failed to terminate process: {0}")]
    Terminate(std::io::Error),

    /// The server answered with a non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The HTTP request could not be sent.
    #[error("HTTP request failed: {0}")]
    Request(String),

    /// The event stream broke or never announced what it should.
    #[error("event stream error: {0}")]
    Stream(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        Self::Request(e.to_string())
    }
}

/// Coarse classification of [`McpError`], for callers that only need to
/// tell configuration mistakes from live failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    NotConnected,
    Timeout,
    Transport,
    Protocol,
}

/// Errors that can occur during MCP operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// Bad or missing transport fields.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Operation attempted without an active session.
    #[error("not connected to an MCP server")]
    NotConnected,

    /// Connect or request exceeded its deadline.
    #[error("{operation} timed out after {millis}ms")]
    Timeout { operation: String, millis: u64 },

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Malformed message from the server.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Server returned a JSON-RPC error response.
    #[error("server rejected request (code {code}): {message}")]
    Server { code: i64, message: String },

    /// A newer `connect` or a `disconnect` replaced this connect attempt.
    #[error("connect attempt superseded by a newer connect or disconnect")]
    Superseded,

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    /// Create a configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a timeout error for `operation`.
    pub fn timeout(operation: impl Into<String>, millis: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            millis,
        }
    }

    /// Create a server error from a JSON-RPC error object.
    pub fn server(code: i64, message: impl Into<String>) -> Self {
        Self::Server {
            code,
            message: message.into(),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::NotConnected => ErrorKind::NotConnected,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Transport(_) | Self::Superseded => ErrorKind::Transport,
            Self::Protocol(_) | Self::Server { .. } | Self::Json(_) => ErrorKind::Protocol,
        }
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub(crate) fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl From<McpError> for mcptester_core::Error {
    fn from(e: McpError) -> Self {
        match e {
            McpError::Configuration(msg) => mcptester_core::Error::Config(msg),
            other => mcptester_core::Error::Mcp(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::ConnectionClosed;
        assert_eq!(err.to_string(), "connection closed");

        let err = TransportError::Http {
            status: 404,
            body: "not found".to_string(),
        };
        assert_eq!(err.to_string(), "HTTP 404: not found");
    }

    #[test]
    fn test_mcp_error_messages() {
        let err = McpError::configuration("stdio transport requires a command");
        assert_eq!(
            err.to_string(),
            "configuration error: stdio transport requires a command"
        );

        let err = McpError::timeout("request 'tools/list'", 1500);
        assert_eq!(err.to_string(), "request 'tools/list' timed out after 1500ms");

        let err = McpError::server(-32601, "Method not found");
        assert_eq!(
            err.to_string(),
            "server rejected request (code -32601): Method not found"
        );
    }

    #[test]
    fn test_duration_millis_saturates() {
        assert_eq!(duration_millis(Duration::from_millis(1500)), 1500);
        assert_eq!(duration_millis(Duration::MAX), u64::MAX);
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(McpError::NotConnected.kind(), ErrorKind::NotConnected);
        assert_eq!(
            McpError::from(TransportError::NotConnected).kind(),
            ErrorKind::Transport
        );
        assert_eq!(McpError::protocol("bad").kind(), ErrorKind::Protocol);
    }

    #[test]
    fn test_mcp_error_to_core_error() {
        let core_err: mcptester_core::Error = McpError::configuration("missing url").into();
        assert!(matches!(core_err, mcptester_core::Error::Config(_)));

        let core_err: mcptester_core::Error = McpError::NotConnected.into();
        assert!(matches!(core_err, mcptester_core::Error::Mcp(_)));
    }
}
