//! MCP transport implementations.
//!
//! A transport moves serialized JSON-RPC messages between the client and an
//! MCP server. Three transports are provided:
//!
//! - [`StdioTransport`]: spawns a child process and speaks newline-delimited
//!   JSON over its stdin/stdout.
//! - [`SseTransport`]: the legacy HTTP+SSE transport (GET event stream, POST
//!   to the announced endpoint).
//! - [`StreamableHttpTransport`]: POSTs every message, reads JSON or SSE
//!   responses.

mod sse;
mod stdio;
mod streamable_http;
#[cfg(test)]
mod test_server;

use async_trait::async_trait;
use mcptester_core::config::TransportKind;
use tokio::sync::mpsc;

use crate::error::TransportError;

pub use sse::SseTransport;
pub use stdio::StdioTransport;
pub use streamable_http::StreamableHttpTransport;

/// Receiver of raw inbound messages.
pub type Inbound = mpsc::UnboundedReceiver<String>;

/// Trait for MCP transport implementations.
///
/// Methods take `&self` so one transport can be shared between the session
/// and the client that dispatches through it.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform the transport's I/O setup and return the inbound message
    /// stream. May only be called once.
    async fn start(&self) -> Result<Inbound, TransportError>;

    /// Send one serialized message to the server.
    async fn send(&self, message: &str) -> Result<(), TransportError>;

    /// Close the transport. Calling it again is a no-op.
    async fn close(&self) -> Result<(), TransportError>;

    /// Check if the transport is connected.
    fn is_connected(&self) -> bool;

    /// Which transport this is.
    fn kind(&self) -> TransportKind;
}
