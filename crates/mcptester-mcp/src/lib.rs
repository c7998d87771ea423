//! # mcptester-mcp
//!
//! MCP (Model Context Protocol) session management for mcp-tester.
//!
//! This crate provides:
//! - stdio, HTTP+SSE and streamable HTTP transports
//! - A JSON-RPC client with request correlation and timeouts
//! - A [`Session`] that owns one connection, records a bounded request
//!   history and publishes state changes as [`SessionEvent`]s

pub mod client;
pub mod error;
pub mod events;
pub mod factory;
pub mod history;
pub mod protocol;
pub mod session;
pub mod sse;
pub mod transport;

pub use client::McpClient;
pub use error::{ErrorKind, McpError, TransportError};
pub use events::{ConnectionStatus, EventBus, SessionEvent};
pub use factory::{create_transport, DefaultTransportFactory, TransportFactory, TransportSpec};
pub use history::{HistoryItem, RequestHistory};
pub use session::{Session, SessionOptions};
pub use transport::Transport;
