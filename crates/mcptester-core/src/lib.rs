//! # mcptester-core
//!
//! Core types for mcp-tester - the MCP server testing tool.
//!
//! This crate provides:
//! - The configuration system (settings plus the saved server list)
//! - Connection records for the three MCP transports
//! - The `mcpServers` import/export file format
//! - Common error types

pub mod config;
pub mod error;
pub mod servers_file;

pub use config::{Config, ServerConfig};
pub use error::{Error, Result};
pub use servers_file::McpServersFile;
