//! The `mcpServers` import/export file.
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "filesystem": {
//!       "type": "stdio",
//!       "command": "npx",
//!       "args": ["-y", "@modelcontextprotocol/server-filesystem", "/tmp"],
//!       "env": {"NODE_ENV": "production"}
//!     },
//!     "remote": {
//!       "type": "streamable-http",
//!       "url": "https://example.com/mcp"
//!     }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::{Config, ServerConfig};
use crate::error::Error;

/// A server list keyed by server name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpServersFile {
    #[serde(rename = "mcpServers")]
    pub mcp_servers: BTreeMap<String, ServerEntry>,
}

/// One server in the file: the connection fields without the name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEntry {
    #[serde(rename = "type", default)]
    pub transport_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, alias = "customHeaders", skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl McpServersFile {
    /// Build the file from a saved server list. Unnamed servers use their label.
    ///
    /// Names are unique keys in the file; a repeated name is exported as
    /// `name (2)`, `name (3)` and so on.
    pub fn from_servers(servers: &[ServerConfig]) -> Self {
        let mut mcp_servers = BTreeMap::new();
        for server in servers {
            let entry = ServerEntry {
                transport_type: server.transport_type.clone(),
                command: server.command.clone(),
                args: server.args.clone(),
                url: server.url.clone(),
                env: server.env.clone(),
                headers: server.headers.clone(),
            };
            let label = server.label();
            let mut key = label.to_string();
            let mut n = 2;
            while mcp_servers.contains_key(&key) {
                key = format!("{} ({})", label, n);
                n += 1;
            }
            if key != label {
                tracing::warn!(name = label, exported_as = %key, "Duplicate server name in export");
            }
            mcp_servers.insert(key, entry);
        }
        Self { mcp_servers }
    }

    /// Turn the file into named server configs, in name order.
    pub fn into_servers(self) -> Vec<ServerConfig> {
        self.mcp_servers
            .into_iter()
            .map(|(name, entry)| ServerConfig {
                name: Some(name),
                transport_type: entry.transport_type,
                command: entry.command,
                args: entry.args,
                url: entry.url,
                env: entry.env,
                headers: entry.headers,
                ..ServerConfig::default()
            })
            .collect()
    }

    /// Read a server list file.
    pub fn read(path: &Path) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Write the server list as pretty-printed JSON.
    pub fn write(&self, path: &Path) -> Result<(), Error> {
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

impl Config {
    /// Merge an imported server list into the saved servers.
    ///
    /// Imported names replace saved servers of the same name; new names are
    /// appended. Returns how many servers were imported.
    pub fn import_servers(&mut self, file: McpServersFile) -> usize {
        let servers = file.into_servers();
        let count = servers.len();
        for server in servers {
            self.add_server(server);
        }
        tracing::info!(count, total = self.servers.len(), "Imported MCP servers");
        count
    }

    /// Export the full saved server list.
    pub fn export_servers(&self) -> McpServersFile {
        McpServersFile::from_servers(&self.servers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"{
        "mcpServers": {
            "filesystem": {
                "type": "stdio",
                "command": "npx",
                "args": ["-y", "@modelcontextprotocol/server-filesystem"],
                "env": {"NODE_ENV": "production"}
            },
            "remote": {
                "type": "sse",
                "url": "http://localhost:3001/sse",
                "customHeaders": {"X-Api-Key": "abc"}
            }
        }
    }"#;

    #[test]
    fn test_parse_sample() {
        let file: McpServersFile = serde_json::from_str(SAMPLE).unwrap();
        let servers = file.into_servers();
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].name.as_deref(), Some("filesystem"));
        assert_eq!(servers[0].args.len(), 2);
        assert_eq!(servers[1].headers.get("X-Api-Key").map(String::as_str), Some("abc"));
    }

    #[test]
    fn test_missing_key_is_error() {
        let result: Result<McpServersFile, _> = serde_json::from_str(r#"{"servers": {}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_import_merges_by_name() {
        let mut config = Config::default();
        config.add_server(ServerConfig::stdio("old-command").with_name("filesystem"));
        config.add_server(ServerConfig::stdio("keep").with_name("other"));

        let file: McpServersFile = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(config.import_servers(file), 2);

        assert_eq!(config.servers.len(), 3);
        assert_eq!(
            config.get_server("filesystem").and_then(|s| s.command.as_deref()),
            Some("npx")
        );
        assert!(config.get_server("other").is_some());
        assert!(config.get_server("remote").is_some());
    }

    #[test]
    fn test_export_shape() {
        let mut config = Config::default();
        config.add_server(
            ServerConfig::stdio("node")
                .with_name("local")
                .with_args(vec!["server.js".to_string()]),
        );
        config.add_server(ServerConfig::streamable_http("https://example.com/mcp"));

        let value = serde_json::to_value(config.export_servers()).unwrap();
        assert_eq!(value["mcpServers"]["local"]["type"], "stdio");
        assert_eq!(value["mcpServers"]["local"]["args"][0], "server.js");
        assert!(value["mcpServers"]["local"].get("name").is_none());
        assert!(value["mcpServers"]["local"].get("url").is_none());
        assert_eq!(value["mcpServers"]["Server 1"]["url"], "https://example.com/mcp");
    }

    #[test]
    fn test_export_keeps_servers_with_colliding_names() {
        let config = Config {
            servers: vec![
                ServerConfig::stdio("first"),
                ServerConfig::stdio("second"),
                ServerConfig::stdio("third"),
            ],
            ..Config::default()
        };

        let file = config.export_servers();
        let keys: Vec<&str> = file.mcp_servers.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec!["unnamed server", "unnamed server (2)", "unnamed server (3)"]
        );
        assert_eq!(
            file.mcp_servers["unnamed server (3)"].command.as_deref(),
            Some("third")
        );
    }

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mcp-servers.json");

        let mut config = Config::default();
        config.add_server(ServerConfig::sse("http://localhost:3001/sse").with_name("sse"));
        config.export_servers().write(&path).unwrap();

        let read = McpServersFile::read(&path).unwrap();
        assert_eq!(read.into_servers(), config.servers);
    }
}
