//! Configuration system for mcp-tester.
//!
//! Settings are layered with figment: built-in defaults, the user config file,
//! the project config file, then `MCP_TESTER_*` environment variables.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Default number of request history entries kept per session.
pub const DEFAULT_MAX_HISTORY: usize = 100;

/// Default connect/request timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Timeouts above this produce a validation warning.
const LONG_TIMEOUT_MS: u64 = 10 * 60 * 1000;

/// Main configuration struct for mcp-tester.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Maximum number of request history entries
    #[serde(alias = "maxHistory")]
    pub max_history: usize,
    /// Connect and request timeout in milliseconds
    pub timeout: u64,
    /// Open the panel on startup
    #[serde(alias = "autoStart")]
    pub auto_start: bool,
    /// Saved servers
    pub servers: Vec<ServerConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_history: DEFAULT_MAX_HISTORY,
            timeout: DEFAULT_TIMEOUT_MS,
            auto_start: true,
            servers: Vec::new(),
        }
    }
}

/// The three transports an MCP server can be reached over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    /// Child process speaking newline-delimited JSON on stdin/stdout.
    Stdio,
    /// Legacy HTTP+SSE transport (GET event stream, POST to announced endpoint).
    Sse,
    /// Streamable HTTP transport (single endpoint, JSON or SSE responses).
    StreamableHttp,
}

impl TransportKind {
    /// The string used for this kind in configuration files.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::Sse => "sse",
            Self::StreamableHttp => "streamable-http",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdio" => Ok(Self::Stdio),
            "sse" => Ok(Self::Sse),
            "streamable-http" => Ok(Self::StreamableHttp),
            other => Err(format!("unknown transport type '{}'", other)),
        }
    }
}

/// A saved MCP server connection.
///
/// This is the loose record as it appears in config and import files. The
/// transport-specific invariants (a command for stdio, a URL for the HTTP
/// transports) are enforced when a transport is built from it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Display name; assigned automatically when saved without one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Transport type: `stdio`, `sse` or `streamable-http`
    #[serde(rename = "type", default)]
    pub transport_type: String,
    /// Command to execute (stdio)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Command arguments (stdio)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Server URL (sse, streamable-http)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// OAuth client id; accepted but not used
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth_client_id: Option<String>,
    /// OAuth scope; accepted but not used
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth_scope: Option<String>,
    /// Environment overlay for the child process (stdio)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    /// Extra HTTP headers (sse, streamable-http)
    #[serde(default, alias = "customHeaders", skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl ServerConfig {
    /// A stdio server running `command`.
    pub fn stdio(command: impl Into<String>) -> Self {
        Self {
            transport_type: TransportKind::Stdio.to_string(),
            command: Some(command.into()),
            ..Self::default()
        }
    }

    /// A legacy HTTP+SSE server at `url`.
    pub fn sse(url: impl Into<String>) -> Self {
        Self {
            transport_type: TransportKind::Sse.to_string(),
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// A streamable HTTP server at `url`.
    pub fn streamable_http(url: impl Into<String>) -> Self {
        Self {
            transport_type: TransportKind::StreamableHttp.to_string(),
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the command arguments.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Add an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Add a custom HTTP header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Parse the transport type.
    pub fn transport_kind(&self) -> Result<TransportKind, String> {
        self.transport_type.parse()
    }

    /// Name used in logs and messages.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("unnamed server")
    }

    /// Describe what is missing for this server to be connectable.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        match self.transport_kind() {
            Ok(TransportKind::Stdio) => {
                if self.command.as_deref().map_or(true, |c| c.trim().is_empty()) {
                    problems.push("stdio transport requires a command".to_string());
                }
            }
            Ok(kind @ (TransportKind::Sse | TransportKind::StreamableHttp)) => match self.url.as_deref() {
                None => problems.push(format!("{} transport requires a url", kind)),
                Some(url) if !url.starts_with("http://") && !url.starts_with("https://") => {
                    problems.push(format!("url '{}' must start with http:// or https://", url));
                }
                Some(_) => {}
            },
            Err(e) => problems.push(e),
        }
        if self.oauth_client_id.is_some() || self.oauth_scope.is_some() {
            problems.push("OAuth settings are not supported and will be ignored".to_string());
        }
        problems
    }
}

/// Validation result with multiple issues.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    /// List of validation issues
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Create a new empty validation result.
    pub fn new() -> Self {
        Self { issues: Vec::new() }
    }

    /// Check if validation passed (no errors).
    pub fn is_ok(&self) -> bool {
        !self.issues.iter().any(|i| i.severity == IssueSeverity::Error)
    }

    /// Get only error-level issues.
    pub fn errors(&self) -> Vec<&ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == IssueSeverity::Error).collect()
    }

    /// Get only warning-level issues.
    pub fn warnings(&self) -> Vec<&ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == IssueSeverity::Warning).collect()
    }

    /// Add an error.
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: IssueSeverity::Error,
            field: field.into(),
            message: message.into(),
        });
    }

    /// Add a warning.
    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: IssueSeverity::Warning,
            field: field.into(),
            message: message.into(),
        });
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

/// A single validation issue.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Severity of the issue
    pub severity: IssueSeverity,
    /// Field path (e.g., "servers[0]")
    pub field: String,
    /// Human-readable message
    pub message: String,
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueSeverity {
    /// Warnings don't prevent loading
    Warning,
    /// Errors prevent loading
    Error,
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// There is no serialized defaults layer: its snake_case keys would
    /// duplicate the camelCase aliases accepted in files.
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(Self::config_file()))
            .merge(Toml::file(".mcp-tester/config.toml"))
            .merge(Env::prefixed("MCP_TESTER_"))
            .extract()
    }

    /// Load configuration from a single explicit file (plus defaults and environment).
    pub fn load_from(path: &Path) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("MCP_TESTER_"))
            .extract()
    }

    /// Load and validate configuration.
    pub fn load_validated(path: Option<&Path>) -> Result<Self, Error> {
        let config = match path {
            Some(path) => Self::load_from(path),
            None => Self::load(),
        }
        .map_err(|e| Error::Config(e.to_string()))?;
        let result = config.validate();

        if !result.is_ok() {
            let errors: Vec<String> = result
                .errors()
                .iter()
                .map(|e| format!("{}: {}", e.field, e.message))
                .collect();
            return Err(Error::Validation(format!(
                "Configuration validation failed:\n  {}",
                errors.join("\n  ")
            )));
        }

        for warning in result.warnings() {
            tracing::warn!("Config warning - {}: {}", warning.field, warning.message);
        }

        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();

        if self.max_history == 0 {
            result.add_error("max_history", "max_history must be greater than 0");
        }

        if self.timeout == 0 {
            result.add_error("timeout", "timeout must be greater than 0");
        } else if self.timeout > LONG_TIMEOUT_MS {
            result.add_warning("timeout", "timeout is longer than 10 minutes");
        }

        let mut seen = std::collections::HashSet::new();
        for (idx, server) in self.servers.iter().enumerate() {
            let field = format!("servers[{}]", idx);
            if let Some(name) = server.name.as_deref() {
                if !seen.insert(name) {
                    result.add_warning(&field, format!("duplicate server name '{}'", name));
                }
            }
            for problem in server.problems() {
                result.add_warning(&field, format!("{}: {}", server.label(), problem));
            }
        }

        result
    }

    /// Write the configuration as TOML.
    pub fn save_to(&self, path: &Path) -> Result<(), Error> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        tracing::debug!(path = %path.display(), servers = self.servers.len(), "Saved configuration");
        Ok(())
    }

    /// Save a server, replacing any saved server with the same name.
    ///
    /// Servers without a name get the next free `Server N` label. Returns the
    /// name the server was saved under.
    pub fn add_server(&mut self, mut server: ServerConfig) -> String {
        let name = match server.name.clone() {
            Some(name) => name,
            None => {
                let label = self.next_server_label();
                server.name = Some(label.clone());
                label
            }
        };

        match self
            .servers
            .iter_mut()
            .find(|s| s.name.as_deref() == Some(name.as_str()))
        {
            Some(existing) => *existing = server,
            None => self.servers.push(server),
        }
        name
    }

    /// Remove a saved server by name.
    pub fn remove_server(&mut self, name: &str) -> bool {
        let original_len = self.servers.len();
        self.servers.retain(|s| s.name.as_deref() != Some(name));
        self.servers.len() < original_len
    }

    /// Get a saved server by name.
    pub fn get_server(&self, name: &str) -> Option<&ServerConfig> {
        self.servers.iter().find(|s| s.name.as_deref() == Some(name))
    }

    /// The first `Server N` label not used by a saved server.
    pub fn next_server_label(&self) -> String {
        (1..)
            .map(|n| format!("Server {}", n))
            .find(|label| self.get_server(label).is_none())
            .unwrap_or_else(|| "Server".to_string())
    }

    /// Get the configuration directory.
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|p| p.join("mcp-tester"))
            .unwrap_or_else(|| PathBuf::from("~/.config/mcp-tester"))
    }

    /// Get the user configuration file.
    pub fn config_file() -> PathBuf {
        Self::config_dir().join("config.toml")
    }
}
