//! Building transports from saved server configs.
//!
//! [`TransportSpec`] is the validated form of a
//! [`ServerConfig`](mcptester_core::ServerConfig): each variant holds exactly
//! the fields its transport needs. Nothing here performs I/O.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use mcptester_core::config::{ServerConfig, TransportKind};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Url;
use tracing::{debug, warn};

use crate::error::McpError;
use crate::transport::{SseTransport, StdioTransport, StreamableHttpTransport, Transport};

/// A validated transport description.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportSpec {
    Stdio {
        command: String,
        args: Vec<String>,
        env: BTreeMap<String, String>,
    },
    Sse {
        url: Url,
        headers: HeaderMap,
    },
    StreamableHttp {
        url: Url,
        headers: HeaderMap,
    },
}

impl TransportSpec {
    /// The transport kind this spec builds.
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Stdio { .. } => TransportKind::Stdio,
            Self::Sse { .. } => TransportKind::Sse,
            Self::StreamableHttp { .. } => TransportKind::StreamableHttp,
        }
    }

    /// Construct the transport. The child process is not spawned and no
    /// connection is opened until [`Transport::start`].
    pub fn build(self) -> Arc<dyn Transport> {
        match self {
            Self::Stdio { command, args, env } => {
                Arc::new(StdioTransport::new(command, args, merged_env(&env)))
            }
            Self::Sse { url, headers } => Arc::new(SseTransport::new(url, headers)),
            Self::StreamableHttp { url, headers } => {
                Arc::new(StreamableHttpTransport::new(url, headers))
            }
        }
    }
}

impl TryFrom<&ServerConfig> for TransportSpec {
    type Error = McpError;

    fn try_from(config: &ServerConfig) -> Result<Self, Self::Error> {
        let kind = config
            .transport_kind()
            .map_err(McpError::configuration)?;

        if config.oauth_client_id.is_some() || config.oauth_scope.is_some() {
            warn!(
                server = config.label(),
                "OAuth settings are not supported; connecting without authentication"
            );
        }

        match kind {
            TransportKind::Stdio => {
                let command = config
                    .command
                    .as_deref()
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .ok_or_else(|| McpError::configuration("stdio transport requires a command"))?;
                Ok(Self::Stdio {
                    command: command.to_string(),
                    args: config.args.clone(),
                    env: config.env.clone(),
                })
            }
            TransportKind::Sse => Ok(Self::Sse {
                url: parse_url(config, kind)?,
                headers: header_map(&config.headers)?,
            }),
            TransportKind::StreamableHttp => Ok(Self::StreamableHttp {
                url: parse_url(config, kind)?,
                headers: header_map(&config.headers)?,
            }),
        }
    }
}

fn parse_url(config: &ServerConfig, kind: TransportKind) -> Result<Url, McpError> {
    let raw = config
        .url
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| McpError::configuration(format!("{} transport requires a url", kind)))?;

    let url = Url::parse(raw)
        .map_err(|e| McpError::configuration(format!("invalid url '{}': {}", raw, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(McpError::configuration(format!(
            "invalid url '{}': unsupported scheme '{}'",
            raw, scheme
        ))),
    }
}

fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap, McpError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| McpError::configuration(format!("invalid header name '{}'", name)))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|_| McpError::configuration(format!("invalid value for header '{}'", name)))?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}

/// The environment for a stdio child: this process's environment overlaid
/// with `overlay`. Variables that are not valid UTF-8 are dropped.
pub fn merged_env(overlay: &BTreeMap<String, String>) -> HashMap<String, String> {
    let mut env: HashMap<String, String> = std::env::vars_os()
        .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
        .collect();
    env.extend(overlay.iter().map(|(k, v)| (k.clone(), v.clone())));
    env
}

/// Builds transports for the session. Tests substitute in-memory transports.
pub trait TransportFactory: Send + Sync {
    fn create(&self, config: &ServerConfig) -> Result<Arc<dyn Transport>, McpError>;
}

/// Factory for the three real transports.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTransportFactory;

impl TransportFactory for DefaultTransportFactory {
    fn create(&self, config: &ServerConfig) -> Result<Arc<dyn Transport>, McpError> {
        create_transport(config)
    }
}

/// Validate `config` and construct the matching transport.
pub fn create_transport(config: &ServerConfig) -> Result<Arc<dyn Transport>, McpError> {
    let spec = TransportSpec::try_from(config)?;
    debug!(server = config.label(), kind = %spec.kind(), "Creating transport");
    Ok(spec.build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn config_error(config: &ServerConfig) -> String {
        match TransportSpec::try_from(config) {
            Err(e) => {
                assert_eq!(e.kind(), ErrorKind::Configuration);
                e.to_string()
            }
            Ok(spec) => panic!("expected configuration error, got {:?}", spec),
        }
    }

    #[test]
    fn test_stdio_spec() {
        let config = ServerConfig::stdio("node")
            .with_args(vec!["server.js".to_string()])
            .with_env("DEBUG", "1");
        let spec = TransportSpec::try_from(&config).unwrap();
        assert_eq!(spec.kind(), TransportKind::Stdio);
        match spec {
            TransportSpec::Stdio { command, args, env } => {
                assert_eq!(command, "node");
                assert_eq!(args, vec!["server.js"]);
                assert_eq!(env.get("DEBUG").map(String::as_str), Some("1"));
            }
            other => panic!("unexpected spec: {:?}", other),
        }
    }

    #[test]
    fn test_stdio_requires_command() {
        let mut config = ServerConfig::stdio("   ");
        assert_eq!(
            config_error(&config),
            "configuration error: stdio transport requires a command"
        );

        config.command = None;
        assert!(config_error(&config).contains("requires a command"));
    }

    #[test]
    fn test_http_requires_valid_url() {
        let mut config = ServerConfig::sse("http://localhost:3001/sse");
        config.url = None;
        assert!(config_error(&config).contains("sse transport requires a url"));

        let config = ServerConfig::streamable_http("not a url");
        assert!(config_error(&config).contains("invalid url"));

        let config = ServerConfig::streamable_http("ftp://example.com/mcp");
        assert!(config_error(&config).contains("unsupported scheme 'ftp'"));
    }

    #[test]
    fn test_unknown_transport_type() {
        let config = ServerConfig {
            transport_type: "websocket".to_string(),
            ..ServerConfig::default()
        };
        assert!(config_error(&config).contains("unknown transport type 'websocket'"));
    }

    #[test]
    fn test_headers_are_validated_and_kept() {
        let config = ServerConfig::streamable_http("https://example.com/mcp")
            .with_header("Authorization", "Bearer token");
        match TransportSpec::try_from(&config).unwrap() {
            TransportSpec::StreamableHttp { url, headers } => {
                assert_eq!(url.as_str(), "https://example.com/mcp");
                assert_eq!(headers.get("authorization").unwrap(), "Bearer token");
            }
            other => panic!("unexpected spec: {:?}", other),
        }

        let config = ServerConfig::sse("http://localhost/sse").with_header("Bad Header", "x");
        assert!(config_error(&config).contains("invalid header name 'Bad Header'"));

        let config = ServerConfig::sse("http://localhost/sse").with_header("X-Key", "line\nbreak");
        assert!(config_error(&config).contains("invalid value for header 'X-Key'"));
    }

    #[test]
    fn test_oauth_fields_do_not_block() {
        let mut config = ServerConfig::sse("http://localhost:3001/sse");
        config.oauth_client_id = Some("client".to_string());
        assert!(TransportSpec::try_from(&config).is_ok());
    }

    #[test]
    fn test_merged_env_overlay_wins() {
        std::env::set_var("MCP_TESTER_FACTORY_TEST", "parent");
        let mut overlay = BTreeMap::new();
        overlay.insert("MCP_TESTER_FACTORY_TEST".to_string(), "child".to_string());
        overlay.insert("MCP_TESTER_ONLY_CHILD".to_string(), "yes".to_string());

        let env = merged_env(&overlay);
        assert_eq!(env.get("MCP_TESTER_FACTORY_TEST").map(String::as_str), Some("child"));
        assert_eq!(env.get("MCP_TESTER_ONLY_CHILD").map(String::as_str), Some("yes"));
    }

    #[test]
    fn test_create_transport_does_no_io() {
        let transport = create_transport(&ServerConfig::stdio("/nonexistent/binary")).unwrap();
        assert_eq!(transport.kind(), TransportKind::Stdio);
        assert!(!transport.is_connected());

        let transport = DefaultTransportFactory
            .create(&ServerConfig::sse("http://127.0.0.1:9/sse"))
            .unwrap();
        assert_eq!(transport.kind(), TransportKind::Sse);
    }
}
