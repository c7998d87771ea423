//! Panel message bridge.
//!
//! A panel front end talks to the tester over stdin/stdout, one JSON message
//! per line. Inbound messages drive a [`Session`]; replies and session events
//! are written back as outbound messages. A failed request never stops the
//! bridge.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use mcptester_core::{Config, ServerConfig};
use mcptester_mcp::protocol::{
    CallToolResult, CompleteResult, CompletionArgument, CompletionReference, GetPromptResult,
    LoggingLevel, Page, ProgressToken, Prompt, ReadResourceResult, Resource, ResourceTemplate,
    ServerCapabilities, Tool,
};
use mcptester_mcp::{ConnectionStatus, HistoryItem, McpError, Session, SessionEvent, SessionOptions};

use crate::AppContext;

/// How long buffered session events may take to drain at shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Messages sent by the panel.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum InboundMessage {
    Connect {
        config: ServerConfig,
    },
    Disconnect,
    GetStatus,
    ListTools {
        #[serde(default)]
        cursor: Option<String>,
    },
    CallTool {
        name: String,
        #[serde(default, alias = "parameters")]
        arguments: Value,
        #[serde(default, rename = "progressToken")]
        progress_token: Option<ProgressToken>,
    },
    ListResources {
        #[serde(default)]
        cursor: Option<String>,
    },
    ListResourceTemplates {
        #[serde(default)]
        cursor: Option<String>,
    },
    ReadResource {
        uri: String,
    },
    SubscribeResource {
        uri: String,
    },
    UnsubscribeResource {
        uri: String,
    },
    ListPrompts {
        #[serde(default)]
        cursor: Option<String>,
    },
    GetPrompt {
        name: String,
        #[serde(default)]
        arguments: BTreeMap<String, String>,
    },
    PingServer,
    SetLoggingLevel {
        level: LoggingLevel,
    },
    Complete {
        #[serde(rename = "ref")]
        reference: CompletionReference,
        argument: CompletionArgument,
    },
    ClearHistory,
    ExportHistory,
    ListServers,
    DeleteServer {
        name: String,
    },
    LoadServer {
        name: String,
    },
}

/// Messages sent to the panel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OutboundMessage {
    ConnectionStatus {
        status: ConnectionStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        capabilities: Option<ServerCapabilities>,
        #[serde(rename = "savedServers", skip_serializing_if = "Option::is_none")]
        saved_servers: Option<Vec<ServerConfig>>,
    },
    Connected,
    Disconnected,
    Error {
        error: String,
        timestamp: DateTime<Utc>,
    },
    HistoryUpdated {
        history: Vec<HistoryItem>,
    },
    Notification {
        method: String,
        params: Value,
    },
    ToolsList {
        tools: Vec<Tool>,
        #[serde(rename = "nextCursor", skip_serializing_if = "Option::is_none")]
        next_cursor: Option<String>,
    },
    CallToolResult {
        name: String,
        result: CallToolResult,
    },
    ResourcesList {
        resources: Vec<Resource>,
        #[serde(rename = "nextCursor", skip_serializing_if = "Option::is_none")]
        next_cursor: Option<String>,
    },
    ResourceTemplatesList {
        #[serde(rename = "resourceTemplates")]
        resource_templates: Vec<ResourceTemplate>,
        #[serde(rename = "nextCursor", skip_serializing_if = "Option::is_none")]
        next_cursor: Option<String>,
    },
    ReadResourceResult {
        content: ReadResourceResult,
    },
    SubscribeResult {
        uri: String,
    },
    UnsubscribeResult {
        uri: String,
    },
    PromptsList {
        prompts: Vec<Prompt>,
        #[serde(rename = "nextCursor", skip_serializing_if = "Option::is_none")]
        next_cursor: Option<String>,
    },
    GetPromptResult {
        name: String,
        result: GetPromptResult,
    },
    PingResult {
        success: bool,
    },
    SetLoggingLevelResult {
        level: LoggingLevel,
    },
    CompleteResult {
        result: CompleteResult,
    },
    HistoryExport {
        json: String,
    },
    ServersList {
        servers: Vec<ServerConfig>,
    },
    ServerDeleted {
        name: String,
        removed: bool,
    },
    LoadConfig {
        config: ServerConfig,
    },
}

impl OutboundMessage {
    pub fn error(error: impl Into<String>) -> Self {
        Self::Error {
            error: error.into(),
            timestamp: Utc::now(),
        }
    }
}

impl From<SessionEvent> for OutboundMessage {
    fn from(event: SessionEvent) -> Self {
        match event {
            SessionEvent::ConnectionStatusChanged { status } => Self::ConnectionStatus {
                status,
                capabilities: None,
                saved_servers: None,
            },
            SessionEvent::Connected => Self::Connected,
            SessionEvent::Disconnected => Self::Disconnected,
            SessionEvent::Error { message } => Self::error(message),
            SessionEvent::HistoryUpdated { history } => Self::HistoryUpdated { history },
            SessionEvent::Notification { method, params } => Self::Notification { method, params },
        }
    }
}

/// Turns panel messages into session calls and replies.
pub struct PanelBridge {
    session: Arc<Session>,
    config: Config,
    config_path: PathBuf,
}

impl PanelBridge {
    pub fn new(session: Arc<Session>, config: Config, config_path: PathBuf) -> Self {
        Self {
            session,
            config,
            config_path,
        }
    }

    /// Handle one inbound message, returning the direct replies.
    ///
    /// Session events (status changes, history, most errors) are not part
    /// of the reply; they reach the panel through the event bus.
    pub async fn handle(&mut self, message: InboundMessage) -> Vec<OutboundMessage> {
        let session = Arc::clone(&self.session);
        let outcome = match message {
            InboundMessage::Connect { config } => return self.connect(config).await,
            InboundMessage::Disconnect => {
                session.disconnect().await;
                return vec![self.status()];
            }
            InboundMessage::GetStatus => return vec![self.status()],
            InboundMessage::ListTools { cursor } => {
                session
                    .list_tools(cursor.as_deref())
                    .await
                    .map(|Page { items, next_cursor }| OutboundMessage::ToolsList {
                        tools: items,
                        next_cursor,
                    })
            }
            InboundMessage::CallTool {
                name,
                arguments,
                progress_token,
            } => {
                let arguments = match arguments {
                    Value::Null => Value::Object(Map::new()),
                    other => other,
                };
                session
                    .call_tool(&name, arguments, progress_token)
                    .await
                    .map(|result| OutboundMessage::CallToolResult { name, result })
            }
            InboundMessage::ListResources { cursor } => session
                .list_resources(cursor.as_deref())
                .await
                .map(|Page { items, next_cursor }| OutboundMessage::ResourcesList {
                    resources: items,
                    next_cursor,
                }),
            InboundMessage::ListResourceTemplates { cursor } => session
                .list_resource_templates(cursor.as_deref())
                .await
                .map(|Page { items, next_cursor }| OutboundMessage::ResourceTemplatesList {
                    resource_templates: items,
                    next_cursor,
                }),
            InboundMessage::ReadResource { uri } => session
                .read_resource(&uri)
                .await
                .map(|content| OutboundMessage::ReadResourceResult { content }),
            InboundMessage::SubscribeResource { uri } => session
                .subscribe_to_resource(&uri)
                .await
                .map(|()| OutboundMessage::SubscribeResult { uri }),
            InboundMessage::UnsubscribeResource { uri } => session
                .unsubscribe_from_resource(&uri)
                .await
                .map(|()| OutboundMessage::UnsubscribeResult { uri }),
            InboundMessage::ListPrompts { cursor } => session
                .list_prompts(cursor.as_deref())
                .await
                .map(|Page { items, next_cursor }| OutboundMessage::PromptsList {
                    prompts: items,
                    next_cursor,
                }),
            InboundMessage::GetPrompt { name, arguments } => session
                .get_prompt(&name, &arguments)
                .await
                .map(|result| OutboundMessage::GetPromptResult { name, result }),
            InboundMessage::PingServer => session
                .ping()
                .await
                .map(|()| OutboundMessage::PingResult { success: true }),
            InboundMessage::SetLoggingLevel { level } => session
                .set_logging_level(level)
                .await
                .map(|()| OutboundMessage::SetLoggingLevelResult { level }),
            InboundMessage::Complete {
                reference,
                argument,
            } => session
                .complete(reference, argument)
                .await
                .map(|result| OutboundMessage::CompleteResult { result }),
            InboundMessage::ClearHistory => {
                session.clear_request_history();
                return Vec::new();
            }
            InboundMessage::ExportHistory => {
                return match session.export_history() {
                    Ok(json) => vec![OutboundMessage::HistoryExport { json }],
                    Err(e) => vec![OutboundMessage::error(e.to_string())],
                };
            }
            InboundMessage::ListServers => return vec![self.servers_list()],
            InboundMessage::DeleteServer { name } => {
                let removed = self.config.remove_server(&name);
                if removed {
                    self.save();
                }
                return vec![
                    OutboundMessage::ServerDeleted { name, removed },
                    self.servers_list(),
                ];
            }
            InboundMessage::LoadServer { name } => {
                return match self.config.get_server(&name) {
                    Some(config) => vec![OutboundMessage::LoadConfig {
                        config: config.clone(),
                    }],
                    None => vec![OutboundMessage::error(format!("Server not found: {}", name))],
                };
            }
        };

        match outcome {
            Ok(reply) => vec![reply],
            Err(e) => Self::failure(e),
        }
    }

    async fn connect(&mut self, mut config: ServerConfig) -> Vec<OutboundMessage> {
        let name = self.config.add_server(config.clone());
        config.name = Some(name);
        self.save();

        let mut replies = match self.session.connect(config).await {
            Ok(()) => Vec::new(),
            Err(e) => Self::failure(e),
        };
        replies.push(self.status());
        replies
    }

    /// Replies for a failed session call.
    ///
    /// The session publishes its own failures on the event bus; only the
    /// ones it rejects up front need a direct reply.
    fn failure(error: McpError) -> Vec<OutboundMessage> {
        match error {
            McpError::NotConnected => vec![OutboundMessage::error(error.to_string())],
            McpError::Superseded => {
                debug!("Connect superseded by a newer request");
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn status(&self) -> OutboundMessage {
        OutboundMessage::ConnectionStatus {
            status: self.session.connection_status(),
            capabilities: self.session.server_capabilities(),
            saved_servers: Some(self.config.servers.clone()),
        }
    }

    fn servers_list(&self) -> OutboundMessage {
        OutboundMessage::ServersList {
            servers: self.config.servers.clone(),
        }
    }

    fn save(&self) {
        if let Err(e) = self.config.save_to(&self.config_path) {
            warn!(path = %self.config_path.display(), error = %e, "Failed to save servers");
        }
    }
}

/// Run the bridge until stdin closes.
pub async fn run(ctx: AppContext) -> anyhow::Result<()> {
    let session = Arc::new(Session::new(SessionOptions::from(&ctx.config)));
    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundMessage>();

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(message) = rx.recv().await {
            let mut line = match serde_json::to_string(&message) {
                Ok(line) => line,
                Err(e) => {
                    warn!(error = %e, "Failed to encode panel message");
                    continue;
                }
            };
            line.push('\n');
            if stdout.write_all(line.as_bytes()).await.is_err() || stdout.flush().await.is_err() {
                break;
            }
        }
    });

    let mut events = session.subscribe();
    let event_tx = tx.clone();
    let forwarder = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if event_tx.send(event.into()).is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Panel fell behind session events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut bridge = PanelBridge::new(Arc::clone(&session), ctx.config, ctx.config_path);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let replies = match serde_json::from_str::<InboundMessage>(line) {
            Ok(message) => bridge.handle(message).await,
            Err(e) => vec![OutboundMessage::error(format!("invalid message: {}", e))],
        };
        for reply in replies {
            if tx.send(reply).is_err() {
                break;
            }
        }
    }

    debug!("Panel input closed, shutting down");
    session.disconnect().await;
    drop(bridge);
    drop(session);
    if tokio::time::timeout(DRAIN_TIMEOUT, forwarder).await.is_err() {
        debug!("Event forwarder did not drain in time");
    }
    drop(tx);
    writer.await?;
    Ok(())
}
