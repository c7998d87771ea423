//! Connection manager and protocol facade.
//!
//! A [`Session`] holds at most one live connection. It builds the transport
//! for a [`ServerConfig`], runs the handshake under a timeout, routes every
//! request through [`Session::request`] so it lands in the history, and
//! publishes each state change on its [`EventBus`].
//!
//! `connect` calls may overlap. The most recent `connect` or `disconnect`
//! wins: an older attempt that finishes later closes its own client and
//! transport and returns [`McpError::Superseded`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mcptester_core::config::{Config, DEFAULT_MAX_HISTORY, DEFAULT_TIMEOUT_MS};
use mcptester_core::ServerConfig;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::McpClient;
use crate::error::{duration_millis, McpError};
use crate::events::{ConnectionStatus, EventBus, SessionEvent};
use crate::factory::{DefaultTransportFactory, TransportFactory};
use crate::history::{HistoryItem, RequestHistory};
use crate::protocol::{
    self, CallToolResult, CompleteResult, CompletionArgument, CompletionReference,
    GetPromptResult, Implementation, LoggingLevel, Notification, Page, ProgressToken, Prompt,
    ReadResourceResult, Resource, ResourceTemplate, ServerCapabilities, Tool,
};
use crate::transport::Transport;

/// Session settings.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Applies to the handshake and to every request
    pub timeout: Duration,
    /// History entries kept
    pub max_history: usize,
    /// Identity sent in `initialize`
    pub client_info: Implementation,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            max_history: DEFAULT_MAX_HISTORY,
            client_info: protocol::client_info(),
        }
    }
}

impl From<&Config> for SessionOptions {
    fn from(config: &Config) -> Self {
        Self {
            timeout: Duration::from_millis(config.timeout),
            max_history: config.max_history,
            ..Self::default()
        }
    }
}

#[derive(Default)]
struct SessionState {
    status: ConnectionStatus,
    connected: bool,
    client: Option<Arc<McpClient>>,
    transport: Option<Arc<dyn Transport>>,
    notifications: Option<JoinHandle<()>>,
    config: Option<ServerConfig>,
    capabilities: Option<ServerCapabilities>,
    server_info: Option<Implementation>,
}

struct Handles {
    client: Option<Arc<McpClient>>,
    transport: Option<Arc<dyn Transport>>,
    notifications: Option<JoinHandle<()>>,
}

impl SessionState {
    fn take_handles(&mut self) -> Handles {
        Handles {
            client: self.client.take(),
            transport: self.transport.take(),
            notifications: self.notifications.take(),
        }
    }
}

/// Close a client and its transport independently. Returns the messages of
/// the failures.
async fn close_handles(handles: Handles) -> Vec<String> {
    let mut failures = Vec::new();
    if let Some(client) = handles.client {
        client.close();
    }
    if let Some(task) = handles.notifications {
        task.abort();
    }
    if let Some(transport) = handles.transport {
        if let Err(e) = transport.close().await {
            warn!(error = %e, "Failed to close transport");
            failures.push(format!("failed to close transport: {}", e));
        }
    }
    failures
}

/// An MCP client session.
pub struct Session {
    options: SessionOptions,
    factory: Arc<dyn TransportFactory>,
    state: Mutex<SessionState>,
    history: RequestHistory,
    events: EventBus,
    generation: AtomicU64,
    request_ids: AtomicU64,
}

impl Session {
    /// Create a session using the real transports.
    pub fn new(options: SessionOptions) -> Self {
        Self::with_factory(options, Arc::new(DefaultTransportFactory))
    }

    /// Create a session that builds transports with `factory`.
    pub fn with_factory(options: SessionOptions, factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            history: RequestHistory::new(options.max_history),
            options,
            factory,
            state: Mutex::new(SessionState::default()),
            events: EventBus::new(),
            generation: AtomicU64::new(0),
            request_ids: AtomicU64::new(0),
        }
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Connect to the server described by `config`, replacing any current
    /// connection.
    pub async fn connect(&self, config: ServerConfig) -> Result<(), McpError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let previous = self.state.lock().take_handles();
        for failure in close_handles(previous).await {
            debug!(error = %failure, "Ignoring failure while replacing connection");
        }

        info!(server = config.label(), kind = %config.transport_type, "Connecting to MCP server");
        // A disconnect may have run while the previous handles were closing;
        // its status must not be overwritten.
        let applied = {
            let mut state = self.state.lock();
            if self.is_current(generation) {
                state.status = ConnectionStatus::Connecting;
                state.connected = false;
                state.capabilities = None;
                state.server_info = None;
                state.config = Some(config.clone());
                true
            } else {
                false
            }
        };
        if !applied {
            return Err(McpError::Superseded);
        }
        self.events.emit(SessionEvent::ConnectionStatusChanged {
            status: ConnectionStatus::Connecting,
        });

        let transport = match self.factory.create(&config) {
            Ok(transport) => transport,
            Err(e) => return self.connect_failed(generation, e),
        };

        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let client = Arc::new(McpClient::new(
            Arc::clone(&transport),
            self.options.client_info.clone(),
            notify_tx,
        ));
        let forwarder = tokio::spawn(forward_notifications(notify_rx, self.events.clone()));

        let handles = Handles {
            client: Some(Arc::clone(&client)),
            transport: Some(Arc::clone(&transport)),
            notifications: Some(forwarder),
        };
        let stale = {
            let mut state = self.state.lock();
            if self.is_current(generation) {
                state.client = handles.client;
                state.transport = handles.transport;
                state.notifications = handles.notifications;
                None
            } else {
                Some(handles)
            }
        };
        if let Some(stale) = stale {
            close_handles(stale).await;
            return Err(McpError::Superseded);
        }

        let timeout = self.options.timeout;
        let outcome = match tokio::time::timeout(timeout, client.connect(timeout)).await {
            Ok(Err(McpError::Timeout { .. })) | Err(_) => {
                Err(McpError::timeout("connect", duration_millis(timeout)))
            }
            Ok(outcome) => outcome,
        };

        match outcome {
            Ok(init) => {
                let applied = {
                    let mut state = self.state.lock();
                    if self.is_current(generation) {
                        state.connected = true;
                        state.status = ConnectionStatus::Connected;
                        state.capabilities = Some(init.capabilities);
                        state.server_info = Some(init.server_info);
                        true
                    } else {
                        false
                    }
                };
                if !applied {
                    return self.abandon(client, transport).await;
                }
                info!(server = config.label(), "Connected to MCP server");
                self.events.emit(SessionEvent::Connected);
                self.events.emit(SessionEvent::ConnectionStatusChanged {
                    status: ConnectionStatus::Connected,
                });
                Ok(())
            }
            Err(McpError::Superseded) => self.abandon(client, transport).await,
            Err(e) if !self.is_current(generation) => {
                debug!(error = %e, "Superseded connect attempt failed");
                self.abandon(client, transport).await
            }
            Err(e) => self.connect_failed(generation, e),
        }
    }

    /// Tear down the current connection. Safe to call in any state.
    pub async fn disconnect(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);

        let handles = self.state.lock().take_handles();
        for failure in close_handles(handles).await {
            self.events.emit(SessionEvent::Error { message: failure });
        }

        {
            let mut state = self.state.lock();
            state.connected = false;
            state.status = ConnectionStatus::Disconnected;
            state.config = None;
            state.capabilities = None;
            state.server_info = None;
        }

        debug!("Disconnected from MCP server");
        self.events.emit(SessionEvent::Disconnected);
        self.events.emit(SessionEvent::ConnectionStatusChanged {
            status: ConnectionStatus::Disconnected,
        });
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn connect_failed(&self, generation: u64, error: McpError) -> Result<(), McpError> {
        {
            let mut state = self.state.lock();
            if !self.is_current(generation) {
                return Err(McpError::Superseded);
            }
            state.connected = false;
            state.status = ConnectionStatus::Error;
        }

        warn!(error = %error, "Failed to connect to MCP server");
        self.events.emit(SessionEvent::ConnectionStatusChanged {
            status: ConnectionStatus::Error,
        });
        self.events.emit(SessionEvent::Error {
            message: error.to_string(),
        });
        Err(error)
    }

    async fn abandon(
        &self,
        client: Arc<McpClient>,
        transport: Arc<dyn Transport>,
    ) -> Result<(), McpError> {
        debug!("Connect attempt superseded; closing its connection");
        client.close();
        if let Err(e) = transport.close().await {
            debug!(error = %e, "Failed to close superseded transport");
        }
        Err(McpError::Superseded)
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Send a request over the current connection and record it in the
    /// history.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let client = {
            let state = self.state.lock();
            match (&state.client, state.connected) {
                (Some(client), true) => Arc::clone(client),
                _ => return Err(McpError::NotConnected),
            }
        };

        let id = self.request_ids.fetch_add(1, Ordering::SeqCst);
        let mut item = HistoryItem::new(id, method, params.clone());

        let result = client.request(method, params, self.options.timeout).await;
        match &result {
            Ok(response) => item.response = Some(response.clone()),
            Err(e) => item.error = Some(e.to_string()),
        }

        self.history.add(item);
        self.events.emit(SessionEvent::HistoryUpdated {
            history: self.history.snapshot(),
        });

        if let Err(e) = &result {
            debug!(id, method, error = %e, "Request failed");
            self.events.emit(SessionEvent::Error {
                message: e.to_string(),
            });
        }

        result
    }

    async fn request_typed<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, McpError> {
        let result = self.request(method, Some(params)).await?;
        protocol::decode(result, method).map_err(|e| {
            self.events.emit(SessionEvent::Error {
                message: e.to_string(),
            });
            e
        })
    }

    async fn list<T: DeserializeOwned>(
        &self,
        method: &str,
        field: &str,
        cursor: Option<&str>,
    ) -> Result<Page<T>, McpError> {
        if !self.is_connected() {
            return Err(McpError::NotConnected);
        }
        let result = self.request(method, Some(cursor_params(cursor))).await?;
        Ok(Page::from_result(&result, field))
    }

    // ========================================================================
    // Facade
    // ========================================================================

    pub async fn list_tools(&self, cursor: Option<&str>) -> Result<Page<Tool>, McpError> {
        self.list("tools/list", "tools", cursor).await
    }

    /// Invoke a tool. `arguments` should be a JSON object.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        progress_token: Option<ProgressToken>,
    ) -> Result<CallToolResult, McpError> {
        let mut params = json!({"name": name, "arguments": arguments});
        if let Some(token) = progress_token {
            params["_meta"] = json!({"progressToken": token});
        }
        self.request_typed("tools/call", params).await
    }

    pub async fn list_resources(&self, cursor: Option<&str>) -> Result<Page<Resource>, McpError> {
        self.list("resources/list", "resources", cursor).await
    }

    pub async fn list_resource_templates(
        &self,
        cursor: Option<&str>,
    ) -> Result<Page<ResourceTemplate>, McpError> {
        self.list("resources/templates/list", "resourceTemplates", cursor)
            .await
    }

    pub async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult, McpError> {
        self.request_typed("resources/read", json!({"uri": uri}))
            .await
    }

    pub async fn subscribe_to_resource(&self, uri: &str) -> Result<(), McpError> {
        self.request("resources/subscribe", Some(json!({"uri": uri})))
            .await
            .map(drop)
    }

    pub async fn unsubscribe_from_resource(&self, uri: &str) -> Result<(), McpError> {
        self.request("resources/unsubscribe", Some(json!({"uri": uri})))
            .await
            .map(drop)
    }

    pub async fn list_prompts(&self, cursor: Option<&str>) -> Result<Page<Prompt>, McpError> {
        self.list("prompts/list", "prompts", cursor).await
    }

    /// Render a prompt. `arguments` is left out of the request when empty.
    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: &BTreeMap<String, String>,
    ) -> Result<GetPromptResult, McpError> {
        let mut params = json!({"name": name});
        if !arguments.is_empty() {
            params["arguments"] = json!(arguments);
        }
        self.request_typed("prompts/get", params).await
    }

    pub async fn set_logging_level(&self, level: LoggingLevel) -> Result<(), McpError> {
        self.request("logging/setLevel", Some(json!({"level": level})))
            .await
            .map(drop)
    }

    pub async fn complete(
        &self,
        reference: CompletionReference,
        argument: CompletionArgument,
    ) -> Result<CompleteResult, McpError> {
        self.request_typed(
            "completion/complete",
            json!({"ref": reference, "argument": argument}),
        )
        .await
    }

    pub async fn ping(&self) -> Result<(), McpError> {
        self.request("ping", Some(Value::Object(Map::new())))
            .await
            .map(drop)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.state.lock().status
    }

    pub fn server_capabilities(&self) -> Option<ServerCapabilities> {
        self.state.lock().capabilities.clone()
    }

    pub fn server_info(&self) -> Option<Implementation> {
        self.state.lock().server_info.clone()
    }

    /// The config of the current or last attempted connection.
    pub fn current_config(&self) -> Option<ServerConfig> {
        self.state.lock().config.clone()
    }

    /// History snapshot, newest first.
    pub fn request_history(&self) -> Vec<HistoryItem> {
        self.history.snapshot()
    }

    pub fn clear_request_history(&self) {
        self.history.clear();
        self.events.emit(SessionEvent::HistoryUpdated {
            history: Vec::new(),
        });
    }

    /// The history as pretty-printed JSON.
    pub fn export_history(&self) -> Result<String, McpError> {
        Ok(self.history.to_json()?)
    }

    /// Receive every event emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(SessionOptions::default())
    }
}

fn cursor_params(cursor: Option<&str>) -> Value {
    match cursor {
        Some(cursor) => json!({"cursor": cursor}),
        None => Value::Object(Map::new()),
    }
}

async fn forward_notifications(mut rx: mpsc::UnboundedReceiver<Notification>, events: EventBus) {
    while let Some(notification) = rx.recv().await {
        events.emit(SessionEvent::Notification {
            method: notification.method,
            params: notification.params,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_options_from_config() {
        let config = Config {
            timeout: 1500,
            max_history: 5,
            ..Config::default()
        };
        let options = SessionOptions::from(&config);
        assert_eq!(options.timeout, Duration::from_millis(1500));
        assert_eq!(options.max_history, 5);
        assert_eq!(options.client_info.name, "mcp-tester");
    }

    #[test]
    fn test_cursor_params() {
        assert_eq!(cursor_params(None), json!({}));
        assert_eq!(cursor_params(Some("next")), json!({"cursor": "next"}));
    }

    #[tokio::test]
    async fn test_initial_state() {
        let session = Session::default();
        assert!(!session.is_connected());
        assert_eq!(session.connection_status(), ConnectionStatus::Disconnected);
        assert!(session.server_capabilities().is_none());
        assert!(session.current_config().is_none());
        assert!(session.request_history().is_empty());
    }

    #[tokio::test]
    async fn test_requests_need_connection() {
        let session = Session::default();
        assert!(matches!(
            session.list_tools(None).await,
            Err(McpError::NotConnected)
        ));
        assert!(matches!(
            session.request("ping", None).await,
            Err(McpError::NotConnected)
        ));
        assert!(session.request_history().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_config_sets_error_status() {
        let session = Session::default();
        let mut events = session.subscribe();

        let err = session
            .connect(ServerConfig::stdio(""))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(session.connection_status(), ConnectionStatus::Error);

        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::ConnectionStatusChanged {
                status: ConnectionStatus::Connecting
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::ConnectionStatusChanged {
                status: ConnectionStatus::Error
            }
        );
        assert!(matches!(
            events.recv().await.unwrap(),
            SessionEvent::Error { message } if message.contains("requires a command")
        ));
    }

    #[tokio::test]
    async fn test_clear_history_emits_empty_snapshot() {
        let session = Session::default();
        let mut events = session.subscribe();
        session.clear_request_history();
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::HistoryUpdated {
                history: Vec::new()
            }
        );
        assert_eq!(session.export_history().unwrap(), "[]");
    }
}
