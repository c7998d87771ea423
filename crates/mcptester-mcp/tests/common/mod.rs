//! In-memory MCP server used by the session tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mcptester_core::config::TransportKind;
use mcptester_core::ServerConfig;
use mcptester_mcp::transport::Inbound;
use mcptester_mcp::{McpError, Transport, TransportError, TransportFactory, TransportSpec};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;

/// How the scripted server answers one request.
pub enum Reply {
    Result(Value),
    Error(i64, &'static str),
    Delayed(Duration, Value),
    Silent,
}

/// Decides the reply from the server name, method and params.
pub type Handler = Arc<dyn Fn(&str, &str, &Value) -> Reply + Send + Sync>;

pub struct ScriptedTransport {
    server: String,
    handler: Handler,
    inbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    sent: Mutex<Vec<Value>>,
    started: AtomicBool,
    connected: AtomicBool,
    closes: AtomicUsize,
    close_delay: Mutex<Option<Duration>>,
    fail_close: AtomicBool,
}

impl ScriptedTransport {
    /// Every message the client sent, in order.
    pub fn sent(&self) -> Vec<Value> {
        self.sent.lock().clone()
    }

    /// Sent requests for `method`.
    pub fn sent_requests(&self, method: &str) -> Vec<Value> {
        self.sent()
            .into_iter()
            .filter(|m| m["method"] == method)
            .collect()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Make every later `close` sleep for `delay` first.
    pub fn set_close_delay(&self, delay: Duration) {
        *self.close_delay.lock() = Some(delay);
    }

    /// Make every later `close` report a termination failure.
    pub fn fail_close(&self) {
        self.fail_close.store(true, Ordering::SeqCst);
    }

    /// Push a server-originated message to the client.
    pub fn push(&self, message: Value) {
        if let Some(tx) = self.inbound.lock().as_ref() {
            let _ = tx.send(message.to_string());
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn start(&self) -> Result<Inbound, TransportError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(TransportError::AlreadyStarted);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inbound.lock() = Some(tx);
        self.connected.store(true, Ordering::SeqCst);
        Ok(rx)
    }

    async fn send(&self, message: &str) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let message: Value = serde_json::from_str(message)
            .map_err(|e| TransportError::Stream(e.to_string()))?;
        self.sent.lock().push(message.clone());

        let (Some(id), Some(method)) = (message.get("id"), message["method"].as_str()) else {
            return Ok(());
        };
        let Some(tx) = self.inbound.lock().clone() else {
            return Err(TransportError::ConnectionClosed);
        };

        let params = message.get("params").cloned().unwrap_or(Value::Null);
        match (self.handler)(&self.server, method, &params) {
            Reply::Result(result) => {
                let _ = tx.send(json!({"jsonrpc": "2.0", "id": id, "result": result}).to_string());
            }
            Reply::Error(code, text) => {
                let _ = tx.send(
                    json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": text}})
                        .to_string(),
                );
            }
            Reply::Delayed(delay, result) => {
                let reply = json!({"jsonrpc": "2.0", "id": id, "result": result}).to_string();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(reply);
                });
            }
            Reply::Silent => {}
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        let delay = *self.close_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        self.inbound.lock().take();
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(TransportError::Terminate(std::io::Error::new(
                std::io::ErrorKind::Other,
                "process ignored SIGTERM",
            )));
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }
}

/// Factory handing out scripted transports. Config validation still runs.
pub struct ScriptedFactory {
    handler: Handler,
    created: Mutex<Vec<Arc<ScriptedTransport>>>,
}

impl ScriptedFactory {
    pub fn new(handler: Handler) -> Arc<Self> {
        Arc::new(Self {
            handler,
            created: Mutex::new(Vec::new()),
        })
    }

    /// Factory whose server answers with [`default_reply`].
    pub fn standard() -> Arc<Self> {
        Self::new(Arc::new(|_, method, params| default_reply(method, params)))
    }

    pub fn created(&self) -> Vec<Arc<ScriptedTransport>> {
        self.created.lock().clone()
    }

    pub fn last(&self) -> Arc<ScriptedTransport> {
        self.created
            .lock()
            .last()
            .cloned()
            .expect("no transport created")
    }
}

impl TransportFactory for ScriptedFactory {
    fn create(&self, config: &ServerConfig) -> Result<Arc<dyn Transport>, McpError> {
        TransportSpec::try_from(config)?;
        let transport = Arc::new(ScriptedTransport {
            server: config.label().to_string(),
            handler: Arc::clone(&self.handler),
            inbound: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            closes: AtomicUsize::new(0),
            close_delay: Mutex::new(None),
            fail_close: AtomicBool::new(false),
        });
        self.created.lock().push(Arc::clone(&transport));
        Ok(transport)
    }
}

/// A well-behaved server with two tools, one prompt and one resource.
pub fn default_reply(method: &str, params: &Value) -> Reply {
    match method {
        "initialize" => Reply::Result(json!({
            "protocolVersion": "2025-03-26",
            "capabilities": {
                "tools": {"listChanged": true},
                "prompts": {},
                "resources": {"subscribe": true},
                "logging": {}
            },
            "serverInfo": {"name": "scripted", "version": "1.0.0"}
        })),
        "ping" => Reply::Result(json!({})),
        "tools/list" => Reply::Result(json!({
            "tools": [
                {"name": "echo", "inputSchema": {"type": "object"}},
                {"name": "add", "description": "Add two numbers"}
            ]
        })),
        "tools/call" => Reply::Result(json!({
            "content": [{"type": "text", "text": format!("called {}", params["name"].as_str().unwrap_or(""))}]
        })),
        "resources/list" => Reply::Result(json!({
            "resources": [{"uri": "file:///notes.txt", "name": "notes"}],
            "nextCursor": "page-2"
        })),
        "resources/templates/list" => Reply::Result(json!({})),
        "resources/read" => Reply::Result(json!({
            "contents": [{"uri": params["uri"], "text": "hello"}]
        })),
        "resources/subscribe" | "resources/unsubscribe" | "logging/setLevel" => {
            Reply::Result(json!({}))
        }
        "prompts/list" => Reply::Result(json!({"prompts": [{"name": "greet"}]})),
        "prompts/get" => Reply::Result(json!({
            "messages": [{"role": "user", "content": {"type": "text", "text": "Hi"}}]
        })),
        "completion/complete" => Reply::Result(json!({
            "completion": {"values": ["alpha", "beta"], "hasMore": false}
        })),
        _ => Reply::Error(-32601, "Method not found"),
    }
}

pub fn stdio_config(name: &str) -> ServerConfig {
    ServerConfig::stdio("scripted-server").with_name(name)
}
