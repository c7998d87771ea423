//! JSON-RPC client bound to one transport.
//!
//! [`McpClient`] owns the request side of a connection: wire ids, the table
//! of requests awaiting a response, and the dispatch task that routes every
//! inbound message. Requests may be in flight concurrently; responses are
//! matched by id regardless of arrival order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{duration_millis, McpError, TransportError};
use crate::protocol::{
    Implementation, IncomingMessage, InitializeParams, InitializeResult, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse, Notification, RequestId, METHOD_NOT_FOUND,
};
use crate::transport::{Inbound, Transport};

type Outcome = Result<Value, McpError>;
type PendingRequests = Arc<Mutex<HashMap<u64, oneshot::Sender<Outcome>>>>;

/// Protocol client for a single MCP server connection.
pub struct McpClient {
    transport: Arc<dyn Transport>,
    client_info: Implementation,
    notifications: mpsc::UnboundedSender<Notification>,
    pending: PendingRequests,
    next_id: AtomicU64,
    dispatch: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl McpClient {
    /// Create a client. Server notifications are delivered to `notifications`.
    pub fn new(
        transport: Arc<dyn Transport>,
        client_info: Implementation,
        notifications: mpsc::UnboundedSender<Notification>,
    ) -> Self {
        Self {
            transport,
            client_info,
            notifications,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            dispatch: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Start the transport and run the initialize handshake.
    pub async fn connect(&self, timeout: Duration) -> Result<InitializeResult, McpError> {
        let inbound = self.transport.start().await?;
        let task = tokio::spawn(dispatch(
            inbound,
            Arc::clone(&self.transport),
            Arc::clone(&self.pending),
            self.notifications.clone(),
        ));
        *self.dispatch.lock() = Some(task);

        let params = serde_json::to_value(InitializeParams::new(self.client_info.clone()))?;
        let result = self.request("initialize", Some(params), timeout).await?;
        let init = InitializeResult::from_value(&result);

        self.notify("notifications/initialized", None).await?;

        info!(
            server = %init.server_info.name,
            version = %init.server_info.version,
            protocol = %init.protocol_version,
            capabilities = ?init.capabilities.names(),
            "MCP server initialized"
        );

        Ok(init)
    }

    /// Send a request and wait up to `timeout` for its result.
    ///
    /// A result that is a JSON object is returned as-is; a missing or `null`
    /// result becomes `{}`.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, McpError> {
        if self.is_closed() {
            return Err(McpError::NotConnected);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        let _guard = PendingRequestGuard {
            pending: Arc::clone(&self.pending),
            id,
        };

        let message = serde_json::to_string(&JsonRpcRequest::new(id, method, params.as_ref()))?;
        debug!(id, method, "Sending request");
        self.transport.send(&message).await?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => normalize_result(method, outcome?),
            Ok(Err(_)) => Err(TransportError::ConnectionClosed.into()),
            Err(_) => {
                let millis = duration_millis(timeout);
                warn!(id, method, millis, "Request timed out");
                self.cancel(id, &format!("timed out after {}ms", millis))
                    .await;
                Err(McpError::timeout(format!("request '{}'", method), millis))
            }
        }
    }

    /// Send a notification.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let message = serde_json::to_string(&JsonRpcNotification::new(method, params.as_ref()))?;
        debug!(method, "Sending notification");
        self.transport.send(&message).await?;
        Ok(())
    }

    async fn cancel(&self, id: u64, reason: &str) {
        let params = json!({"requestId": id, "reason": reason});
        if let Err(e) = self.notify("notifications/cancelled", Some(params)).await {
            debug!(id, error = %e, "Failed to send cancellation");
        }
    }

    /// Stop dispatching and fail every pending request. Does not close the
    /// transport.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = self.dispatch.lock().take() {
            task.abort();
        }
        drain_pending(&self.pending);
        debug!("MCP client closed");
    }

    /// Whether [`McpClient::close`] was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        if let Some(task) = self.dispatch.get_mut().take() {
            task.abort();
        }
    }
}

/// Removes a pending entry when its request finishes or is dropped.
struct PendingRequestGuard {
    pending: PendingRequests,
    id: u64,
}

impl Drop for PendingRequestGuard {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

fn normalize_result(method: &str, result: Value) -> Result<Value, McpError> {
    match result {
        Value::Object(_) => Ok(result),
        Value::Null => Ok(Value::Object(Map::new())),
        other => Err(McpError::protocol(format!(
            "'{}' returned a non-object result: {}",
            method, other
        ))),
    }
}

fn drain_pending(pending: &PendingRequests) {
    let drained = std::mem::take(&mut *pending.lock());
    for (_id, tx) in drained {
        let _ = tx.send(Err(TransportError::ConnectionClosed.into()));
    }
}

fn wire_id(id: &RequestId) -> Option<u64> {
    match id {
        RequestId::Number(n) => u64::try_from(*n).ok(),
        RequestId::String(s) => s.parse().ok(),
    }
}

async fn dispatch(
    mut inbound: Inbound,
    transport: Arc<dyn Transport>,
    pending: PendingRequests,
    notifications: mpsc::UnboundedSender<Notification>,
) {
    while let Some(raw) = inbound.recv().await {
        let value: Value = match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, line = %raw, "Skipping unparseable message");
                continue;
            }
        };
        let batch = match value {
            Value::Array(messages) => messages,
            single => vec![single],
        };

        for message in batch {
            match IncomingMessage::classify(message) {
                Ok(IncomingMessage::Response { id, outcome }) => {
                    let sender = wire_id(&id).and_then(|id| pending.lock().remove(&id));
                    let Some(sender) = sender else {
                        debug!(id = %id, "Response for unknown or abandoned request");
                        continue;
                    };
                    let outcome = match outcome {
                        Ok(result) => Ok(result.unwrap_or(Value::Null)),
                        Err(error) => Err(McpError::server(error.code, error.message)),
                    };
                    let _ = sender.send(outcome);
                }
                Ok(IncomingMessage::Request { id, method, .. }) => {
                    let response = if method == "ping" {
                        JsonRpcResponse::success(id, Value::Object(Map::new()))
                    } else {
                        debug!(method = %method, "Rejecting server request");
                        JsonRpcResponse::failure(id, METHOD_NOT_FOUND, "Method not found")
                    };
                    match serde_json::to_string(&response) {
                        Ok(message) => {
                            if let Err(e) = transport.send(&message).await {
                                warn!(error = %e, "Failed to answer server request");
                            }
                        }
                        Err(e) => warn!(error = %e, "Failed to encode response"),
                    }
                }
                Ok(IncomingMessage::Notification(notification)) => {
                    debug!(method = %notification.method, "Server notification");
                    let _ = notifications.send(notification);
                }
                Err(e) => warn!(error = %e, "Skipping malformed message"),
            }
        }
    }

    debug!("Inbound stream ended");
    drain_pending(&pending);
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mcptester_core::config::TransportKind;

    /// Transport whose other end is driven by the test.
    struct PipeTransport {
        outbound: mpsc::UnboundedSender<String>,
        inbound: Mutex<Option<Inbound>>,
        connected: AtomicBool,
    }

    #[async_trait]
    impl Transport for PipeTransport {
        async fn start(&self) -> Result<Inbound, TransportError> {
            let inbound = self.inbound.lock().take().ok_or(TransportError::AlreadyStarted)?;
            self.connected.store(true, Ordering::SeqCst);
            Ok(inbound)
        }

        async fn send(&self, message: &str) -> Result<(), TransportError> {
            self.outbound
                .send(message.to_string())
                .map_err(|_| TransportError::ConnectionClosed)
        }

        async fn close(&self) -> Result<(), TransportError> {
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn kind(&self) -> TransportKind {
            TransportKind::Stdio
        }
    }

    struct Harness {
        client: Arc<McpClient>,
        to_client: mpsc::UnboundedSender<String>,
        from_client: mpsc::UnboundedReceiver<String>,
        notifications: mpsc::UnboundedReceiver<Notification>,
    }

    fn harness() -> Harness {
        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();
        let transport = Arc::new(PipeTransport {
            outbound,
            inbound: Mutex::new(Some(inbound)),
            connected: AtomicBool::new(false),
        });
        let (notify_tx, notifications) = mpsc::unbounded_channel();
        let client = Arc::new(McpClient::new(
            transport,
            crate::protocol::client_info(),
            notify_tx,
        ));
        Harness {
            client,
            to_client,
            from_client,
            notifications,
        }
    }

    async fn next_sent(harness: &mut Harness) -> Value {
        let raw = harness.from_client.recv().await.unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    async fn connected_harness() -> Harness {
        let mut harness = harness();
        let client = Arc::clone(&harness.client);
        let connect = tokio::spawn(async move { client.connect(Duration::from_secs(5)).await });

        let init = next_sent(&mut harness).await;
        assert_eq!(init["method"], "initialize");
        assert_eq!(init["params"]["clientInfo"]["name"], "mcp-tester");
        harness
            .to_client
            .send(
                json!({
                    "jsonrpc": "2.0",
                    "id": init["id"],
                    "result": {
                        "protocolVersion": "2025-03-26",
                        "capabilities": {"tools": {}},
                        "serverInfo": {"name": "pipe", "version": "0.0.1"}
                    }
                })
                .to_string(),
            )
            .unwrap();

        let initialized = next_sent(&mut harness).await;
        assert_eq!(initialized["method"], "notifications/initialized");
        assert!(initialized.get("id").is_none());

        let init = connect.await.unwrap().unwrap();
        assert_eq!(init.server_info.name, "pipe");
        assert!(init.capabilities.tools.is_some());
        harness
    }

    #[tokio::test]
    async fn test_out_of_order_responses() {
        let mut harness = connected_harness().await;

        let first = {
            let client = Arc::clone(&harness.client);
            tokio::spawn(async move {
                client
                    .request("tools/list", Some(json!({})), Duration::from_secs(5))
                    .await
            })
        };
        let first_id = next_sent(&mut harness).await["id"].clone();

        let second = {
            let client = Arc::clone(&harness.client);
            tokio::spawn(async move {
                client
                    .request("prompts/list", Some(json!({})), Duration::from_secs(5))
                    .await
            })
        };
        let second_id = next_sent(&mut harness).await["id"].clone();

        for (id, tag) in [(second_id, "second"), (first_id, "first")] {
            harness
                .to_client
                .send(json!({"jsonrpc": "2.0", "id": id, "result": {"tag": tag}}).to_string())
                .unwrap();
        }

        assert_eq!(first.await.unwrap().unwrap()["tag"], "first");
        assert_eq!(second.await.unwrap().unwrap()["tag"], "second");
        assert_eq!(harness.client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_timeout_sends_cancellation() {
        let mut harness = connected_harness().await;

        let err = harness
            .client
            .request("tools/call", Some(json!({"name": "slow"})), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Timeout { millis: 50, .. }));
        assert_eq!(err.to_string(), "request 'tools/call' timed out after 50ms");
        assert_eq!(harness.client.pending_count(), 0);

        let request = next_sent(&mut harness).await;
        let cancel = next_sent(&mut harness).await;
        assert_eq!(cancel["method"], "notifications/cancelled");
        assert_eq!(cancel["params"]["requestId"], request["id"]);
    }

    #[tokio::test]
    async fn test_error_and_non_object_results() {
        let mut harness = connected_harness().await;

        let client = Arc::clone(&harness.client);
        let call = tokio::spawn(async move {
            client
                .request("nope", None, Duration::from_secs(5))
                .await
        });
        let id = next_sent(&mut harness).await["id"].clone();
        harness
            .to_client
            .send(
                json!({"jsonrpc": "2.0", "id": id, "error": {"code": -32601, "message": "Method not found"}})
                    .to_string(),
            )
            .unwrap();
        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, McpError::Server { code: -32601, .. }));

        let client = Arc::clone(&harness.client);
        let call = tokio::spawn(async move {
            client.request("weird", None, Duration::from_secs(5)).await
        });
        let id = next_sent(&mut harness).await["id"].clone();
        harness
            .to_client
            .send(json!({"jsonrpc": "2.0", "id": id, "result": [1, 2]}).to_string())
            .unwrap();
        assert!(matches!(call.await.unwrap(), Err(McpError::Protocol(_))));

        let client = Arc::clone(&harness.client);
        let call = tokio::spawn(async move {
            client.request("ping", None, Duration::from_secs(5)).await
        });
        let id = next_sent(&mut harness).await["id"].clone();
        harness
            .to_client
            .send(json!({"jsonrpc": "2.0", "id": id, "result": null}).to_string())
            .unwrap();
        assert_eq!(call.await.unwrap().unwrap(), json!({}));
    }

    #[tokio::test]
    async fn test_server_requests_and_notifications() {
        let mut harness = connected_harness().await;

        harness
            .to_client
            .send("this is not json".to_string())
            .unwrap();
        harness
            .to_client
            .send(
                json!([
                    {"jsonrpc": "2.0", "id": "srv-1", "method": "ping"},
                    {"jsonrpc": "2.0", "id": "srv-2", "method": "sampling/createMessage"},
                    {"jsonrpc": "2.0", "method": "notifications/tools/list_changed"}
                ])
                .to_string(),
            )
            .unwrap();

        let pong = next_sent(&mut harness).await;
        assert_eq!(pong, json!({"jsonrpc": "2.0", "id": "srv-1", "result": {}}));
        let rejected = next_sent(&mut harness).await;
        assert_eq!(rejected["id"], "srv-2");
        assert_eq!(rejected["error"]["code"], METHOD_NOT_FOUND);

        let notification = harness.notifications.recv().await.unwrap();
        assert_eq!(notification.method, "notifications/tools/list_changed");
    }

    #[tokio::test]
    async fn test_stream_end_fails_pending() {
        let mut harness = connected_harness().await;

        let client = Arc::clone(&harness.client);
        let call = tokio::spawn(async move {
            client.request("tools/list", None, Duration::from_secs(5)).await
        });
        let _ = next_sent(&mut harness).await;
        drop(harness.to_client);

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            McpError::Transport(TransportError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let harness = connected_harness().await;
        harness.client.close();
        harness.client.close();
        assert!(harness.client.is_closed());

        let err = harness
            .client
            .request("ping", None, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::NotConnected));
    }
}
