//! Streamable HTTP transport.
//!
//! Every client message is POSTed to a single endpoint. The server answers
//! with `202 Accepted` (nothing to read), a JSON body, or an SSE stream of
//! messages. The session id the server assigns travels in `Mcp-Session-Id`.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use mcptester_core::config::TransportKind;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Response, StatusCode, Url};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{Inbound, Transport};
use crate::error::TransportError;
use crate::sse::SseParser;

/// Header carrying the server-assigned session id.
pub const SESSION_ID_HEADER: &str = "Mcp-Session-Id";

/// Streamable HTTP transport.
pub struct StreamableHttpTransport {
    client: Client,
    url: Url,
    headers: HeaderMap,
    session_id: Mutex<Option<String>>,
    inbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    started: AtomicBool,
    connected: AtomicBool,
}

impl StreamableHttpTransport {
    /// Create a transport for the endpoint at `url`. `headers` are sent with
    /// every request.
    pub fn new(url: Url, headers: HeaderMap) -> Self {
        Self {
            client: Client::new(),
            url,
            headers,
            session_id: Mutex::new(None),
            inbound: Mutex::new(None),
            started: AtomicBool::new(false),
            connected: AtomicBool::new(false),
        }
    }

    /// The session id assigned by the server, if any.
    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().clone()
    }

    fn inbound_sender(&self) -> Result<mpsc::UnboundedSender<String>, TransportError> {
        self.inbound.lock().clone().ok_or(TransportError::NotConnected)
    }

    fn capture_session_id(&self, response: &Response) {
        let Some(sid) = response
            .headers()
            .get(SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
        else {
            return;
        };

        let mut current = self.session_id.lock();
        if current.as_deref() != Some(sid) {
            info!(session_id = sid, "MCP session id assigned");
            *current = Some(sid.to_string());
        }
    }

    fn with_headers(&self, mut request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request = request.headers(self.headers.clone());
        if let Some(sid) = self.session_id() {
            request = request.header(SESSION_ID_HEADER, sid);
        }
        request
    }
}

/// Forward a JSON body, splitting batches into single messages.
fn forward_json(body: &str, tx: &mpsc::UnboundedSender<String>) {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Array(messages)) => {
            for message in messages {
                let _ = tx.send(message.to_string());
            }
        }
        Ok(_) => {
            let _ = tx.send(body.to_string());
        }
        Err(e) => warn!(error = %e, "Discarding non-JSON response body"),
    }
}

#[async_trait]
impl Transport for StreamableHttpTransport {
    async fn start(&self) -> Result<Inbound, TransportError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(TransportError::AlreadyStarted);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *self.inbound.lock() = Some(tx);
        self.connected.store(true, Ordering::SeqCst);
        debug!(url = %self.url, "Streamable HTTP transport ready");

        Ok(rx)
    }

    async fn send(&self, message: &str) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let tx = self.inbound_sender()?;

        debug!(message = message, "Posting message to MCP endpoint");

        let response = self
            .with_headers(self.client.post(self.url.clone()))
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .header(
                ACCEPT,
                HeaderValue::from_static("application/json, text/event-stream"),
            )
            .body(message.to_string())
            .send()
            .await?;

        self.capture_session_id(&response);

        let status = response.status();
        if status == StatusCode::ACCEPTED {
            return Ok(());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if content_type.contains("text/event-stream") {
            tokio::spawn(async move {
                let mut parser = SseParser::new();
                let mut stream = response.bytes_stream();
                while let Some(chunk) = stream.next().await {
                    let chunk = match chunk {
                        Ok(chunk) => chunk,
                        Err(e) => {
                            warn!(error = %e, "Response stream failed");
                            return;
                        }
                    };
                    for event in parser.feed(&chunk) {
                        if event.is_message() && tx.send(event.data).is_err() {
                            return;
                        }
                    }
                }
                if let Some(event) = parser.finish() {
                    if event.is_message() {
                        let _ = tx.send(event.data);
                    }
                }
            });
            return Ok(());
        }

        let body = response.text().await?;
        if !body.trim().is_empty() {
            forward_json(&body, &tx);
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        if self.session_id().is_some() {
            let result = self
                .with_headers(self.client.delete(self.url.clone()))
                .send()
                .await;
            if let Err(e) = result {
                debug!(error = %e, "Session termination request failed");
            }
        }

        self.inbound.lock().take();
        debug!(url = %self.url, "Closed streamable HTTP transport");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn kind(&self) -> TransportKind {
        TransportKind::StreamableHttp
    }
}
