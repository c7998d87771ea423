//! Legacy HTTP+SSE transport.
//!
//! The server holds a long-lived `text/event-stream` response open. Its first
//! `endpoint` event names the URL the client POSTs messages to; every later
//! `message` event carries one JSON-RPC message from the server.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use mcptester_core::config::TransportKind;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Url};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{Inbound, Transport};
use crate::error::TransportError;
use crate::sse::SseParser;

/// HTTP+SSE transport.
pub struct SseTransport {
    client: Client,
    url: Url,
    headers: HeaderMap,
    endpoint: Mutex<Option<Url>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
    connected: Arc<AtomicBool>,
}

impl SseTransport {
    /// Create a transport for the event stream at `url`. `headers` are sent
    /// with every request.
    pub fn new(url: Url, headers: HeaderMap) -> Self {
        Self {
            client: Client::new(),
            url,
            headers,
            endpoint: Mutex::new(None),
            reader: Mutex::new(None),
            started: AtomicBool::new(false),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The POST endpoint announced by the server, once known.
    pub fn endpoint(&self) -> Option<Url> {
        self.endpoint.lock().clone()
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn start(&self) -> Result<Inbound, TransportError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(TransportError::AlreadyStarted);
        }

        debug!(url = %self.url, "Opening SSE stream");

        let response = self
            .client
            .get(self.url.clone())
            .headers(self.headers.clone())
            .header(ACCEPT, HeaderValue::from_static("text/event-stream"))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let (endpoint_tx, endpoint_rx) = oneshot::channel::<Result<Url, String>>();
        let base = self.url.clone();
        let connected = Arc::clone(&self.connected);

        let reader = tokio::spawn(async move {
            let mut endpoint_tx = Some(endpoint_tx);
            let mut parser = SseParser::new();
            let mut stream = response.bytes_stream();

            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        warn!(error = %e, "SSE stream failed");
                        break;
                    }
                };

                for event in parser.feed(&chunk) {
                    if event.is_endpoint() {
                        if let Some(sender) = endpoint_tx.take() {
                            let resolved = base
                                .join(event.data.trim())
                                .map_err(|e| format!("invalid endpoint '{}': {}", event.data, e));
                            let _ = sender.send(resolved);
                        }
                    } else if event.is_message() {
                        if tx.send(event.data).is_err() {
                            return;
                        }
                    } else {
                        debug!(event = ?event.event, "Ignoring SSE event");
                    }
                }
            }

            connected.store(false, Ordering::SeqCst);
            if let Some(sender) = endpoint_tx.take() {
                let _ = sender.send(Err("stream ended before an endpoint was announced".to_string()));
            }
            debug!("SSE stream ended");
        });
        *self.reader.lock() = Some(reader);

        let endpoint = match endpoint_rx.await {
            Ok(Ok(endpoint)) => endpoint,
            Ok(Err(message)) => return Err(TransportError::Stream(message)),
            Err(_) => return Err(TransportError::Stream("SSE reader stopped".to_string())),
        };

        info!(endpoint = %endpoint, "SSE endpoint announced");
        *self.endpoint.lock() = Some(endpoint);
        self.connected.store(true, Ordering::SeqCst);

        Ok(rx)
    }

    async fn send(&self, message: &str) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let endpoint = self.endpoint().ok_or(TransportError::NotConnected)?;

        debug!(message = message, "Posting message to SSE endpoint");

        let response = self
            .client
            .post(endpoint)
            .headers(self.headers.clone())
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .body(message.to_string())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Http {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(reader) = self.reader.lock().take() {
            debug!(url = %self.url, "Closing SSE transport");
            reader.abort();
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Sse
    }
}
