//! Standard I/O transport.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use mcptester_core::config::TransportKind;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, Mutex};
use tokio::time::Duration;
use tracing::{debug, warn};

use super::{Inbound, Transport};
use crate::error::TransportError;

/// How long a terminated server gets to exit before it is killed.
const GRACEFUL_EXIT: Duration = Duration::from_secs(2);

/// Standard I/O transport for MCP servers.
///
/// Spawns the server on [`Transport::start`] and exchanges
/// newline-delimited JSON messages over its stdin/stdout. The server's
/// stderr is inherited.
pub struct StdioTransport {
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<ChildStdin>>,
    started: AtomicBool,
    connected: AtomicBool,
}

impl StdioTransport {
    /// Create a transport for `command args`. `env` is the complete
    /// environment of the child process.
    pub fn new(command: impl Into<String>, args: Vec<String>, env: HashMap<String, String>) -> Self {
        Self {
            command: command.into(),
            args,
            env,
            child: Mutex::new(None),
            stdin: Mutex::new(None),
            started: AtomicBool::new(false),
            connected: AtomicBool::new(false),
        }
    }

    /// The command this transport runs.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Get the process ID of the child process.
    pub async fn pid(&self) -> Option<u32> {
        self.child.lock().await.as_ref().and_then(Child::id)
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn start(&self) -> Result<Inbound, TransportError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(TransportError::AlreadyStarted);
        }

        debug!(command = %self.command, args = ?self.args, "Spawning MCP server process");

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .env_clear()
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(TransportError::Spawn)?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Spawn(std::io::Error::other("failed to capture stdin")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Spawn(std::io::Error::other("failed to capture stdout")))?;

        debug!(pid = ?child.id(), "MCP server process spawned");

        *self.child.lock().await = Some(child);
        *self.stdin.lock().await = Some(stdin);
        self.connected.store(true, Ordering::SeqCst);

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        if tx.send(line.to_string()).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!("MCP server closed stdout");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to read from MCP server");
                        break;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn send(&self, message: &str) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(TransportError::NotConnected)?;

        debug!(message = message, "Sending message to MCP server");

        stdin
            .write_all(message.as_bytes())
            .await
            .map_err(TransportError::Write)?;
        stdin.write_all(b"\n").await.map_err(TransportError::Write)?;
        stdin.flush().await.map_err(TransportError::Write)?;

        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        debug!(command = %self.command, "Closing stdio transport");

        // Closing stdin is the polite shutdown signal for most servers.
        self.stdin.lock().await.take();

        let Some(mut child) = self.child.lock().await.take() else {
            return Ok(());
        };

        #[cfg(unix)]
        if let Some(pid) = child.id() {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            debug!(pid = pid, "Sending SIGTERM to MCP server");
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }

        match tokio::time::timeout(GRACEFUL_EXIT, child.wait()).await {
            Ok(Ok(status)) => {
                debug!(status = %status, "MCP server exited");
                Ok(())
            }
            Ok(Err(e)) => Err(TransportError::Terminate(e)),
            Err(_) => {
                warn!("MCP server did not exit gracefully, killing");
                child.kill().await.map_err(TransportError::Terminate)
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }
}
