//! Server-Sent Events (SSE) parser with line buffering.
//!
//! Both HTTP transports read `text/event-stream` bodies whose lines can span
//! several network chunks, so bytes are buffered until a full line arrives.

use std::fmt;

/// A parsed SSE event.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    /// The event type (from "event:" line)
    pub event: Option<String>,
    /// The event data (from "data:" lines)
    pub data: String,
    /// The event ID (from "id:" line)
    pub id: Option<String>,
}

impl SseEvent {
    /// True for events that carry a JSON-RPC message (`message` or unnamed).
    pub fn is_message(&self) -> bool {
        matches!(self.event.as_deref(), None | Some("message"))
    }

    /// True for the legacy transport's `endpoint` announcement.
    pub fn is_endpoint(&self) -> bool {
        self.event.as_deref() == Some("endpoint")
    }
}

/// Incremental SSE parser.
#[derive(Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    current_event: Option<String>,
    current_data: Vec<String>,
    current_id: Option<String>,
}

impl SseParser {
    /// Create a new SSE parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes and return every event it completed.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);
        self.parse_buffer()
    }

    /// Feed a string into the parser.
    pub fn feed_str(&mut self, text: &str) -> Vec<SseEvent> {
        self.feed(text.as_bytes())
    }

    /// Flush a final event whose terminating blank line never arrived.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.buffer.is_empty() {
            let raw = std::mem::take(&mut self.buffer);
            let rest = String::from_utf8_lossy(&raw);
            self.parse_line(rest.trim_end_matches('\r'));
        }
        self.finalize_event()
    }

    fn parse_buffer(&mut self) -> Vec<SseEvent> {
        let mut events = Vec::new();

        // Only complete lines are decoded; a multi-byte character split
        // across chunks stays in the buffer until its line ends.
        while let Some(newline_pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches('\n').trim_end_matches('\r');

            if line.is_empty() {
                if let Some(event) = self.finalize_event() {
                    events.push(event);
                }
                continue;
            }

            self.parse_line(line);
        }

        events
    }

    fn parse_line(&mut self, line: &str) {
        // Comment lines start with ':'
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.find(':') {
            Some(colon_pos) => {
                let value = &line[colon_pos + 1..];
                (&line[..colon_pos], value.strip_prefix(' ').unwrap_or(value))
            }
            None => (line, ""),
        };

        match field {
            "event" => self.current_event = Some(value.to_string()),
            "data" => self.current_data.push(value.to_string()),
            "id" => self.current_id = Some(value.to_string()),
            _ => {}
        }
    }

    fn finalize_event(&mut self) -> Option<SseEvent> {
        if self.current_data.is_empty() {
            self.current_event = None;
            self.current_id = None;
            return None;
        }

        let event = SseEvent {
            event: self.current_event.take(),
            data: self.current_data.join("\n"),
            id: self.current_id.take(),
        };
        self.current_data.clear();
        Some(event)
    }
}

impl fmt::Debug for SseParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SseParser")
            .field("buffer_len", &self.buffer.len())
            .field("current_data_lines", &self.current_data.len())
            .finish()
    }
}
