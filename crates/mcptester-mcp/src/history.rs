//! Bounded request history, newest first.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The request half of a history entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRequest {
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// One dispatched request and its outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub request: HistoryRequest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HistoryItem {
    /// A new entry stamped with the current time.
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id,
            timestamp: Utc::now(),
            request: HistoryRequest {
                method: method.into(),
                params,
            },
            response: None,
            error: None,
        }
    }

    /// Whether the request failed.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Request history holding at most `max_size` entries.
#[derive(Debug)]
pub struct RequestHistory {
    items: Mutex<VecDeque<HistoryItem>>,
    max_size: usize,
}

impl RequestHistory {
    /// Create a history. A maximum of 0 is treated as 1.
    pub fn new(max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(max_size.min(256))),
            max_size,
        }
    }

    /// Insert at the front, dropping the oldest entries past the maximum.
    pub fn add(&self, item: HistoryItem) {
        let mut items = self.items.lock();
        items.push_front(item);
        items.truncate(self.max_size);
    }

    pub fn clear(&self) {
        self.items.lock().clear();
    }

    /// Owned copy of the entries, newest first.
    pub fn snapshot(&self) -> Vec<HistoryItem> {
        self.items.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Pretty-printed JSON array of the entries.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.snapshot())
    }
}
