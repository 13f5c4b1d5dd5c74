//! Feed event envelope
//!
//! Every feed record carries a `metadata` section with the upstream-assigned
//! offset and an `eventType` discriminator, plus a type-specific `event`
//! payload. The payload stays an opaque JSON value; metadata fields this crate
//! doesn't name are kept in `extra` so handlers see the full record.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub metadata: EventMetadata,
    #[serde(default)]
    pub event: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    /// Monotonically increasing per app/subscription, assigned upstream.
    pub offset: u64,
    pub event_type: String,
    /// Epoch milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_creation_time: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Event {
    pub fn offset(&self) -> u64 {
        self.metadata.offset
    }

    pub fn event_type(&self) -> &str {
        &self.metadata.event_type
    }

    /// Parse one feed line. Empty and whitespace-only lines yield `None`.
    pub fn parse_line(line: &str) -> Result<Option<Event>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        serde_json::from_str(line)
            .map(Some)
            .map_err(|e| Error::MalformedEvent(e.to_string()))
    }
}
