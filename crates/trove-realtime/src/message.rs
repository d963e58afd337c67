//! Chat message frames and the consumer-side message log.
//!
//! De-duplication happens at the consumer boundary, not inside the channel:
//! the channel delivers every frame it receives, and [`MessageLog`] drops a
//! frame whose server-assigned `id` was already recorded. Frames without an
//! `id` are locally originated echoes and are never treated as duplicates.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One inbound or outbound chat frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// Frame type (e.g. `"message"`).
    #[serde(rename = "type")]
    pub kind: String,
    /// Server-assigned message id; absent on locally originated echoes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Room the message belongs to.
    pub room_id: String,
    /// Author, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    /// Message text.
    pub body: String,
    /// Persistence timestamp, when the server assigned one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Ordered message list with id-based de-duplication.
#[derive(Debug, Default)]
pub struct MessageLog {
    messages: Vec<MessageEnvelope>,
    seen_ids: HashSet<String>,
}

impl MessageLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an envelope unless its `id` is already present.
    ///
    /// Returns `false` when the envelope was dropped as a duplicate.
    pub fn push(&mut self, envelope: MessageEnvelope) -> bool {
        if let Some(id) = envelope.id.clone() {
            if !self.seen_ids.insert(id) {
                return false;
            }
        }
        self.messages.push(envelope);
        true
    }

    /// Messages in arrival order.
    #[must_use]
    pub fn messages(&self) -> &[MessageEnvelope] {
        &self.messages
    }

    /// Number of retained messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns `true` if the log holds no messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
