//! Bounded in-memory message history
//!
//! Newest messages sit at the front; once the buffer is full the oldest
//! entry falls off the back. The capacity is fixed so a chatty topic can
//! never grow the session without bound.

use crate::config::QosLevel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How many messages the session retains, newest first.
pub const MESSAGE_CAPACITY: usize = 101;

/// One received or published message as kept in session history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub topic: String,
    /// Payload decoded to text (lossy for non-UTF-8 bytes).
    pub payload: String,
    /// Structured form, present when the payload was a JSON object.
    #[serde(default)]
    pub parsed: Option<serde_json::Value>,
    /// Wire size in bytes.
    pub size: usize,
    pub qos: QosLevel,
    pub retain: bool,
    /// True for messages this client published, false for received ones.
    pub out: bool,
    pub created_at: DateTime<Utc>,
    /// Display color inherited from the matching subscription.
    #[serde(default)]
    pub color: Option<String>,
}

impl Message {
    pub fn received(topic: impl Into<String>, payload: impl Into<String>, qos: QosLevel, retain: bool) -> Self {
        let payload = payload.into();
        Self {
            id: Uuid::new_v4(),
            topic: topic.into(),
            size: payload.len(),
            payload,
            parsed: None,
            qos,
            retain,
            out: false,
            created_at: Utc::now(),
            color: None,
        }
    }

    pub fn published(topic: impl Into<String>, payload: impl Into<String>, qos: QosLevel, retain: bool) -> Self {
        Self {
            out: true,
            ..Self::received(topic, payload, qos, retain)
        }
    }
}

/// Fixed-capacity ring over session messages.
#[derive(Debug, Default)]
pub struct MessageBuffer {
    entries: std::collections::VecDeque<Message>,
}

impl MessageBuffer {
    pub fn new() -> Self {
        Self {
            entries: std::collections::VecDeque::with_capacity(MESSAGE_CAPACITY),
        }
    }

    /// Insert at the front, dropping the oldest entry once full.
    pub fn push(&mut self, message: Message) {
        if self.entries.len() == MESSAGE_CAPACITY {
            self.entries.pop_back();
        }
        self.entries.push_front(message);
    }

    /// Drop every entry the predicate matches.
    pub fn purge_where(&mut self, predicate: impl Fn(&Message) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|message| !predicate(message));
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Newest-first iteration.
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.entries.iter()
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.entries.iter().cloned().collect()
    }
}
