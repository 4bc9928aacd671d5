//! Session event broadcasting
//!
//! The session manager publishes coarse-grained events over a broadcast
//! channel: a state-change signal telling observers to re-read session
//! state, and user-facing notices. Slow or absent observers never block
//! the session.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

const EVENT_CAPACITY: usize = 64;

/// Severity of a user-facing notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
    /// The connection was torn down and will not come back on its own.
    Terminal,
}

/// Events observers receive from a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Session state changed; observers should re-read the accessors.
    StateChanged,
    /// Something the user should see.
    Notice { level: NoticeLevel, text: String },
}

/// Broadcast fan-out for session events.
#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    pub fn state_changed(&self) {
        // send only fails when nobody is listening, which is fine
        let _ = self.tx.send(SessionEvent::StateChanged);
    }

    pub fn notice(&self, level: NoticeLevel, text: impl Into<String>) {
        let text = text.into();
        debug!(?level, %text, "session notice");
        let _ = self.tx.send(SessionEvent::Notice { level, text });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
