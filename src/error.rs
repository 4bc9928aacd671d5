//! Session-level error types

use crate::config::OptionsError;
use crate::payload::PayloadError;
use crate::session::ConnectionStatus;
use crate::transport::LinkError;
use thiserror::Error;

/// Errors surfaced by session manager operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The operation needs a live connection and there is none.
    #[error("not connected (status: {status:?})")]
    NotConnected { status: ConnectionStatus },

    /// A subscription for this topic already exists.
    #[error("already subscribed to topic: {topic}")]
    DuplicateTopic { topic: String },

    /// No subscription with the given id.
    #[error("unknown subscription: {id}")]
    UnknownSubscription { id: uuid::Uuid },

    #[error("invalid connection options: {0}")]
    InvalidOptions(#[from] OptionsError),

    #[error("payload error: {0}")]
    Payload(#[from] PayloadError),

    #[error("transport error: {0}")]
    Link(#[from] LinkError),
}
