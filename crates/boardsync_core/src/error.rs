//! Error types for the sync engine.
//!
//! None of these are surfaced to the person editing the board. The engine
//! logs them, reports them through [`SyncEvent::Error`](crate::SyncEvent), and
//! carries on: the next debounce or sweep cycle is the recovery path.

use thiserror::Error;

/// Errors produced by the sync engine and its collaborators.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A network transport failed (connect, send, receive).
    #[error("transport error: {0}")]
    Transport(String),

    /// An HTTP endpoint answered with a non-success status.
    #[error("{endpoint} returned HTTP {status}")]
    Http {
        /// Which endpoint was called.
        endpoint: &'static str,
        /// Status code returned by the server.
        status: u16,
    },

    /// A connection or subscription token could not be obtained.
    #[error("failed to obtain {kind} token: {message}")]
    Credentials {
        /// `"connection"` or `"subscription"`.
        kind: &'static str,
        /// Underlying failure.
        message: String,
    },

    /// A remote message could not be decoded into a snapshot.
    #[error("malformed remote message: {0}")]
    MalformedMessage(String),

    /// JSON encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The real-time channel closed.
    #[error("channel closed")]
    ChannelClosed,

    /// The board session has already shut down.
    #[error("session closed")]
    SessionClosed,

    /// Both the fire-and-forget transport and its synchronous fallback failed
    /// during teardown.
    #[error("teardown delivery failed: {0}")]
    TeardownDelivery(String),
}

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, SyncError>;
