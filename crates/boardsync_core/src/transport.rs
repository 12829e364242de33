//! Collaborator traits for everything that talks to the network.
//!
//! The engine never opens a socket itself. Platform crates implement these
//! traits (`boardsync_native` with reqwest, ureq and tokio-tungstenite) and
//! tests plug in the in-memory fakes from the `testing` module (`testing` feature).
//!
//! ```text
//!   TokenEndpoint ──────┐
//!                       ├──► ChannelProvisioner ──► ChannelConnector ──► ChannelSession
//!   PersistenceEndpoint ├──► session persists (async, fire-and-forget)
//!   TeardownTransport ──┘──► DurabilityGuard (sync, process is going away)
//! ```

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::protocol::PersistRequest;

/// Fetches the short-lived credentials the real-time service requires.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// Token authenticating the connection as the current user.
    async fn connection_token(&self) -> Result<String>;

    /// Token authorizing a subscription to one board's channel.
    async fn subscription_token(&self, board_id: &str) -> Result<String>;
}

/// The server-side store for board snapshots.
#[async_trait]
pub trait PersistenceEndpoint: Send + Sync {
    /// Store a full snapshot. Idempotent on the server side.
    async fn persist(&self, request: &PersistRequest) -> Result<()>;
}

/// Delivery paths that still work while the process is being torn down.
///
/// Both methods are synchronous: by the time they are called, there may be
/// no runtime left to drive a future to completion.
pub trait TeardownTransport: Send + Sync {
    /// Queue the request on a fire-and-forget transport that outlives the
    /// caller. Returns `false` if the transport refused to accept it.
    fn send_beacon(&self, request: &PersistRequest) -> bool;

    /// Deliver the request and block until the server answered.
    fn persist_blocking(&self, request: &PersistRequest) -> Result<()>;
}

/// Something that happened on a connected channel session.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// The transport (re)established its connection.
    Connected,
    /// The transport lost its connection. It may come back on its own.
    Disconnected {
        /// Why the connection dropped.
        reason: String,
    },
    /// A message was published on the subscribed channel.
    Publication(Value),
}

/// Opens authenticated connections to the real-time service.
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    /// Connect and authenticate with `connection_token`.
    async fn connect(&self, connection_token: &str) -> Result<Box<dyn ChannelSession>>;
}

/// One authenticated connection to the real-time service.
///
/// Implementations own reconnection: after a drop they report
/// [`ChannelEvent::Disconnected`], reconnect, restore their subscriptions,
/// and report [`ChannelEvent::Connected`]. `next_event` returns `None` once
/// the session is closed for good.
#[async_trait]
pub trait ChannelSession: Send {
    /// Join `channel` using a subscription token.
    async fn subscribe(&mut self, channel: &str, token: &str) -> Result<()>;

    /// Wait for the next event. Must be cancel-safe.
    async fn next_event(&mut self) -> Option<ChannelEvent>;

    /// Leave `channel`. Stops further publications from being delivered.
    async fn unsubscribe(&mut self, channel: &str) -> Result<()>;

    /// Close the connection.
    async fn close(&mut self) -> Result<()>;
}
