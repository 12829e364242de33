//! In-memory test doubles for the collaborator traits.
//!
//! Every double uses `Arc<Mutex<..>>` internally so it can be cloned into a
//! session while the test keeps a handle for assertions.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::{Result, SyncError};
use crate::protocol::{ChannelEnvelope, PersistRequest, format_board_channel};
use crate::state::EditableState;
use crate::transport::{
    ChannelConnector, ChannelEvent, ChannelSession, PersistenceEndpoint, TeardownTransport,
    TokenEndpoint,
};

#[derive(Debug, Default)]
struct PersistenceLog {
    calls: Vec<(Instant, PersistRequest)>,
    fail_next: usize,
    latency: Duration,
}

/// A persistence endpoint that records every request.
#[derive(Debug, Clone, Default)]
pub struct RecordingPersistence {
    log: Arc<Mutex<PersistenceLog>>,
}

impl RecordingPersistence {
    /// Create an endpoint that accepts everything immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every answer by `latency` (builder pattern).
    pub fn with_latency(self, latency: Duration) -> Self {
        self.log.lock().unwrap().latency = latency;
        self
    }

    /// Make the next `count` calls fail.
    pub fn fail_next(&self, count: usize) {
        self.log.lock().unwrap().fail_next = count;
    }

    /// Every request received, in order.
    pub fn requests(&self) -> Vec<PersistRequest> {
        self.log
            .lock()
            .unwrap()
            .calls
            .iter()
            .map(|(_, request)| request.clone())
            .collect()
    }

    /// Every request received, with the instant it arrived.
    pub fn calls(&self) -> Vec<(Instant, PersistRequest)> {
        self.log.lock().unwrap().calls.clone()
    }

    /// Number of requests received.
    pub fn count(&self) -> usize {
        self.log.lock().unwrap().calls.len()
    }
}

#[async_trait]
impl PersistenceEndpoint for RecordingPersistence {
    async fn persist(&self, request: &PersistRequest) -> Result<()> {
        let (latency, fail) = {
            let mut log = self.log.lock().unwrap();
            log.calls.push((Instant::now(), request.clone()));
            let fail = log.fail_next > 0;
            if fail {
                log.fail_next -= 1;
            }
            (log.latency, fail)
        };

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if fail {
            return Err(SyncError::Http {
                endpoint: "persist",
                status: 503,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct TeardownLog {
    beacons: Vec<PersistRequest>,
    blocking: Vec<PersistRequest>,
    refuse_beacon: bool,
    fail_blocking: bool,
}

/// A teardown transport that records what it was asked to deliver.
#[derive(Debug, Clone, Default)]
pub struct RecordingTeardown {
    log: Arc<Mutex<TeardownLog>>,
}

impl RecordingTeardown {
    /// Create a transport whose beacon accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the beacon refuse requests (builder pattern).
    pub fn refuse_beacon(self) -> Self {
        self.log.lock().unwrap().refuse_beacon = true;
        self
    }

    /// Make the blocking fallback fail (builder pattern).
    pub fn fail_blocking(self) -> Self {
        self.log.lock().unwrap().fail_blocking = true;
        self
    }

    /// Requests accepted by the beacon.
    pub fn beacons(&self) -> Vec<PersistRequest> {
        self.log.lock().unwrap().beacons.clone()
    }

    /// Requests sent through the blocking fallback.
    pub fn blocking_calls(&self) -> Vec<PersistRequest> {
        self.log.lock().unwrap().blocking.clone()
    }
}

impl TeardownTransport for RecordingTeardown {
    fn send_beacon(&self, request: &PersistRequest) -> bool {
        let mut log = self.log.lock().unwrap();
        if log.refuse_beacon {
            return false;
        }
        log.beacons.push(request.clone());
        true
    }

    fn persist_blocking(&self, request: &PersistRequest) -> Result<()> {
        let mut log = self.log.lock().unwrap();
        log.blocking.push(request.clone());
        if log.fail_blocking {
            return Err(SyncError::TeardownDelivery("connection refused".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct TokenLog {
    connection_requests: usize,
    subscription_requests: Vec<String>,
}

/// A token endpoint handing out fixed tokens.
#[derive(Debug, Clone)]
pub struct StaticTokens {
    connection: Option<String>,
    subscription: Option<String>,
    log: Arc<Mutex<TokenLog>>,
}

impl StaticTokens {
    /// Hand out `connection` and `subscription` for every request.
    pub fn new(connection: impl Into<String>, subscription: impl Into<String>) -> Self {
        Self {
            connection: Some(connection.into()),
            subscription: Some(subscription.into()),
            log: Arc::default(),
        }
    }

    /// An endpoint whose connection-token request fails.
    pub fn failing_connection(subscription: impl Into<String>) -> Self {
        Self {
            connection: None,
            ..Self::new("", subscription)
        }
    }

    /// An endpoint whose subscription-token request fails.
    pub fn failing_subscription(connection: impl Into<String>) -> Self {
        Self {
            subscription: None,
            ..Self::new(connection, "")
        }
    }

    /// Number of connection-token requests served.
    pub fn connection_requests(&self) -> usize {
        self.log.lock().unwrap().connection_requests
    }

    /// Board ids subscription tokens were requested for.
    pub fn subscription_requests(&self) -> Vec<String> {
        self.log.lock().unwrap().subscription_requests.clone()
    }
}

#[async_trait]
impl TokenEndpoint for StaticTokens {
    async fn connection_token(&self) -> Result<String> {
        self.log.lock().unwrap().connection_requests += 1;
        self.connection.clone().ok_or(SyncError::Credentials {
            kind: "connection",
            message: "HTTP 401".into(),
        })
    }

    async fn subscription_token(&self, board_id: &str) -> Result<String> {
        self.log
            .lock()
            .unwrap()
            .subscription_requests
            .push(board_id.to_string());
        self.subscription.clone().ok_or(SyncError::Credentials {
            kind: "subscription",
            message: "HTTP 403".into(),
        })
    }
}

#[derive(Debug)]
struct HubSession {
    id: usize,
    tx: mpsc::UnboundedSender<ChannelEvent>,
    channels: HashSet<String>,
}

#[derive(Debug, Default)]
struct HubState {
    next_id: usize,
    sessions: Vec<HubSession>,
    connect_tokens: Vec<String>,
    subscribe_tokens: Vec<(String, String)>,
    refuse_connect: bool,
}

/// An in-process real-time service.
///
/// Acts as the [`ChannelConnector`]; tests publish into it directly.
#[derive(Debug, Clone, Default)]
pub struct MemoryChannelHub {
    state: Arc<Mutex<HubState>>,
}

impl MemoryChannelHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every connect attempt fail.
    pub fn refuse_connections(&self) {
        self.state.lock().unwrap().refuse_connect = true;
    }

    /// Publish raw data on `channel`. Returns the number of receivers.
    pub fn publish(&self, channel: &str, data: Value) -> usize {
        let state = self.state.lock().unwrap();
        state
            .sessions
            .iter()
            .filter(|s| s.channels.contains(channel))
            .filter(|s| s.tx.send(ChannelEvent::Publication(data.clone())).is_ok())
            .count()
    }

    /// Publish a snapshot on a board's channel as `author`.
    pub fn publish_snapshot(&self, board_id: &str, author: &str, snapshot: &EditableState) -> usize {
        match ChannelEnvelope::new(author, snapshot).and_then(|e| Ok(serde_json::to_value(e)?)) {
            Ok(data) => self.publish(&format_board_channel(board_id), data),
            Err(_) => 0,
        }
    }

    /// Report a connection drop to every session.
    pub fn drop_connections(&self, reason: &str) {
        let state = self.state.lock().unwrap();
        for session in &state.sessions {
            let _ = session.tx.send(ChannelEvent::Disconnected {
                reason: reason.to_string(),
            });
        }
    }

    /// Report a reconnect to every session.
    pub fn restore_connections(&self) {
        let state = self.state.lock().unwrap();
        for session in &state.sessions {
            let _ = session.tx.send(ChannelEvent::Connected);
        }
    }

    /// Number of sessions currently subscribed to `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .sessions
            .iter()
            .filter(|s| s.channels.contains(channel))
            .count()
    }

    /// Tokens used to connect, in order.
    pub fn connect_tokens(&self) -> Vec<String> {
        self.state.lock().unwrap().connect_tokens.clone()
    }

    /// `(channel, token)` pairs used to subscribe, in order.
    pub fn subscribe_tokens(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().subscribe_tokens.clone()
    }

    /// Number of open sessions.
    pub fn open_sessions(&self) -> usize {
        self.state.lock().unwrap().sessions.len()
    }
}

#[async_trait]
impl ChannelConnector for MemoryChannelHub {
    async fn connect(&self, connection_token: &str) -> Result<Box<dyn ChannelSession>> {
        let mut state = self.state.lock().unwrap();
        if state.refuse_connect {
            return Err(SyncError::Transport("connection refused".into()));
        }
        state.connect_tokens.push(connection_token.to_string());

        let (tx, rx) = mpsc::unbounded_channel();
        let id = state.next_id;
        state.next_id += 1;
        state.sessions.push(HubSession {
            id,
            tx,
            channels: HashSet::new(),
        });

        Ok(Box::new(MemoryChannelSession {
            hub: self.state.clone(),
            id,
            rx,
        }))
    }
}

struct MemoryChannelSession {
    hub: Arc<Mutex<HubState>>,
    id: usize,
    rx: mpsc::UnboundedReceiver<ChannelEvent>,
}

impl MemoryChannelSession {
    fn with_session<R>(&self, f: impl FnOnce(&mut HubSession) -> R) -> Result<R> {
        let mut state = self.hub.lock().unwrap();
        state
            .sessions
            .iter_mut()
            .find(|s| s.id == self.id)
            .map(f)
            .ok_or(SyncError::ChannelClosed)
    }
}

#[async_trait]
impl ChannelSession for MemoryChannelSession {
    async fn subscribe(&mut self, channel: &str, token: &str) -> Result<()> {
        self.with_session(|s| {
            s.channels.insert(channel.to_string());
        })?;
        self.hub
            .lock()
            .unwrap()
            .subscribe_tokens
            .push((channel.to_string(), token.to_string()));
        Ok(())
    }

    async fn next_event(&mut self) -> Option<ChannelEvent> {
        self.rx.recv().await
    }

    async fn unsubscribe(&mut self, channel: &str) -> Result<()> {
        self.with_session(|s| {
            s.channels.remove(channel);
        })
    }

    async fn close(&mut self) -> Result<()> {
        self.hub
            .lock()
            .unwrap()
            .sessions
            .retain(|s| s.id != self.id);
        self.rx.close();
        Ok(())
    }
}
