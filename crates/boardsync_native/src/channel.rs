//! Real-time channel over tokio-tungstenite.
//!
//! [`RealtimeConnector::connect`] opens the WebSocket and authenticates it
//! before returning, so a bad URL or a rejected token surfaces as an error
//! to the provisioner. After that, a background task owns the socket:
//!
//! ```text
//!  RealtimeSession ──Command──► connection task ──frames──► server
//!        ▲                           │
//!        └──────ChannelEvent─────────┘
//! ```
//!
//! When the socket drops, the task reports `Disconnected`, reconnects with
//! exponential backoff, re-authenticates with the same connection token,
//! re-subscribes every channel with its subscription token, and reports
//! `Connected`. If it runs out of attempts the event stream ends.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use boardsync_core::protocol::{ChannelCommand, ChannelReply, CommandBody};
use boardsync_core::{ChannelConnector, ChannelEvent, ChannelSession, Result, SyncError};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// How long to wait for the server to answer the `connect` command.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// How the connection task retries after the socket drops.
///
/// Attempt `n` of an outage waits `min(base^n, cap)` seconds, so the
/// defaults give 2s, 4s, 8s, 16s, 32s, 32s... Every successful attempt
/// re-sends `connect` and restores all subscriptions; the attempt count
/// starts over with the next outage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// `false` ends the event stream on the first drop.
    pub enabled: bool,
    /// Attempts per outage before the event stream ends. 0 retries forever.
    pub max_attempts: u32,
    /// Backoff base, in seconds.
    pub base_delay_secs: u64,
    /// Backoff cap, in seconds.
    pub max_delay_secs: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 10,
            base_delay_secs: 2,
            max_delay_secs: 32,
        }
    }
}

impl ReconnectConfig {
    /// Never reconnect: a drop ends the session's event stream.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Backoff before reconnection attempt `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let secs = self
            .base_delay_secs
            .saturating_pow(attempt)
            .min(self.max_delay_secs);
        Duration::from_secs(secs)
    }

    fn exhausted(&self, attempt: u32) -> bool {
        !self.enabled || (self.max_attempts > 0 && attempt > self.max_attempts)
    }
}

/// Turn an `http(s)` URL into the matching `ws(s)` URL. `ws(s)` URLs pass through.
pub fn websocket_url(raw: &str) -> Result<Url> {
    let mut url =
        Url::parse(raw).map_err(|e| SyncError::Transport(format!("invalid URL {raw}: {e}")))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(SyncError::Transport(format!(
                "unsupported real-time URL scheme: {other}"
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| SyncError::Transport(format!("cannot use {scheme} for {raw}")))?;
    Ok(url)
}

/// Opens real-time connections.
#[derive(Debug, Clone)]
pub struct RealtimeConnector {
    url: Url,
    reconnect: ReconnectConfig,
}

impl RealtimeConnector {
    /// Create a connector for the real-time service at `url`.
    pub fn new(url: Url, reconnect: ReconnectConfig) -> Self {
        Self { url, reconnect }
    }
}

#[async_trait]
impl ChannelConnector for RealtimeConnector {
    async fn connect(&self, connection_token: &str) -> Result<Box<dyn ChannelSession>> {
        let mut connection = Connection {
            url: self.url.clone(),
            token: connection_token.to_string(),
            reconnect: self.reconnect.clone(),
            subscriptions: HashMap::new(),
            next_id: 0,
            pending: HashMap::new(),
            events: mpsc::unbounded_channel().0,
        };
        let ws = connection.open().await?;
        log::info!("[ChannelTransport] Connected to {}", self.url);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        connection.events = events_tx;
        let task = tokio::spawn(connection.run(ws, commands_rx));

        Ok(Box::new(RealtimeSession {
            commands: commands_tx,
            events: events_rx,
            task: Some(task),
        }))
    }
}

enum Command {
    Subscribe {
        channel: String,
        token: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Unsubscribe {
        channel: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Close,
}

/// Client side of a real-time connection.
pub struct RealtimeSession {
    commands: mpsc::UnboundedSender<Command>,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl RealtimeSession {
    async fn request(&self, build: impl FnOnce(oneshot::Sender<Result<()>>) -> Command) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .map_err(|_| SyncError::ChannelClosed)?;
        rx.await.map_err(|_| SyncError::ChannelClosed)?
    }
}

#[async_trait]
impl ChannelSession for RealtimeSession {
    async fn subscribe(&mut self, channel: &str, token: &str) -> Result<()> {
        let (channel, token) = (channel.to_string(), token.to_string());
        self.request(|reply| Command::Subscribe {
            channel,
            token,
            reply,
        })
        .await
    }

    async fn next_event(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }

    async fn unsubscribe(&mut self, channel: &str) -> Result<()> {
        let channel = channel.to_string();
        self.request(|reply| Command::Unsubscribe { channel, reply })
            .await
    }

    async fn close(&mut self) -> Result<()> {
        let _ = self.commands.send(Command::Close);
        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| SyncError::Transport(format!("connection task failed: {e}")))?;
        }
        Ok(())
    }
}

impl Drop for RealtimeSession {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Close);
    }
}

enum Exit {
    Closed,
    Dropped(String),
}

struct Connection {
    url: Url,
    token: String,
    reconnect: ReconnectConfig,
    /// Channel name to subscription token, restored after every reconnect.
    subscriptions: HashMap<String, String>,
    next_id: u32,
    pending: HashMap<u32, oneshot::Sender<Result<()>>>,
    events: mpsc::UnboundedSender<ChannelEvent>,
}

impl Connection {
    fn command(&mut self, body: CommandBody) -> Result<(u32, Message)> {
        self.next_id += 1;
        let id = self.next_id;
        let frame = ChannelCommand { id, body }.to_frame()?;
        Ok((id, Message::Text(frame.into())))
    }

    /// Open the socket and run the `connect` handshake.
    async fn open(&mut self) -> Result<WsStream> {
        let (mut ws, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| SyncError::Transport(format!("connection failed: {e}")))?;

        let (id, frame) = self.command(CommandBody::Connect {
            token: self.token.clone(),
        })?;
        ws.send(frame)
            .await
            .map_err(|e| SyncError::Transport(format!("send failed: {e}")))?;

        match tokio::time::timeout(HANDSHAKE_TIMEOUT, wait_for_reply(&mut ws, id)).await {
            Ok(result) => result?,
            Err(_) => return Err(SyncError::Transport("connect handshake timed out".into())),
        }
        Ok(ws)
    }

    async fn run(mut self, mut ws: WsStream, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            match self.pump(&mut ws, &mut commands).await {
                Exit::Closed => {
                    let _ = ws.close(None).await;
                    log::debug!("[ChannelTransport] Connection closed");
                    return;
                }
                Exit::Dropped(reason) => {
                    log::warn!("[ChannelTransport] Connection lost: {}", reason);
                    for (_, reply) in self.pending.drain() {
                        let _ = reply.send(Err(SyncError::ChannelClosed));
                    }
                    let _ = self.events.send(ChannelEvent::Disconnected { reason });

                    match self.reconnect(&mut commands).await {
                        Some(next) => {
                            ws = next;
                            let _ = self.events.send(ChannelEvent::Connected);
                        }
                        None => return,
                    }
                }
            }
        }
    }

    async fn pump(
        &mut self,
        ws: &mut WsStream,
        commands: &mut mpsc::UnboundedReceiver<Command>,
    ) -> Exit {
        loop {
            tokio::select! {
                msg = ws.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = self.on_text(ws, text.as_str()).await {
                            return Exit::Dropped(e.to_string());
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return Exit::Dropped("closed by server".into());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Exit::Dropped(e.to_string()),
                },
                cmd = commands.recv() => match cmd {
                    Some(Command::Subscribe { channel, token, reply }) => {
                        let body = CommandBody::Subscribe {
                            channel: channel.clone(),
                            token: token.clone(),
                        };
                        self.subscriptions.insert(channel, token);
                        if let Err(e) = self.send_tracked(ws, body, reply).await {
                            return Exit::Dropped(e.to_string());
                        }
                    }
                    Some(Command::Unsubscribe { channel, reply }) => {
                        self.subscriptions.remove(&channel);
                        if let Err(e) = self
                            .send_tracked(ws, CommandBody::Unsubscribe { channel }, reply)
                            .await
                        {
                            return Exit::Dropped(e.to_string());
                        }
                    }
                    Some(Command::Close) | None => return Exit::Closed,
                },
            }
        }
    }

    /// Send a command whose reply resolves `reply`.
    async fn send_tracked(
        &mut self,
        ws: &mut WsStream,
        body: CommandBody,
        reply: oneshot::Sender<Result<()>>,
    ) -> Result<()> {
        let (id, frame) = match self.command(body) {
            Ok(command) => command,
            Err(e) => {
                let _ = reply.send(Err(e));
                return Ok(());
            }
        };
        self.pending.insert(id, reply);
        ws.send(frame)
            .await
            .map_err(|e| SyncError::Transport(format!("send failed: {e}")))
    }

    /// Handle one text frame. Errors mean the socket is unusable.
    async fn on_text(&mut self, ws: &mut WsStream, text: &str) -> Result<()> {
        // The server may batch several JSON replies into one frame.
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            let reply = match ChannelReply::parse(line) {
                Ok(reply) => reply,
                Err(e) => {
                    log::warn!("[ChannelTransport] Ignoring frame: {}", e);
                    continue;
                }
            };

            if reply.is_ping() {
                ws.send(Message::Text("{}".into()))
                    .await
                    .map_err(|e| SyncError::Transport(format!("pong failed: {e}")))?;
                continue;
            }

            if let Some(id) = reply.id {
                if let Some(waiter) = self.pending.remove(&id) {
                    let result = match &reply.error {
                        Some(err) => Err(SyncError::Transport(format!(
                            "server error {}: {}",
                            err.code, err.message
                        ))),
                        None => Ok(()),
                    };
                    let _ = waiter.send(result);
                } else if let Some(err) = &reply.error {
                    log::warn!(
                        "[ChannelTransport] Command {} failed: {} {}",
                        id,
                        err.code,
                        err.message
                    );
                }
                continue;
            }

            let Some(push) = &reply.push else { continue };
            if !self.subscriptions.contains_key(&push.channel) {
                continue;
            }
            let channel = push.channel.clone();
            if let Some(data) = reply.publication_for(&channel) {
                let _ = self.events.send(ChannelEvent::Publication(data));
            }
        }
        Ok(())
    }

    /// Reconnect with backoff. `None` when closed or out of attempts.
    async fn reconnect(
        &mut self,
        commands: &mut mpsc::UnboundedReceiver<Command>,
    ) -> Option<WsStream> {
        let mut attempt = 1u32;
        loop {
            if self.reconnect.exhausted(attempt) {
                log::info!("[ChannelTransport] Giving up on reconnection");
                return None;
            }

            let delay = self.reconnect.delay(attempt);
            log::info!(
                "[ChannelTransport] Reconnecting in {}s (attempt {}/{})",
                delay.as_secs(),
                attempt,
                if self.reconnect.max_attempts == 0 {
                    "∞".to_string()
                } else {
                    self.reconnect.max_attempts.to_string()
                }
            );
            if !self.wait_offline(delay, commands).await {
                return None;
            }

            match self.open().await {
                Ok(mut ws) => {
                    if let Err(e) = self.resubscribe(&mut ws).await {
                        log::warn!("[ChannelTransport] Resubscribe failed: {}", e);
                        attempt += 1;
                        continue;
                    }
                    log::info!("[ChannelTransport] Reconnected to {}", self.url);
                    return Some(ws);
                }
                Err(e) => {
                    log::warn!("[ChannelTransport] Reconnection failed: {}", e);
                    attempt += 1;
                }
            }
        }
    }

    /// Sleep for `delay` while still serving commands. Returns `false` if
    /// the session asked to close.
    async fn wait_offline(
        &mut self,
        delay: Duration,
        commands: &mut mpsc::UnboundedReceiver<Command>,
    ) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                cmd = commands.recv() => match cmd {
                    // Recorded now, sent by resubscribe once back online.
                    Some(Command::Subscribe { channel, token, reply }) => {
                        self.subscriptions.insert(channel, token);
                        let _ = reply.send(Ok(()));
                    }
                    Some(Command::Unsubscribe { channel, reply }) => {
                        self.subscriptions.remove(&channel);
                        let _ = reply.send(Ok(()));
                    }
                    Some(Command::Close) | None => return false,
                },
            }
        }
    }

    async fn resubscribe(&mut self, ws: &mut WsStream) -> Result<()> {
        let subscriptions: Vec<(String, String)> = self
            .subscriptions
            .iter()
            .map(|(c, t)| (c.clone(), t.clone()))
            .collect();
        for (channel, token) in subscriptions {
            let (_, frame) = self.command(CommandBody::Subscribe { channel, token })?;
            ws.send(frame)
                .await
                .map_err(|e| SyncError::Transport(format!("send failed: {e}")))?;
        }
        Ok(())
    }
}

/// Read frames until the reply to command `id` arrives, answering pings.
async fn wait_for_reply(ws: &mut WsStream, id: u32) -> Result<()> {
    while let Some(msg) = ws.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => return Err(SyncError::Transport(e.to_string())),
        };
        for line in text.as_str().lines().filter(|l| !l.trim().is_empty()) {
            let Ok(reply) = ChannelReply::parse(line) else {
                continue;
            };
            if reply.is_ping() {
                ws.send(Message::Text("{}".into()))
                    .await
                    .map_err(|e| SyncError::Transport(e.to_string()))?;
                continue;
            }
            if reply.id != Some(id) {
                continue;
            }
            return match reply.error {
                Some(err) => Err(SyncError::Transport(format!(
                    "connect rejected ({}): {}",
                    err.code, err.message
                ))),
                None => Ok(()),
            };
        }
    }
    Err(SyncError::Transport("closed during handshake".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_matches_policy() {
        let rc = ReconnectConfig::default();
        let delays: Vec<u64> = (1..=6).map(|a| rc.delay(a).as_secs()).collect();
        assert_eq!(delays, vec![2, 4, 8, 16, 32, 32]);
    }

    #[test]
    fn test_backoff_does_not_overflow() {
        let rc = ReconnectConfig::default();
        assert_eq!(rc.delay(200).as_secs(), 32);
    }

    #[test]
    fn test_exhaustion() {
        let rc = ReconnectConfig::default();
        assert!(!rc.exhausted(10));
        assert!(rc.exhausted(11));

        let infinite = ReconnectConfig {
            max_attempts: 0,
            ..Default::default()
        };
        assert!(!infinite.exhausted(10_000));

        assert!(ReconnectConfig::disabled().exhausted(1));
    }

    #[test]
    fn test_websocket_url_schemes() {
        assert_eq!(
            websocket_url("https://rt.example.com/connection/websocket")
                .unwrap()
                .as_str(),
            "wss://rt.example.com/connection/websocket"
        );
        assert_eq!(
            websocket_url("http://localhost:8000/ws").unwrap().as_str(),
            "ws://localhost:8000/ws"
        );
        assert_eq!(
            websocket_url("wss://rt.example.com/").unwrap().as_str(),
            "wss://rt.example.com/"
        );
        assert!(websocket_url("ftp://rt.example.com").is_err());
    }
}
