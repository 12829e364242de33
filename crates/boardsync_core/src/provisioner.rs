//! Credential exchange and channel subscription.
//!
//! ```text
//!  Uninitialized ──► FetchingCredentials ──► Connecting ──► Subscribed ──► TornDown
//!                           │                    │
//!                           └────────► Failed ◄──┘
//! ```
//!
//! Both tokens are fetched concurrently. Only when both are in hand does the
//! provisioner connect and subscribe. Once subscribed, it takes no further
//! action on connection changes: the transport reconnects on its own and the
//! state stays `Subscribed`.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

use crate::error::Result;
use crate::protocol::format_board_channel;
use crate::sync_types::{SyncEvent, SyncEventHandler};
use crate::transport::{ChannelConnector, ChannelEvent, ChannelSession, TokenEndpoint};

/// Provisioning state of one session's channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum ProvisionState {
    /// Nothing started yet.
    Uninitialized,
    /// Waiting on the token endpoints.
    FetchingCredentials,
    /// Connecting and subscribing.
    Connecting,
    /// Subscribed to the board channel.
    Subscribed,
    /// Provisioning gave up. Editing and persistence are unaffected.
    Failed {
        /// Why provisioning failed.
        reason: String,
    },
    /// The session released the channel.
    TornDown,
}

/// Short-lived tokens for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCredentials {
    /// User-scoped token for the connection.
    pub connection_token: String,
    /// Board-scoped token for the subscription.
    pub subscription_token: String,
}

/// Fetch both tokens concurrently.
pub async fn fetch_credentials(
    tokens: &dyn TokenEndpoint,
    board_id: &str,
) -> Result<SessionCredentials> {
    let (connection, subscription) =
        tokio::join!(tokens.connection_token(), tokens.subscription_token(board_id));
    Ok(SessionCredentials {
        connection_token: connection?,
        subscription_token: subscription?,
    })
}

/// A live subscription to a board channel.
pub struct SubscribedChannel {
    channel: String,
    session: Box<dyn ChannelSession>,
}

impl SubscribedChannel {
    /// Name of the subscribed channel.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Wait for the next event from the transport.
    pub async fn next_event(&mut self) -> Option<ChannelEvent> {
        self.session.next_event().await
    }

    /// Unsubscribe and close the connection.
    pub async fn release(mut self) {
        if let Err(e) = self.session.unsubscribe(&self.channel).await {
            log::warn!("[ChannelProvisioner] Unsubscribe from {} failed: {}", self.channel, e);
        }
        if let Err(e) = self.session.close().await {
            log::debug!("[ChannelProvisioner] Close failed: {}", e);
        }
    }
}

/// Provisions the real-time channel for one board.
pub struct ChannelProvisioner {
    board_id: String,
    tokens: Arc<dyn TokenEndpoint>,
    connector: Arc<dyn ChannelConnector>,
    events: Option<Arc<dyn SyncEventHandler>>,
    state: watch::Sender<ProvisionState>,
}

impl ChannelProvisioner {
    /// Create a provisioner in the `Uninitialized` state.
    pub fn new(
        board_id: impl Into<String>,
        tokens: Arc<dyn TokenEndpoint>,
        connector: Arc<dyn ChannelConnector>,
    ) -> Self {
        let (state, _) = watch::channel(ProvisionState::Uninitialized);
        Self {
            board_id: board_id.into(),
            tokens,
            connector,
            events: None,
            state,
        }
    }

    /// Report state transitions to `events` (builder pattern).
    pub fn with_events(mut self, events: Option<Arc<dyn SyncEventHandler>>) -> Self {
        self.events = events;
        self
    }

    /// Current state.
    pub fn state(&self) -> ProvisionState {
        self.state.borrow().clone()
    }

    /// Watch state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ProvisionState> {
        self.state.subscribe()
    }

    fn transition(&self, next: ProvisionState) {
        log::debug!(
            "[ChannelProvisioner] {:?} -> {:?}",
            &*self.state.borrow(),
            next
        );
        self.state.send_replace(next.clone());
        if let Some(events) = &self.events {
            events.on_event(SyncEvent::ProvisionChanged { state: next });
        }
    }

    /// Fetch credentials, connect and subscribe to the board channel.
    ///
    /// On failure the state becomes `Failed` and the error is returned; the
    /// caller decides whether to log it and carry on.
    pub async fn provision(&self) -> Result<SubscribedChannel> {
        match self.try_provision().await {
            Ok(channel) => {
                log::info!("[ChannelProvisioner] Subscribed to {}", channel.channel);
                self.transition(ProvisionState::Subscribed);
                Ok(channel)
            }
            Err(e) => {
                log::error!("[ChannelProvisioner] Provisioning failed: {}", e);
                self.transition(ProvisionState::Failed {
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn try_provision(&self) -> Result<SubscribedChannel> {
        self.transition(ProvisionState::FetchingCredentials);
        let credentials = fetch_credentials(self.tokens.as_ref(), &self.board_id).await?;

        self.transition(ProvisionState::Connecting);
        let mut session = self.connector.connect(&credentials.connection_token).await?;
        let channel = format_board_channel(&self.board_id);
        if let Err(e) = session
            .subscribe(&channel, &credentials.subscription_token)
            .await
        {
            let _ = session.close().await;
            return Err(e);
        }

        Ok(SubscribedChannel { channel, session })
    }

    /// Mark the channel as released.
    pub fn mark_torn_down(&self) {
        self.transition(ProvisionState::TornDown);
    }
}
