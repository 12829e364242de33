//! Wire contracts: the persistence payload, the per-board channel envelope,
//! and the JSON frames spoken on the real-time connection.
//!
//! The real-time server speaks a small JSON command protocol over WebSocket
//! text frames. Clients send numbered commands; the server answers with a
//! reply carrying the same `id`, and delivers publications as `push` frames
//! with no `id`. An empty object `{}` is a ping and must be answered with `{}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SyncError};
use crate::state::EditableState;

/// Prefix of every board channel name.
pub const BOARD_CHANNEL_PREFIX: &str = "whiteboard:";

/// Name of the real-time topic carrying snapshots for one board.
pub fn format_board_channel(board_id: &str) -> String {
    format!("{BOARD_CHANNEL_PREFIX}{board_id}")
}

/// Body sent to the persistence endpoint, on both the normal and the
/// teardown path. The server must tolerate receiving it twice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistRequest {
    /// Board id.
    pub id: String,
    /// Full snapshot to store.
    pub snapshot: EditableState,
}

impl PersistRequest {
    /// Build a request for `board_id`.
    pub fn new(board_id: impl Into<String>, snapshot: EditableState) -> Self {
        Self {
            id: board_id.into(),
            snapshot,
        }
    }
}

/// A message published on a board channel.
///
/// ```json
/// { "user": "<author id>", "payload": { "dataString": "<JSON snapshot>" } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelEnvelope {
    /// Id of the participant whose save produced this snapshot.
    pub user: String,
    /// The snapshot, as JSON text.
    pub payload: EnvelopePayload,
}

/// Payload of a [`ChannelEnvelope`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopePayload {
    /// JSON-encoded [`EditableState`].
    #[serde(rename = "dataString")]
    pub data_string: String,
}

impl ChannelEnvelope {
    /// Wrap a snapshot for publication.
    pub fn new(user: impl Into<String>, snapshot: &EditableState) -> Result<Self> {
        Ok(Self {
            user: user.into(),
            payload: EnvelopePayload {
                data_string: snapshot.to_json_string()?,
            },
        })
    }

    /// Decode the envelope out of a publication's `data` field.
    pub fn from_publication(data: Value) -> Result<Self> {
        serde_json::from_value(data).map_err(|e| SyncError::MalformedMessage(e.to_string()))
    }
}

/// A numbered client command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelCommand {
    /// Correlation id echoed by the server's reply.
    pub id: u32,
    /// The command itself.
    #[serde(flatten)]
    pub body: CommandBody,
}

/// Commands a client can send.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandBody {
    /// Authenticate the connection with a user-scoped token.
    Connect {
        /// Connection token.
        token: String,
    },
    /// Join a channel with a channel-scoped token.
    Subscribe {
        /// Channel name.
        channel: String,
        /// Subscription token.
        token: String,
    },
    /// Leave a channel.
    Unsubscribe {
        /// Channel name.
        channel: String,
    },
}

impl ChannelCommand {
    /// Encode as a text frame.
    pub fn to_frame(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A frame received from the real-time server.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChannelReply {
    /// Set on replies to commands.
    #[serde(default)]
    pub id: Option<u32>,
    /// Set when the command failed.
    #[serde(default)]
    pub error: Option<ReplyError>,
    /// Set on asynchronous deliveries.
    #[serde(default)]
    pub push: Option<Push>,
    /// Result of a `connect` command.
    #[serde(default)]
    pub connect: Option<Value>,
    /// Result of a `subscribe` command.
    #[serde(default)]
    pub subscribe: Option<Value>,
}

impl ChannelReply {
    /// Decode a text frame.
    pub fn parse(frame: &str) -> Result<Self> {
        serde_json::from_str(frame).map_err(|e| SyncError::MalformedMessage(e.to_string()))
    }

    /// Whether this is the server's keepalive ping.
    pub fn is_ping(&self) -> bool {
        *self == Self::default()
    }

    /// The publication data, if this is a push for `channel`.
    pub fn publication_for(self, channel: &str) -> Option<Value> {
        let push = self.push?;
        if push.channel != channel {
            return None;
        }
        push.publication.map(|p| p.data)
    }
}

/// Error reported in a reply.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReplyError {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
}

/// An asynchronous delivery.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Push {
    /// Channel the push belongs to.
    pub channel: String,
    /// Publication, absent for other push kinds (join/leave, unsubscribe).
    #[serde(rename = "pub", default)]
    pub publication: Option<Publication>,
}

/// A message published on a channel.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Publication {
    /// Application payload.
    pub data: Value,
}
