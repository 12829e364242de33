//! Events the session reports to its host.
//!
//! Nothing here is needed for the engine to work. Hosts that want to show a
//! connection indicator or log persists pass a [`SyncEventHandler`] to the
//! session; hosts that don't, pass `None`.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::provisioner::ProvisionState;
use crate::scheduler::PersistTrigger;

/// Events emitted by a board session.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncEvent {
    /// The channel provisioner moved to a new state.
    ProvisionChanged {
        /// The new state.
        state: ProvisionState,
    },
    /// The real-time connection went up or down.
    StatusChanged {
        /// The new status.
        status: ChannelStatus,
    },
    /// A snapshot was accepted by the persistence endpoint.
    Persisted {
        /// What caused the persist.
        trigger: PersistTrigger,
        /// When the persist completed.
        at: DateTime<Utc>,
        /// Number of records in the persisted snapshot.
        records: usize,
    },
    /// A persist failed. The snapshot will be re-sent by a later cycle.
    PersistFailed {
        /// What caused the persist.
        trigger: PersistTrigger,
        /// Error message.
        message: String,
    },
    /// A remote snapshot replaced the board content.
    RemoteApplied {
        /// Author of the snapshot.
        author: String,
        /// Number of records that differed.
        changed: usize,
    },
    /// Something went wrong that the engine absorbed.
    Error {
        /// Error message.
        message: String,
    },
}

/// State of the real-time connection as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ChannelStatus {
    /// Connected and receiving.
    Connected,
    /// Connection lost; the transport may bring it back.
    Disconnected,
}

/// Trait for receiving sync events.
///
/// Called from the session task. Implementations must not block.
pub trait SyncEventHandler: Send + Sync {
    /// Called when a sync event occurs.
    fn on_event(&self, event: SyncEvent);
}

impl<F> SyncEventHandler for F
where
    F: Fn(SyncEvent) + Send + Sync,
{
    fn on_event(&self, event: SyncEvent) {
        self(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = SyncEvent::StatusChanged {
            status: ChannelStatus::Disconnected,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "statusChanged", "status": "disconnected"})
        );
    }

    #[test]
    fn test_persist_failed_serialization() {
        let event = SyncEvent::PersistFailed {
            trigger: PersistTrigger::Sweep,
            message: "HTTP 503".into(),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "persistFailed", "trigger": "sweep", "message": "HTTP 503"})
        );
    }

    #[test]
    fn test_closures_are_handlers() {
        let seen = std::sync::Mutex::new(Vec::new());
        let handler = |event: SyncEvent| seen.lock().unwrap().push(format!("{event:?}"));
        handler.on_event(SyncEvent::Error {
            message: "boom".into(),
        });
        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}
