//! # `boardsync_core`
//!
//! Sync engine for collaborative whiteboards.
//!
//! Keeps a locally edited board consistent with the copy held by the server
//! while other participants edit the same board:
//!
//! - many small local edits are coalesced into few persisted snapshots
//!   ([`observer`], [`scheduler`]);
//! - snapshots published by other participants are merged into the editing
//!   surface unless they are our own echo or change nothing ([`listener`]);
//! - unsent edits are flushed when the session ends or the process is about
//!   to terminate ([`guard`]);
//! - the real-time channel is provisioned from two short-lived tokens
//!   ([`provisioner`]).
//!
//! [`session::BoardSession`] wires all of this into a single task. Network
//! access goes through the traits in [`transport`]; `boardsync_native`
//! implements them for desktop and server hosts.
//!
//! ```ignore
//! use boardsync_core::{BoardSession, MemorySurface, SessionCollaborators, SessionConfig};
//!
//! let surface = Arc::new(MemorySurface::new());
//! let changes = surface.subscribe();
//! let handle = BoardSession::start(
//!     SessionConfig::new("board-1", "user-1"),
//!     SessionCollaborators { surface, persistence, teardown, tokens, connector, events: None },
//!     changes,
//! );
//! // ... edit ...
//! handle.unmount().await?;
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod guard;
pub mod listener;
pub mod observer;
pub mod protocol;
pub mod provisioner;
pub mod scheduler;
pub mod session;
pub mod state;
pub mod store;
pub mod surface;
pub mod sync_types;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transport;

pub use config::SyncTimingConfig;
pub use error::{Result, SyncError};
pub use guard::{DurabilityGuard, FlushOutcome};
pub use listener::{MergeOutcome, RemoteSnapshot, RemoteUpdateListener};
pub use observer::{ChangeRecord, ChangeSource, EditKind, LocalEditObserver, SaveTiming};
pub use protocol::{ChannelEnvelope, PersistRequest, format_board_channel};
pub use provisioner::{ChannelProvisioner, ProvisionState, SessionCredentials};
pub use scheduler::{PersistScheduler, PersistTrigger};
pub use session::{
    BoardSession, SessionCollaborators, SessionConfig, SessionHandle, TeardownKind,
    TeardownReport, TerminationSignal,
};
pub use state::{EditableState, StateDiff};
pub use store::{PendingSave, SnapshotStore};
pub use surface::{EditingSurface, MemorySurface, SurfaceEdit};
pub use sync_types::{ChannelStatus, SyncEvent, SyncEventHandler};
pub use transport::{
    ChannelConnector, ChannelEvent, ChannelSession, PersistenceEndpoint, TeardownTransport,
    TokenEndpoint,
};
