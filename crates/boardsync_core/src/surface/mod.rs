//! The editing surface seam.
//!
//! The surface is whatever renders and edits the board. The engine needs
//! three things from it: a full snapshot on demand, a stream of
//! [`ChangeRecord`](crate::ChangeRecord)s, and a way to replace its content
//! with a remote snapshot without that replacement coming back as a local
//! edit. The change stream is handed to the session separately as an
//! `mpsc` receiver; the other two live on [`EditingSurface`].

mod memory;

pub use memory::{MemorySurface, SurfaceEdit};

use crate::state::EditableState;

/// Editing surface operations the engine calls.
pub trait EditingSurface: Send + Sync {
    /// Current full snapshot of the board.
    fn snapshot(&self) -> EditableState;

    /// Replace the board's content with `state`.
    ///
    /// Implementations must not report this replacement as a user edit on
    /// the change stream. Reporting it with
    /// [`ChangeSource::Remote`](crate::ChangeSource) is acceptable; the
    /// observer ignores those.
    fn merge_remote_changes(&self, state: EditableState);
}
