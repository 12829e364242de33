//! Native network adapters for [`boardsync_core`].
//!
//! | Concern               | Type                  | Backed by           |
//! |-----------------------|-----------------------|---------------------|
//! | Tokens and persists   | [`HttpApi`]           | `reqwest`           |
//! | Teardown delivery     | [`UreqTeardown`]      | `ureq` on a thread  |
//! | Real-time channel     | [`RealtimeConnector`] | `tokio-tungstenite` |
//! | Process termination   | [`termination_signal`]| `tokio::signal`     |
//!
//! Wire them into a [`boardsync_core::SessionCollaborators`] and start a
//! [`boardsync_core::BoardSession`].

#![warn(missing_docs)]

pub mod channel;
pub mod http;
pub mod signal;
pub mod teardown;

pub use channel::{RealtimeConnector, RealtimeSession, ReconnectConfig, websocket_url};
pub use http::{HttpApi, parse_base_url};
pub use signal::termination_signal;
pub use teardown::UreqTeardown;
