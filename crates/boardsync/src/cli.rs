//! Command-line arguments.

use clap::{Args, Parser, Subcommand};

/// Collaborative whiteboard sync from the command line.
#[derive(Debug, Parser)]
#[command(name = "boardsync", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Edit a board from stdin and print collaborators' changes
    Watch(WatchArgs),
}

/// Flags for `watch`. Each one overrides its `BOARDSYNC_*` variable.
#[derive(Debug, Default, Args)]
pub struct WatchArgs {
    /// Board to open
    #[arg(short, long)]
    pub board: Option<String>,

    /// Id of the local user (own echoes are ignored)
    #[arg(short, long)]
    pub user: Option<String>,

    /// REST API base URL
    #[arg(long)]
    pub api_url: Option<String>,

    /// Real-time WebSocket URL
    #[arg(long)]
    pub realtime_url: Option<String>,

    /// Bearer token for API calls
    #[arg(long)]
    pub auth_token: Option<String>,

    /// JSON file with the board's initial content
    #[arg(long)]
    pub initial: Option<std::path::PathBuf>,

    /// Normal debounce in milliseconds
    #[arg(long)]
    pub normal_delay_ms: Option<u64>,

    /// Sweep interval in seconds
    #[arg(long)]
    pub sweep_secs: Option<u64>,

    /// Give up reconnecting after this many attempts (0 = never)
    #[arg(long)]
    pub reconnect_attempts: Option<u32>,
}
