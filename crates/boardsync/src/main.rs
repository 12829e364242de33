//! `boardsync` command-line front end.

mod cli;
mod config;
mod watch;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Command};
use crate::config::Config;

#[tokio::main]
async fn main() {
    // Initialize tracing. Library crates log through `log`, which the
    // subscriber picks up via its tracing-log bridge.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "boardsync=info,boardsync_core=info,boardsync_native=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let code = match cli.command {
        Command::Watch(args) => {
            let config = match Config::from_env(args) {
                Ok(c) => c,
                Err(e) => {
                    error!("Failed to load configuration: {}", e);
                    std::process::exit(2);
                }
            };

            match watch::run(config).await {
                Ok(report) => {
                    info!(
                        "Session ended ({:?}): {:?}{}",
                        report.kind,
                        report.flush,
                        if report.has_pending_change {
                            ", unsent edits remain"
                        } else {
                            ""
                        }
                    );
                    if report.unanswered_persists > 0 {
                        error!(
                            "{} persist(s) never answered, the board may be behind",
                            report.unanswered_persists
                        );
                    }
                    i32::from(report.has_pending_change || report.unanswered_persists > 0)
                }
                Err(e) => {
                    error!("{}", e);
                    1
                }
            }
        }
    };

    // stdin is read on a blocking thread that would keep the runtime alive.
    // Unmount has already waited for in-flight persists.
    std::process::exit(code);
}
