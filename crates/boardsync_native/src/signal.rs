//! Process termination as a [`TerminationSignal`].

use boardsync_core::TerminationSignal;
use tokio::signal;

/// Resolves on Ctrl+C, or SIGTERM on unix.
///
/// If a handler cannot be installed that source is ignored rather than
/// firing, so a missing handler never tears the session down early.
pub fn termination_signal() -> TerminationSignal {
    Box::pin(async {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                log::error!("[Signal] Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                }
                Err(e) => {
                    log::error!("[Signal] Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }

        log::info!("[Signal] Termination signal received");
    })
}
