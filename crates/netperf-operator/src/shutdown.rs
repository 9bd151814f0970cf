//! Signal handling for graceful shutdown

use tokio::signal;
use tracing::{error, info};

/// Resolve on SIGINT or SIGTERM.
///
/// A handler that cannot be registered is logged and never fires, so the
/// other signal still works.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => "SIGINT",
            Err(e) => {
                error!("Failed to register ctrl-c handler: {}", e);
                std::future::pending().await
            }
        }
    };

    let term = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                "SIGTERM"
            }
            Err(e) => {
                error!("Failed to register SIGTERM handler: {}", e);
                std::future::pending().await
            }
        }
    };

    let received = tokio::select! {
        s = ctrl_c => s,
        s = term => s,
    };
    info!(signal = received, "shutdown signal received, draining in-flight events");
}
