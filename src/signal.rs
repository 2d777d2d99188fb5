//! Process signals, turned into a [`CancellationToken`] the orchestrator watches.

use std::future::pending;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
async fn interrupt() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("interrupt received"),
        Err(e) => {
            warn!("cannot watch Ctrl-C: {e}");
            pending::<()>().await;
        }
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            term.recv().await;
            info!("terminate received");
        }
        Err(e) => {
            warn!("cannot watch SIGTERM: {e}");
            pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    pending::<()>().await;
}

/// Resolves on the first of Ctrl-C or SIGTERM.
pub async fn shutdown_signal() {
    tokio::select! {
        _ = interrupt() => {}
        _ = terminate() => {}
    }
}

/// Cancel `token` on the first shutdown signal. Must run inside a tokio runtime.
pub fn spawn_watcher(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown_signal() => token.cancel(),
            _ = token.cancelled() => {}
        }
    })
}
