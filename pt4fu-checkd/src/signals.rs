//! Signal handling for the scheduler's main loop.
//!
//! Waits for SIGINT or SIGTERM via `tokio::signal::unix`. The scheduler
//! holds no resource that needs explicit cleanup on exit — the advisory
//! lock it briefly probes is never held across a sweep, and breadcrumb
//! files are read-only from its perspective — so there is no cleanup step
//! here beyond returning.

use tracing::info;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Wait for SIGINT or SIGTERM.
pub async fn wait_for_signal() {
    #[cfg(unix)]
    {
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to register SIGINT handler");
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");

        tokio::select! {
            _ = sigint.recv() => {
                info!("received SIGINT");
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.expect("failed to listen for Ctrl+C");
        info!("received Ctrl+C");
    }
}
