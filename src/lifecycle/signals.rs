//! OS signal handling.
//!
//! # Responsibilities
//! - Wait for SIGINT/SIGTERM (Ctrl-C on every platform)
//! - Translate the first signal into `LifecycleCoordinator::stop`
//!
//! # Design Decisions
//! - Runs on its own thread with a current-thread runtime, so it works
//!   while the main thread is blocked inside `open_port`

use std::io;
use std::thread::JoinHandle;

use tokio::runtime::Builder;

use crate::lifecycle::coordinator::LifecycleCoordinator;

/// Spawn a thread that calls `stop` on the first shutdown signal.
pub fn spawn_stop_on_signal(coordinator: LifecycleCoordinator) -> io::Result<JoinHandle<()>> {
    let runtime = Builder::new_current_thread().enable_all().build()?;
    std::thread::Builder::new().name("signals".to_string()).spawn(move || {
        runtime.block_on(async {
            match wait_for_shutdown().await {
                Ok(signal) => {
                    tracing::info!(signal, "Shutdown signal received");
                    coordinator.stop();
                }
                Err(e) => tracing::error!(error = %e, "Failed to install signal handlers"),
            }
        });
    })
}

#[cfg(unix)]
async fn wait_for_shutdown() -> io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.map(|_| "SIGINT"),
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() -> io::Result<&'static str> {
    tokio::signal::ctrl_c().await.map(|_| "ctrl-c")
}
