//! snaplog-daemon: background half of the SnapLog desktop utility
//!
//! Startup order:
//! - take the per-user singleton lock (a second launch notifies and exits 0)
//! - register the configured global hotkey and start its listener
//! - serve the UI over a Unix socket (status, reconfigure, fire events)
//!
//! Teardown runs in reverse and always ends by releasing the lock.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use snaplog_daemon::config::{Config, Settings};
use snaplog_daemon::events::DaemonEvent;
use snaplog_daemon::hotkey::{self, OnFire};
#[cfg(unix)]
use snaplog_daemon::ipc::Server;
use snaplog_daemon::lifecycle::{self, LifecycleController, LifecycleError, ShutdownSignal};
use snaplog_daemon::lock::LockError;
use snaplog_daemon::notify;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        "snaplog-daemon starting"
    );

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(config_dir = %config.config_dir.display(), "configuration loaded");

    let settings = Settings::load(&config.settings_path);
    let binding = config.startup_binding(&settings);

    // Controller -> IPC subscribers and the event logger
    let (event_tx, _) = broadcast::channel::<DaemonEvent>(64);

    // The UI learns about presses through `hotkey_fired` events
    let on_fire: OnFire = Arc::new(|| debug!("hotkey pressed"));

    let mut controller =
        LifecycleController::new(hotkey::native_backend(), &config.lock_path, on_fire, event_tx.clone());

    match controller.start(binding) {
        Ok(()) => {}
        Err(LifecycleError::Lock(LockError::AlreadyRunning { pid })) => {
            info!(?pid, "another instance is running, exiting");
            notify::show_already_running();
            return Ok(());
        }
        Err(e) => return Err(e).context("startup failed"),
    }

    let shutdown = ShutdownSignal::new();
    let (handle, worker) = lifecycle::spawn(controller).context("failed to start lifecycle worker")?;

    #[cfg(unix)]
    let server = match Server::new(
        &config.socket_path,
        handle.clone(),
        event_tx.clone(),
        config.settings_path.clone(),
        shutdown.clone(),
    ) {
        Ok(server) => Some(server),
        Err(e) => {
            warn!(?e, "IPC unavailable, continuing without it");
            None
        }
    };
    #[cfg(not(unix))]
    let server: Option<()> = None;

    let mut event_rx = event_tx.subscribe();

    info!("daemon initialized, entering main loop");

    tokio::select! {
        // Run the IPC server (accepts client connections)
        result = run_ipc(&server) => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // Log daemon events
        _ = async {
            loop {
                match event_rx.recv().await {
                    Ok(event) => info!(%event, "daemon event"),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "event logger lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        } => {
            info!("event stream closed");
        }

        // Wait for shutdown signal
        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    // Cleanup
    info!("shutting down...");

    stop_ipc(&server).await;

    if let Err(e) = handle.shutdown().await {
        warn!(error = %e, "lifecycle worker already stopped");
    }
    drop(handle);

    match tokio::task::spawn_blocking(move || worker.join()).await {
        Ok(Ok(())) => {}
        Ok(Err(_)) => warn!("lifecycle worker panicked"),
        Err(e) => warn!(error = %e, "failed to join lifecycle worker"),
    }

    info!("snaplog-daemon stopped");

    Ok(())
}

#[cfg(unix)]
async fn run_ipc(server: &Option<Server>) -> Result<()> {
    match server {
        Some(server) => server.run().await,
        None => std::future::pending().await,
    }
}

#[cfg(not(unix))]
async fn run_ipc(_server: &Option<()>) -> Result<()> {
    std::future::pending().await
}

#[cfg(unix)]
async fn stop_ipc(server: &Option<Server>) {
    if let Some(server) = server {
        server.shutdown().await;
    }
}

#[cfg(not(unix))]
async fn stop_ipc(_server: &Option<()>) {}
