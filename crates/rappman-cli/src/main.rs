//! `rappman` – the robot app manager daemon.
//!
//! Wires the whole stack together:
//!
//! 1. Loads `~/.rappman/config.toml` (with `RAPPMAN_*` env overrides).
//! 2. Loads the rapp catalogs into the registry; a broken catalog is fatal.
//! 3. Builds the lifecycle manager, the hub presence controller, the watch
//!    loop, and the remote control channel, and runs them until SIGINT or
//!    SIGTERM.
//! 4. Optionally auto-starts a configured rapp.
//! 5. Stops the running rapp gracefully on shutdown.

mod config;

use std::process::ExitCode;
use std::sync::Arc;

use rappman_core::{AppManager, AuthGate, ProcessLauncher, RappRegistry, TokioLauncher, WhitelistPolicy};
use rappman_gateway::{HubClient, PresenceController, WatchLoop, WsHubClient};
use rappman_remote::RemoteControlServer;
use rappman_types::{CallerContext, ControlError, RobotIdentity};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let cfg = match config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "configuration is unusable");
            return ExitCode::FAILURE;
        }
    };

    let registry = match RappRegistry::load(&cfg.rapp_catalogs, &cfg.available_capabilities) {
        Ok(registry) => Arc::new(registry),
        Err(e) => {
            error!(error = %e, "rapp catalog load failed");
            return ExitCode::FAILURE;
        }
    };
    if registry.is_empty() {
        warn!("no rapps installed, the manager will only answer status requests");
    }

    let identity = RobotIdentity::new(&cfg.robot_name, cfg.unique_suffix);
    info!(robot = %identity, "robot identity established");

    let gate = Arc::new(AuthGate::new(WhitelistPolicy::new(
        cfg.hub_whitelist.clone(),
        cfg.local_only,
    )));
    let launcher: Arc<dyn ProcessLauncher> = Arc::new(TokioLauncher::new());
    let manager = Arc::new(
        AppManager::new(registry, Arc::clone(&gate), launcher).with_stop_grace(cfg.stop_grace()),
    );

    let hub: Arc<dyn HubClient> = Arc::new(
        WsHubClient::new(cfg.hub_url.clone()).with_connect_timeout(cfg.connect_timeout()),
    );
    let presence = Arc::new(PresenceController::new(hub, Arc::clone(&gate), identity.clone()));

    let sync_task = tokio::spawn(
        Arc::clone(&presence).run_lifecycle_sync(manager.subscribe()),
    );
    let watch_task = tokio::spawn(
        WatchLoop::new(Arc::clone(&manager), Arc::clone(&presence))
            .with_period(cfg.watch_period())
            .run(),
    );

    let server = RemoteControlServer::new(Arc::clone(&manager), identity.effective_name())
        .with_port(cfg.remote_port);
    let server_task = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!(error = %e, "remote control channel failed");
        }
    });

    if let Some(rapp) = &cfg.auto_start_rapp {
        match manager.start(rapp, &CallerContext::Local).await {
            Ok(()) => info!(rapp = %rapp, "auto-started configured rapp"),
            Err(e) => warn!(rapp = %rapp, error = %e, "auto-start failed"),
        }
    }

    wait_for_shutdown_signal().await;
    info!("shutdown signal received");

    match manager.stop(&CallerContext::Local).await {
        Ok(()) | Err(ControlError::NotRunning) => {}
        Err(e) => warn!(error = %e, "stop on shutdown failed"),
    }

    server_task.abort();
    watch_task.abort();
    sync_task.abort();
    info!("app manager stopped");
    ExitCode::SUCCESS
}

/// Initialise tracing-subscriber using `RUST_LOG` (defaults to "info").
/// Set `RAPPMAN_LOG_FORMAT=json` to emit newline-delimited JSON logs
/// suitable for log aggregators.
fn init_tracing() {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    if std::env::var("RAPPMAN_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .compact()
            .init();
    }
}

/// Resolve on SIGINT (Ctrl-C) or, on Unix, SIGTERM.
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable, falling back to Ctrl-C only");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
