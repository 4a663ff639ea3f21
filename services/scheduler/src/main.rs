//! pollmesh scheduler
//!
//! Places polling jobs on a fixed worker pool, keeps the execution engine's
//! job file in step, and re-packs jobs when workers stop heartbeating.

use std::sync::Arc;

use anyhow::{Context, Result};
use pollmesh_scheduler::{
    api, config,
    registry::gateway_for,
    service::{Scheduler, SchedulerSettings},
    state::{AppState, AuthConfig},
    subscriptions::HttpSubscriptionStore,
};
use pollmesh_store::RedisStore;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = config::Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to POLLMESH_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting pollmesh scheduler");
    info!(
        listen_addr = %config.listen_addr,
        max_workers = config.max_workers,
        max_jobs_per_worker = config.max_jobs_per_worker,
        registry = %config.registry_path.display(),
        lock_fenced = config.lock_fenced,
        "Configuration loaded"
    );
    if !config.lock_fenced {
        warn!("Config lock release is unfenced; set POLLMESH_LOCK_FENCED=true to only release own locks");
    }

    let store = match RedisStore::connect(&config.redis_url).await {
        Ok(store) => store,
        Err(e) => {
            error!(error = %e, "Failed to connect to state store");
            return Err(e.into());
        }
    };

    let engine = gateway_for(&config.engine_reload).context("failed to build engine reload gateway")?;
    let subscriptions = HttpSubscriptionStore::new(
        config.subscription_store_url.clone(),
        config.internal_api_key.clone(),
    )
    .context("failed to build subscription store client")?;

    let scheduler = Scheduler::new(
        &SchedulerSettings::from_config(&config),
        Arc::new(store),
        engine,
        Arc::new(subscriptions),
    );

    if let Err(e) = scheduler.bootstrap().await {
        error!(error = %e, "Failed to reconcile counters with the registry");
        return Err(e.into());
    }

    // Create shutdown channel for graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Start health monitor in background
    let monitor = scheduler.health_monitor();
    let monitor_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            monitor.run(shutdown_rx).await;
        }
    });

    let state = AppState::new(
        scheduler,
        AuthConfig {
            jwt_secret: config.jwt_secret.clone(),
            internal_api_key: config.internal_api_key.clone(),
        },
    );
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    // Spawn the server with graceful shutdown
    let mut server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
    });

    // Wait for shutdown signal (Ctrl+C)
    let mut server_done = false;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = &mut server_handle => {
            server_done = true;
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
        }
    }

    // Signal shutdown to the server and the monitor
    let _ = shutdown_tx.send(true);

    let shutdown_timeout = std::time::Duration::from_secs(10);
    if !server_done && tokio::time::timeout(shutdown_timeout, server_handle).await.is_err() {
        warn!("HTTP server did not drain in time");
    }
    if tokio::time::timeout(shutdown_timeout, monitor_handle).await.is_err() {
        warn!("Health monitor did not shut down in time");
    }

    info!("Scheduler shutdown complete");
    Ok(())
}
