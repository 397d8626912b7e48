//! Agent mode: serve one service type's Agent API.
//!
//! In this mode, the daemon:
//! 1. Loads `agent.toml` and opens the shared object store
//! 2. Publishes its descriptor into the registry
//! 3. Starts the embedded trigger dispatcher for its own jobs
//! 4. Serves the Agent API until CTRL+C

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info, warn};

use coldbench_agent::{Agent, AgentConfig};
use coldbench_api::{AgentApiState, build_router};
use coldbench_manager::ManagerConfig;
use coldbench_trigger::{DispatchConfig, StoreScheduler, TriggerDispatcher};

/// Run the Agent server.
pub async fn run_agent(config_path: &Path, port: Option<u16>) -> anyhow::Result<()> {
    let config = AgentConfig::from_file(config_path)?;
    let port = port.unwrap_or(config.listen);
    info!(service_type = %config.service_type, "coldbench agent starting");

    // ── Store ────────────────────────────────────────────────────
    let store = config
        .store
        .open()
        .with_context(|| format!("opening store at {}", config.store.path.display()))?;
    info!(path = ?config.store.path, "object store opened");

    // ── Agent ────────────────────────────────────────────────────
    let agent = Agent::from_config(&config, store.clone())?;
    let token = config.resolve_token();
    if token.is_none() {
        warn!("no auth token configured, API is unauthenticated");
    }

    // ── Registry ─────────────────────────────────────────────────
    let descriptor = agent.descriptor(&config.public_url);
    descriptor.validate()?;
    store.put_descriptor(&descriptor)?;
    info!(endpoint = %descriptor.endpoint, "descriptor published");

    // ── Shutdown signal ──────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Embedded dispatcher ──────────────────────────────────────
    let dispatcher_handle = if config.trigger.embedded_dispatcher {
        let dispatcher = TriggerDispatcher::new(
            StoreScheduler::new(store.clone()),
            DispatchConfig {
                poll_interval: Duration::from_secs(config.trigger.poll_interval_secs),
                owner: Some(config.service_type.clone()),
                auth_token: token.clone(),
                ..DispatchConfig::default()
            },
        )?;
        let rx = shutdown_rx.clone();
        Some(tokio::spawn(async move { dispatcher.run(rx).await }))
    } else {
        info!("embedded dispatcher disabled");
        None
    };

    // ── HTTP API ─────────────────────────────────────────────────
    let app = build_router(AgentApiState::new(agent, token));
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "agent API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    if let Some(handle) = dispatcher_handle {
        let _ = handle.await;
    }

    info!("agent stopped");
    Ok(())
}

/// Run the standalone trigger dispatcher over the Manager's store.
pub async fn run_dispatch(config_path: &Path, interval: u64, once: bool) -> anyhow::Result<()> {
    let config = ManagerConfig::from_file(config_path)?;
    let store = config.store.open()?;
    let dispatcher = TriggerDispatcher::new(
        StoreScheduler::new(store),
        DispatchConfig {
            poll_interval: Duration::from_secs(interval.max(1)),
            auth_token: config.resolve_token(),
            ..DispatchConfig::default()
        },
    )?;

    if once {
        let fired = dispatcher.tick(coldbench_core::epoch_secs()).await?;
        info!(fired, "dispatch pass finished");
        println!("{fired}");
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { dispatcher.run(shutdown_rx).await });
    shutdown_signal().await;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    let _ = handle.await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for CTRL+C");
        std::future::pending::<()>().await;
    }
}
