//! Arena peer - combat simulation and host-authoritative peer sync
//!
//! Runs one peer of an arena match:
//! - `host`: authoritative simulation, bot AI, and the WebSocket listener peers dial
//! - `client`: local simulation mirrored from the host over one WebSocket link
//! - `solo`: single-player missions with no transport
//!
//! Every role serves the shell API (`/health`, `/hud`, `/input`, `/weapon`).

mod app;
mod config;
mod game;
mod http;
mod util;
mod ws;

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::app::AppState;
use crate::config::{Config, ConfigError, Role};
use crate::game::{
    ClientRole, GameMatch, HostRole, LifecycleEvent, MatchHandle, MatchState, NetworkRole,
};
use crate::http::build_router;
use crate::util::time::init_peer_time;
use crate::ws::client::{peer_url, run_client_link, RetryPolicy};
use crate::ws::transport::{HostLink, Offline};
use crate::ws::{room_peer_id, PeerHub, Transport};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    init_tracing(&config.log_level);
    init_peer_time();

    let boot = config.bootstrap();
    info!(
        role = ?boot.role,
        player_id = %boot.player_id,
        team = %boot.team,
        mode = config.mode.label(),
        map = %config.map_id,
        "Starting arena peer"
    );

    let state = MatchState::new(config.match_config(), boot.player_setup(), boot.seed);
    let room_id = match boot.role {
        Role::Solo => None,
        Role::Host | Role::Client => {
            let room_code = boot.room_code.as_deref().ok_or(ConfigError::Missing("ROOM_CODE"))?;
            Some(room_peer_id(room_code))
        }
    };

    let mut hub = None;
    let mut link = None;
    let (role, transport, peer_id): (Box<dyn NetworkRole>, Arc<dyn Transport>, String) =
        match (boot.role, room_id.as_deref()) {
            (Role::Host, Some(room_id)) => {
                let peer_hub = Arc::new(PeerHub::new());
                hub = Some(peer_hub.clone());
                (Box::new(HostRole::new(0)), peer_hub, room_id.to_string())
            }
            (Role::Client, Some(room_id)) => {
                let host_link = Arc::new(HostLink::new(room_id));
                link = Some(host_link.clone());
                (Box::new(ClientRole::new()), host_link, boot.player_id.clone())
            }
            _ => (Box::new(HostRole::new(0)), Arc::new(Offline), boot.player_id.clone()),
        };

    let (game, handle) =
        GameMatch::new(state, role, transport.clone(), peer_id, boot.audio_enabled);
    spawn_lifecycle_logger(&handle);

    if let (Some(link), Some(room_id)) = (link, room_id.as_deref()) {
        let host_url = config.host_url.as_deref().ok_or(ConfigError::Missing("HOST_URL"))?;
        let url = peer_url(host_url, room_id, &boot.player_id);
        tokio::spawn(run_client_link(url, link, handle.clone(), RetryPolicy::default()));
    }

    let hosting = hub.is_some();
    let app_state = AppState::new(
        config.clone(),
        transport,
        hub,
        handle,
        room_id.clone(),
        boot.player_id.clone(),
    );
    let router = build_router(app_state);

    let listener = TcpListener::bind(config.server_addr).await?;
    info!("Shell API listening on {}", config.server_addr);
    info!("Health check: http://{}/health", config.server_addr);
    if let (true, Some(room_id)) = (hosting, room_id.as_deref()) {
        info!("Peer endpoint: ws://{}/peer/{}", config.server_addr, room_id);
    }

    let match_task = tokio::spawn(game.run());
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = shutdown_signal() => {}
                _ = match_task => info!("Match finished, closing listener"),
            }
        })
        .await?;

    info!("Peer shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Log lifecycle events for the shell
fn spawn_lifecycle_logger(handle: &MatchHandle) {
    let mut events = handle.subscribe_lifecycle();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match &event {
                LifecycleEvent::Ready { peer_id, audio_enabled } => {
                    info!(peer_id = %peer_id, audio_enabled, "Lifecycle: ready");
                }
                LifecycleEvent::MatchComplete(report) => {
                    info!(
                        winner = ?report.result.winner,
                        success = report.result.success,
                        reason = %report.result.reason,
                        kills = report.kills,
                        points = report.points,
                        "Lifecycle: match complete"
                    );
                }
                LifecycleEvent::ConnectionStatus { status } => {
                    info!(status = %status, "Lifecycle: connection status");
                }
            }
        }
    });
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
