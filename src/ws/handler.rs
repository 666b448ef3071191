//! Host-side WebSocket upgrade handler for connecting peers

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::app::AppState;
use crate::game::MatchCommand;
use crate::util::rate_limit::PeerRateLimiter;
use crate::ws::protocol::PeerMsg;
use crate::ws::PeerHub;

/// Query parameters for a peer connection
#[derive(Debug, Deserialize)]
pub struct PeerQuery {
    /// The connecting peer's player id; doubles as its peer id
    pub player_id: String,
}

/// `GET /peer/:peer_id?player_id=...`
pub async fn peer_handler(
    ws: WebSocketUpgrade,
    Path(peer_id): Path<String>,
    Query(query): Query<PeerQuery>,
    State(state): State<AppState>,
) -> Response {
    let Some(hub) = state.hub.clone() else {
        return (StatusCode::NOT_FOUND, "Not hosting").into_response();
    };
    if state.room_peer_id.as_deref() != Some(peer_id.as_str()) {
        debug!(requested = %peer_id, "Connection for another room refused");
        return (StatusCode::NOT_FOUND, "Unknown room").into_response();
    }

    let player_id = query.player_id.trim().to_string();
    if player_id.is_empty() {
        return (StatusCode::BAD_REQUEST, "Missing player id").into_response();
    }
    if player_id == state.local_player_id {
        return (StatusCode::CONFLICT, "Player id already in use").into_response();
    }

    let Some(outbound_rx) = hub.register(&player_id) else {
        warn!(peer_id = %player_id, "Duplicate peer connection refused");
        return (StatusCode::CONFLICT, "Player id already connected").into_response();
    };

    info!(peer_id = %player_id, "Peer upgrade accepted");
    let failed_hub = hub.clone();
    let failed_id = player_id.clone();
    let commands = state.game.commands.clone();
    ws.on_failed_upgrade(move |e| {
        warn!(peer_id = %failed_id, error = %e, "Peer upgrade failed");
        failed_hub.unregister(&failed_id);
    })
    .on_upgrade(move |socket| handle_socket(socket, player_id, outbound_rx, hub, commands))
}

/// Handle one upgraded peer socket until it closes
async fn handle_socket(
    socket: WebSocket,
    peer_id: String,
    mut outbound_rx: mpsc::Receiver<String>,
    hub: Arc<PeerHub>,
    commands: mpsc::Sender<MatchCommand>,
) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    hub.mark_open(&peer_id);
    info!(peer_id = %peer_id, "Peer connected");

    let joined = MatchCommand::PeerJoined {
        peer_id: peer_id.clone(),
    };
    if commands.send(joined).await.is_err() {
        warn!(peer_id = %peer_id, "Match task gone, dropping peer");
        hub.unregister(&peer_id);
        return;
    }

    // Writer task: per-peer queue -> WebSocket
    let writer_peer = peer_id.clone();
    let writer_handle = tokio::spawn(async move {
        while let Some(text) = outbound_rx.recv().await {
            if let Err(e) = ws_sink.send(Message::Text(text)).await {
                debug!(peer_id = %writer_peer, error = %e, "Peer send failed");
                break;
            }
        }
    });

    // Reader loop: WebSocket -> match task
    let rate_limiter = PeerRateLimiter::new();
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check() {
                    warn!(peer_id = %peer_id, "Rate limited peer message");
                    continue;
                }
                hub.touch(&peer_id);

                match PeerMsg::decode(&text) {
                    Ok(msg) => {
                        let cmd = MatchCommand::Message {
                            from: peer_id.clone(),
                            msg,
                        };
                        if commands.send(cmd).await.is_err() {
                            debug!(peer_id = %peer_id, "Match task gone");
                            break;
                        }
                    }
                    Err(e) => {
                        debug!(peer_id = %peer_id, error = %e, "Malformed peer message");
                    }
                }
            }
            Ok(Message::Close(_)) => {
                debug!(peer_id = %peer_id, "Peer closed connection");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                debug!(peer_id = %peer_id, error = %e, "Peer socket error");
                break;
            }
        }
    }

    writer_handle.abort();
    hub.unregister(&peer_id);
    let _ = commands
        .send(MatchCommand::PeerLeft {
            peer_id: peer_id.clone(),
        })
        .await;

    info!(peer_id = %peer_id, "Peer disconnected");
}
