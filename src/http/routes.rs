//! HTTP route definitions: the shell API on every peer, the peer listener on the host

use axum::{
    extract::State,
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::debug;

use crate::app::AppState;
use crate::game::weapons::WeaponKind;
use crate::game::{HudSnapshot, MatchCommand, PlayerInput};
use crate::util::time::uptime_secs;
use crate::ws::handler::peer_handler;
use crate::ws::transport::Connection;

/// Build the router for this peer
pub fn build_router(state: AppState) -> Router {
    let cors = if state.config.client_origin.trim() == "*" {
        CorsLayer::new().allow_origin(Any)
    } else {
        // Multiple origins, comma separated
        let allowed_origins: Vec<HeaderValue> = state
            .config
            .client_origin
            .split(',')
            .filter_map(|s| s.trim().parse::<HeaderValue>().ok())
            .collect();
        CorsLayer::new().allow_origin(allowed_origins)
    };
    let cors = cors
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    let mut router = Router::new()
        .route("/health", get(health_handler))
        .route("/hud", get(hud_handler))
        .route("/input", post(input_handler))
        .route("/weapon", post(weapon_handler));
    if state.hub.is_some() {
        router = router.route("/peer/:peer_id", get(peer_handler));
    }

    router
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    role: &'static str,
    room_peer_id: Option<String>,
    uptime_secs: u64,
    open_peers: usize,
    connections: Vec<Connection>,
    tick: u64,
    match_over: bool,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let (tick, match_over) = {
        let hud = state.game.hud.borrow();
        (hud.tick, hud.match_over)
    };

    Json(HealthResponse {
        status: "ok",
        role: state.config.role.label(),
        room_peer_id: state.room_peer_id.clone(),
        uptime_secs: uptime_secs(),
        open_peers: state.transport.open_count(),
        connections: state.transport.connections(),
        tick,
        match_over,
    })
}

/// Latest HUD snapshot, for shells that poll over HTTP
async fn hud_handler(State(state): State<AppState>) -> Json<HudSnapshot> {
    Json(state.game.hud())
}

/// Replace the input the next tick reads
async fn input_handler(
    State(state): State<AppState>,
    Json(input): Json<PlayerInput>,
) -> StatusCode {
    state.game.set_input(input);
    StatusCode::NO_CONTENT
}

#[derive(Debug, Deserialize)]
struct SwapRequest {
    weapon: String,
}

/// Queue a weapon swap for the local player
async fn weapon_handler(State(state): State<AppState>, Json(req): Json<SwapRequest>) -> Response {
    if let Err(e) = req.weapon.parse::<WeaponKind>() {
        return (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()).into_response();
    }

    let cmd = MatchCommand::SwapWeapon { key: req.weapon };
    match state.game.commands.send(cmd).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(_) => {
            debug!("Swap requested after the match task stopped");
            (StatusCode::SERVICE_UNAVAILABLE, "Match is not running").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::game::{LifecycleEvent, MatchHandle};
    use crate::ws::transport::Offline;
    use crate::ws::{PeerHub, Transport};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::sync::Arc;
    use tokio::sync::{broadcast, mpsc, watch};
    use tower::ServiceExt;

    fn handle() -> (MatchHandle, mpsc::Receiver<MatchCommand>) {
        let (commands, rx) = mpsc::channel(8);
        let (input, _) = watch::channel(PlayerInput::default());
        let (_hud_tx, hud) = watch::channel(HudSnapshot::default());
        let (lifecycle, _) = broadcast::channel::<LifecycleEvent>(4);
        let handle = MatchHandle {
            commands,
            input: Arc::new(input),
            hud,
            lifecycle,
        };
        (handle, rx)
    }

    fn host_app(handle: MatchHandle) -> Router {
        let config = Config::from_lookup(|var| match var {
            "ROLE" => Some("host".into()),
            "ROOM_CODE" => Some("xk42".into()),
            _ => None,
        })
        .unwrap();
        let hub = Arc::new(PeerHub::new());
        let _queue = hub.register("peer-a");
        build_router(AppState::new(
            config,
            hub.clone() as Arc<dyn Transport>,
            Some(hub),
            handle,
            Some("arena-xk42".into()),
            "host-1".into(),
        ))
    }

    fn solo_app(handle: MatchHandle) -> Router {
        let config = Config::from_lookup(|_| None).unwrap();
        build_router(AppState::new(config, Arc::new(Offline), None, handle, None, "me".into()))
    }

    fn json_post(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_room_and_connections() {
        let (handle, _rx) = handle();
        let response = host_app(handle)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["role"], "host");
        assert_eq!(json["room_peer_id"], "arena-xk42");
        assert_eq!(json["connections"][0]["peer_id"], "peer-a");
        assert_eq!(json["connections"][0]["state"], "pending");
        assert_eq!(json["open_peers"], 0);
        assert_eq!(json["match_over"], false);
    }

    #[tokio::test]
    async fn hud_is_served_as_json() {
        let (handle, _rx) = handle();
        let response = solo_app(handle)
            .oneshot(Request::builder().uri("/hud").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn posted_input_reaches_the_match() {
        let (handle, _rx) = handle();
        let body = r#"{"move_x":1.0,"move_y":0.0,"aim":null,"fire":true,"ability":false}"#;
        let response = solo_app(handle.clone())
            .oneshot(json_post("/input", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let input = handle.input.borrow().clone();
        assert_eq!(input.move_x, 1.0);
        assert!(input.fire);
    }

    #[tokio::test]
    async fn weapon_swap_is_queued_as_a_command() {
        let (handle, mut rx) = handle();
        let response = solo_app(handle)
            .oneshot(json_post("/weapon", r#"{"weapon":"shotgun"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        match rx.try_recv() {
            Ok(MatchCommand::SwapWeapon { key }) => assert_eq!(key, "shotgun"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_weapon_swap_is_rejected() {
        let (handle, mut rx) = handle();
        let response = solo_app(handle)
            .oneshot(json_post("/weapon", r#"{"weapon":"plasma_cannon"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn peer_listener_is_host_only() {
        let (handle, _rx) = handle();
        let response = solo_app(handle)
            .oneshot(
                Request::builder()
                    .uri("/peer/arena-xk42?player_id=p1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
