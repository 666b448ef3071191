//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::MatchHandle;
use crate::ws::{PeerHub, Transport};

/// Shared state for the shell API and, on the host, the peer listener
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Whatever carries this peer's traffic; read for connection rows
    pub transport: Arc<dyn Transport>,
    /// Present only on the host
    pub hub: Option<Arc<PeerHub>>,
    /// Input, swaps, and HUD; the match task drains commands once per tick
    pub game: MatchHandle,
    pub room_peer_id: Option<String>,
    pub local_player_id: String,
}

impl AppState {
    pub fn new(
        config: Config,
        transport: Arc<dyn Transport>,
        hub: Option<Arc<PeerHub>>,
        game: MatchHandle,
        room_peer_id: Option<String>,
        local_player_id: String,
    ) -> Self {
        Self {
            config: Arc::new(config),
            transport,
            hub,
            game,
            room_peer_id,
            local_player_id,
        }
    }
}
