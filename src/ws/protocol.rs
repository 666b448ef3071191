//! Peer wire protocol
//! JSON text frames, one tagged message per frame

use serde::{Deserialize, Serialize};

use crate::game::entity::Team;
use crate::game::rules::MatchResult;

use super::NetError;

/// Messages exchanged between peers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerMsg {
    /// A peer's own player state, sent on a fixed cadence
    Sync {
        id: String,
        name: String,
        team: Team,
        x: f32,
        y: f32,
        angle: f32,
        weapon: String,
        alive: bool,
    },

    /// One trigger pull; receivers spawn the same pellets
    Fire {
        owner_id: String,
        team: Team,
        weapon: String,
        x: f32,
        y: f32,
        angles: Vec<f32>,
    },

    /// Authoritative team counters
    ScoreUpdate { alpha: u32, bravo: u32 },

    SpawnBot(BotInfo),

    SpawnBox(BoxInfo),

    SpawnItem(ItemInfo),

    /// Remove a bot, box, or item by id
    DestroyObject { id: String },

    /// Periodic authoritative bot positions
    BotSync { bots: Vec<BotState> },

    GameOver(MatchResult),

    /// Full world state for a newly connected peer
    InitialSync(WorldSnapshot),

    /// A combatant died; `killer_id` is credited with the kill
    Killed {
        victim_id: String,
        killer_id: Option<String>,
    },

    ObjectiveMoved { x: f32, y: f32, radius: f32 },
}

impl PeerMsg {
    pub fn kind(&self) -> &'static str {
        match self {
            PeerMsg::Sync { .. } => "sync",
            PeerMsg::Fire { .. } => "fire",
            PeerMsg::ScoreUpdate { .. } => "score_update",
            PeerMsg::SpawnBot(_) => "spawn_bot",
            PeerMsg::SpawnBox(_) => "spawn_box",
            PeerMsg::SpawnItem(_) => "spawn_item",
            PeerMsg::DestroyObject { .. } => "destroy_object",
            PeerMsg::BotSync { .. } => "bot_sync",
            PeerMsg::GameOver(_) => "game_over",
            PeerMsg::InitialSync(_) => "initial_sync",
            PeerMsg::Killed { .. } => "killed",
            PeerMsg::ObjectiveMoved { .. } => "objective_moved",
        }
    }

    /// Messages only the host may originate
    pub fn is_host_authoritative(&self) -> bool {
        matches!(
            self,
            PeerMsg::ScoreUpdate { .. }
                | PeerMsg::SpawnBot(_)
                | PeerMsg::SpawnBox(_)
                | PeerMsg::SpawnItem(_)
                | PeerMsg::BotSync { .. }
                | PeerMsg::GameOver(_)
                | PeerMsg::InitialSync(_)
                | PeerMsg::ObjectiveMoved { .. }
        )
    }

    pub fn encode(&self) -> Result<String, NetError> {
        serde_json::to_string(self).map_err(NetError::Decode)
    }

    pub fn decode(text: &str) -> Result<Self, NetError> {
        serde_json::from_str(text).map_err(NetError::Decode)
    }
}

/// Bot spawn payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotInfo {
    pub id: String,
    pub name: String,
    pub team: Team,
    pub x: f32,
    pub y: f32,
    pub angle: f32,
    pub weapon: String,
    pub health: f32,
    pub max_health: f32,
}

/// Per-bot entry in `bot_sync`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotState {
    pub id: String,
    pub x: f32,
    pub y: f32,
    pub angle: f32,
    pub health: f32,
    pub alive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoxKind {
    Luck,
    Weapon,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxInfo {
    pub id: String,
    pub kind: BoxKind,
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemInfo {
    pub id: String,
    pub weapon: String,
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveInfo {
    pub x: f32,
    pub y: f32,
    pub radius: f32,
}

/// Everything a late joiner needs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub bots: Vec<BotInfo>,
    pub boxes: Vec<BoxInfo>,
    pub items: Vec<ItemInfo>,
    pub alpha: u32,
    pub bravo: u32,
    #[serde(default)]
    pub objective: Option<ObjectiveInfo>,
}
