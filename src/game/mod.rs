//! Game simulation modules

pub mod bot;
pub mod combat;
pub mod entity;
pub mod r#match;
pub mod physics;
pub mod replication;
pub mod role;
pub mod rules;
pub mod snapshot;
pub mod weapons;

pub use r#match::{GameMatch, LifecycleEvent, MatchCommand, MatchHandle, MatchState};
pub use role::{ClientRole, HostRole, NetworkRole};
pub use rules::{GameMode, MatchConfig};
pub use snapshot::HudSnapshot;

use serde::{Deserialize, Serialize};

/// Presentation input, read once per tick
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerInput {
    /// Horizontal movement axis (-1.0 ..= 1.0)
    pub move_x: f32,
    /// Vertical movement axis (-1.0 ..= 1.0)
    pub move_y: f32,
    /// Explicit aim in radians; `None` faces the movement direction
    pub aim: Option<f32>,
    pub fire: bool,
    pub ability: bool,
}
