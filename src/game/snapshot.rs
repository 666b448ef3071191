//! HUD snapshots and send cadences

use serde::Serialize;

use super::entity::{CombatantKind, Team};
use super::r#match::MatchState;

/// Fixed-interval gate on the match clock, independent of tick rate
#[derive(Debug, Clone)]
pub struct Cadence {
    interval_ms: u64,
    next_at: u64,
}

impl Cadence {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            next_at: 0,
        }
    }

    /// First firing delayed by one full interval
    pub fn starting_at(interval_ms: u64, now: u64) -> Self {
        Self {
            interval_ms,
            next_at: now + interval_ms,
        }
    }

    /// True at most once per interval
    pub fn due(&mut self, now: u64) -> bool {
        if now < self.next_at {
            return false;
        }
        self.next_at = now + self.interval_ms;
        true
    }

    /// Fire on the next check (used for important events)
    pub fn force_next(&mut self) {
        self.next_at = 0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MinimapKind {
    LocalPlayer,
    RemotePlayer,
    Bot,
    Pickup,
    Objective,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MinimapEntry {
    pub x: f32,
    pub y: f32,
    pub team: Team,
    pub kind: MinimapKind,
}

/// Everything the presentation layer polls, published once per tick
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HudSnapshot {
    pub tick: u64,
    pub health: f32,
    pub max_health: f32,
    pub shield: f32,
    pub max_shield: f32,
    /// `None` with `infinite_ammo`
    pub ammo: Option<u32>,
    pub max_ammo: Option<u32>,
    pub weapon_id: String,
    pub weapon_name: String,
    pub infinite_ammo: bool,
    pub ability_cooldown_ms: u64,
    pub kills: u32,
    pub score: u32,
    pub alpha_score: u32,
    pub bravo_score: u32,
    pub mode_label: String,
    pub match_over: bool,
    pub x: f32,
    pub y: f32,
    pub minimap: Vec<MinimapEntry>,
    /// Missions only
    pub lives_remaining: Option<u32>,
    /// Survival only
    pub survival_seconds_remaining: Option<u64>,
    pub items_collected: u32,
}

impl HudSnapshot {
    pub fn capture(state: &MatchState) -> Self {
        let now = state.clock_ms;
        let mut hud = HudSnapshot {
            tick: state.tick,
            alpha_score: state.alpha_score,
            bravo_score: state.bravo_score,
            mode_label: state.config.mode.label().to_string(),
            match_over: state.latch.is_over(),
            lives_remaining: state.config.mode.is_mission().then_some(state.lives),
            survival_seconds_remaining: state
                .config
                .survival_remaining_ms(now)
                .map(|ms| ms.div_ceil(1000)),
            items_collected: state.items_collected,
            minimap: Self::minimap(state),
            ..HudSnapshot::default()
        };

        if let Some(me) = state.registry.local() {
            let spec = me.weapon.kind.spec();
            hud.health = me.health;
            hud.max_health = me.max_health;
            hud.shield = me.shield;
            hud.max_shield = me.max_shield;
            hud.ammo = me.weapon.ammo;
            hud.max_ammo = spec.max_ammo;
            hud.weapon_id = me.weapon.kind.key().to_string();
            hud.weapon_name = spec.name.to_string();
            hud.infinite_ammo = me.weapon.is_infinite();
            hud.ability_cooldown_ms = me.ability_ready_at.saturating_sub(now);
            hud.kills = me.kills;
            hud.score = me.score;
            hud.x = me.pos.x;
            hud.y = me.pos.y;
        }

        hud
    }

    fn minimap(state: &MatchState) -> Vec<MinimapEntry> {
        let combatants = state
            .registry
            .combatants()
            .filter(|c| c.visible)
            .map(|c| MinimapEntry {
                x: c.pos.x,
                y: c.pos.y,
                team: c.team,
                kind: match c.kind {
                    CombatantKind::Player => MinimapKind::LocalPlayer,
                    CombatantKind::RemotePlayer => MinimapKind::RemotePlayer,
                    CombatantKind::Bot => MinimapKind::Bot,
                },
            });

        let pickups = state.registry.pickups().map(|p| MinimapEntry {
            x: p.pos.x,
            y: p.pos.y,
            team: Team::Neutral,
            kind: MinimapKind::Pickup,
        });

        let objective = state.registry.objective.iter().map(|z| MinimapEntry {
            x: z.center.x,
            y: z.center.y,
            team: z.holder,
            kind: MinimapKind::Objective,
        });

        combatants.chain(pickups).chain(objective).collect()
    }
}
