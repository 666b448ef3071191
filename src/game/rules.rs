//! Match rules - modes, scoring, win evaluation, hardpoint control

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::entity::Team;

/// Hardpoint occupancy tally period
pub const HARDPOINT_TALLY_MS: u64 = 1000;
/// Hardpoint relocation period
pub const HARDPOINT_RELOCATE_MS: u64 = 30_000;
pub const HARDPOINT_RADIUS: f32 = 150.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameMode {
    /// Mission: reach a personal kill count
    Elimination,
    /// Mission: stay alive until the countdown ends
    Survival,
    /// Mission: collect enough items
    Extraction,
    TeamDeathmatch,
    FreeForAll,
    Hardpoint,
}

impl GameMode {
    /// Self-contained single-player modes with lives
    pub fn is_mission(self) -> bool {
        matches!(
            self,
            GameMode::Elimination | GameMode::Survival | GameMode::Extraction
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            GameMode::Elimination => "ELIMINATION",
            GameMode::Survival => "SURVIVAL",
            GameMode::Extraction => "EXTRACTION",
            GameMode::TeamDeathmatch => "TEAM DEATHMATCH",
            GameMode::FreeForAll => "FREE FOR ALL",
            GameMode::Hardpoint => "HARDPOINT",
        }
    }

    pub fn scoring(self) -> ScoringRule {
        match self {
            GameMode::TeamDeathmatch | GameMode::FreeForAll => ScoringRule::TeamScore,
            _ => ScoringRule::PersonalKills,
        }
    }

    pub fn has_objective_zone(self) -> bool {
        self == GameMode::Hardpoint
    }
}

impl FromStr for GameMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "elimination" => Ok(GameMode::Elimination),
            "survival" => Ok(GameMode::Survival),
            "extraction" => Ok(GameMode::Extraction),
            "tdm" | "team_deathmatch" => Ok(GameMode::TeamDeathmatch),
            "ffa" | "free_for_all" => Ok(GameMode::FreeForAll),
            "hardpoint" => Ok(GameMode::Hardpoint),
            _ => Err(()),
        }
    }
}

/// Who a kill is credited to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoringRule {
    /// Killer's team counter +1
    TeamScore,
    /// Killer's personal kill counter +1
    PersonalKills,
}

/// Immutable per-match configuration
#[derive(Debug, Clone, PartialEq)]
pub struct MatchConfig {
    pub mode: GameMode,
    pub map_id: String,
    /// Team score limit
    pub score_limit: u32,
    /// Mission target: kills, items, or survival seconds
    pub target_value: u32,
    pub alpha_bots: u32,
    pub bravo_bots: u32,
    pub difficulty: f32,
    pub lives: u32,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            mode: GameMode::TeamDeathmatch,
            map_id: "outpost".to_string(),
            score_limit: 25,
            target_value: 10,
            alpha_bots: 2,
            bravo_bots: 3,
            difficulty: 1.0,
            lives: 3,
        }
    }
}

impl MatchConfig {
    /// Survival countdown remaining, if this is a survival mission
    pub fn survival_remaining_ms(&self, elapsed_ms: u64) -> Option<u64> {
        (self.mode == GameMode::Survival)
            .then(|| (u64::from(self.target_value) * 1000).saturating_sub(elapsed_ms))
    }
}

/// Terminal verdict, also the `game_over` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    /// "ALPHA"/"BRAVO" for team modes, `None` for missions
    pub winner: Option<String>,
    /// Whether the local side achieved its objective
    pub success: bool,
    pub reason: String,
}

impl MatchResult {
    pub fn team_win(team: Team) -> Self {
        Self {
            winner: Some(team.to_string()),
            success: true,
            reason: format!("{team} reached the score limit"),
        }
    }

    /// Re-derive `success` for the team playing on this peer
    pub fn seen_by(mut self, local: Team) -> Self {
        if let Some(winner) = self.winner.as_deref().and_then(|w| w.parse::<Team>().ok()) {
            self.success = winner == local;
        }
        self
    }

    pub fn mission_complete(reason: &str) -> Self {
        Self {
            winner: None,
            success: true,
            reason: reason.to_string(),
        }
    }

    pub fn mission_failed(reason: &str) -> Self {
        Self {
            winner: None,
            success: false,
            reason: reason.to_string(),
        }
    }
}

/// Aggregate numbers the evaluator looks at
#[derive(Debug, Clone, Default)]
pub struct Standing {
    pub alpha: u32,
    pub bravo: u32,
    pub local_kills: u32,
    pub items_collected: u32,
    pub elapsed_ms: u64,
    pub lives_exhausted: bool,
}

/// Mode-specific victory and failure predicates
pub struct WinEvaluator;

impl WinEvaluator {
    pub fn evaluate(config: &MatchConfig, standing: &Standing) -> Option<MatchResult> {
        let target = config.target_value;
        match config.mode {
            mode if mode.is_mission() && standing.lives_exhausted => {
                Some(MatchResult::mission_failed("out of lives"))
            }
            GameMode::Elimination => (standing.local_kills >= target)
                .then(|| MatchResult::mission_complete("kill target reached")),
            GameMode::Survival => (standing.elapsed_ms >= u64::from(target) * 1000)
                .then(|| MatchResult::mission_complete("survived")),
            GameMode::Extraction => (standing.items_collected >= target)
                .then(|| MatchResult::mission_complete("items extracted")),
            GameMode::TeamDeathmatch | GameMode::FreeForAll | GameMode::Hardpoint => {
                Self::team_winner(config.score_limit, standing.alpha, standing.bravo)
                    .map(MatchResult::team_win)
            }
        }
    }

    /// Team at or over the limit; the higher score wins if both are
    pub fn team_winner(limit: u32, alpha: u32, bravo: u32) -> Option<Team> {
        match (alpha >= limit, bravo >= limit) {
            (true, true) if bravo > alpha => Some(Team::Bravo),
            (true, _) => Some(Team::Alpha),
            (false, true) => Some(Team::Bravo),
            (false, false) => None,
        }
    }
}

/// One-way match-over latch
#[derive(Debug, Clone, Default)]
pub struct MatchLatch {
    result: Option<MatchResult>,
}

impl MatchLatch {
    /// Set the latch; returns true only the first time
    pub fn trip(&mut self, result: MatchResult) -> bool {
        if self.result.is_some() {
            return false;
        }
        self.result = Some(result);
        true
    }

    pub fn is_over(&self) -> bool {
        self.result.is_some()
    }

    pub fn result(&self) -> Option<&MatchResult> {
        self.result.as_ref()
    }
}

/// Team holding the zone: strict majority of occupants, otherwise neutral
pub fn zone_majority(occupants: impl IntoIterator<Item = Team>) -> Team {
    let (mut alpha, mut bravo) = (0u32, 0u32);
    for team in occupants {
        match team {
            Team::Alpha => alpha += 1,
            Team::Bravo => bravo += 1,
            Team::Neutral => {}
        }
    }
    match alpha.cmp(&bravo) {
        std::cmp::Ordering::Greater => Team::Alpha,
        std::cmp::Ordering::Less => Team::Bravo,
        std::cmp::Ordering::Equal => Team::Neutral,
    }
}
