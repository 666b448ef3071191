//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

use uuid::Uuid;

use crate::game::entity::{PlayerClass, Team};
use crate::game::r#match::PlayerSetup;
use crate::game::{GameMode, MatchConfig};

const MIN_DIFFICULTY: f32 = 0.25;
const MAX_DIFFICULTY: f32 = 3.0;

/// Which peer this process runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Host,
    Client,
    /// Single-player: host rules, no transport
    Solo,
}

impl Role {
    pub fn label(self) -> &'static str {
        match self {
            Role::Host => "host",
            Role::Client => "client",
            Role::Solo => "solo",
        }
    }
}

impl FromStr for Role {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "host" => Ok(Role::Host),
            "client" => Ok(Role::Client),
            "solo" => Ok(Role::Solo),
            _ => Err(()),
        }
    }
}

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Host listen address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed origins for CORS on the host, comma separated
    pub client_origin: String,

    pub role: Role,
    pub room_code: Option<String>,
    /// Base ws url of the host, clients only
    pub host_url: Option<String>,

    pub player_name: String,
    pub player_class: PlayerClass,
    /// `name:team` assignments from the lobby
    pub squad: Vec<(String, Team)>,
    pub audio_enabled: bool,
    pub seed: Option<u64>,

    pub mode: GameMode,
    pub map_id: String,
    pub score_limit: u32,
    pub target_value: u32,
    pub alpha_bots: u32,
    pub bravo_bots: u32,
    pub difficulty: f32,
    pub lives: u32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Load configuration from any variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let server_addr = match get("PORT") {
            Some(port) => format!("0.0.0.0:{port}"),
            None => get("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
        };
        let server_addr = server_addr
            .parse()
            .map_err(|_| ConfigError::InvalidAddress)?;

        let role: Role = parse_or(&get, "ROLE", Role::Solo)?;
        let room_code = get("ROOM_CODE");
        let host_url = get("HOST_URL");
        if role != Role::Solo && room_code.is_none() {
            return Err(ConfigError::Missing("ROOM_CODE"));
        }
        if role == Role::Client && host_url.is_none() {
            return Err(ConfigError::Missing("HOST_URL"));
        }

        let defaults = MatchConfig::default();
        let difficulty: f32 = parse_or(&get, "DIFFICULTY", defaults.difficulty)?;

        Ok(Self {
            server_addr,
            log_level: get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            client_origin: get("CLIENT_ORIGIN").unwrap_or_else(|| "*".to_string()),

            role,
            room_code,
            host_url,

            player_name: get("PLAYER_NAME").unwrap_or_else(|| "Player".to_string()),
            player_class: parse_or(&get, "PLAYER_CLASS", PlayerClass::Assault)?,
            squad: get("SQUAD").map(|s| parse_squad(&s)).transpose()?.unwrap_or_default(),
            audio_enabled: parse_or(&get, "AUDIO_ENABLED", true)?,
            seed: get("MATCH_SEED")
                .map(|v| {
                    v.parse().map_err(|_| ConfigError::Invalid {
                        var: "MATCH_SEED",
                        value: v,
                    })
                })
                .transpose()?,

            mode: parse_or(&get, "MATCH_MODE", defaults.mode)?,
            map_id: get("MAP_ID").unwrap_or(defaults.map_id),
            score_limit: parse_or(&get, "SCORE_LIMIT", defaults.score_limit)?,
            target_value: parse_or(&get, "TARGET_VALUE", defaults.target_value)?,
            alpha_bots: parse_or(&get, "ALPHA_BOTS", defaults.alpha_bots)?,
            bravo_bots: parse_or(&get, "BRAVO_BOTS", defaults.bravo_bots)?,
            difficulty: difficulty.clamp(MIN_DIFFICULTY, MAX_DIFFICULTY),
            lives: parse_or(&get, "LIVES", defaults.lives)?.max(1),
        })
    }

    /// Immutable rules for this match
    pub fn match_config(&self) -> MatchConfig {
        MatchConfig {
            mode: self.mode,
            map_id: self.map_id.clone(),
            score_limit: self.score_limit,
            target_value: self.target_value,
            alpha_bots: self.alpha_bots,
            bravo_bots: self.bravo_bots,
            difficulty: self.difficulty,
            lives: self.lives,
        }
    }

    pub fn bootstrap(&self) -> Bootstrap {
        let team = self
            .squad
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(&self.player_name))
            .map(|(_, team)| *team)
            .unwrap_or(match self.role {
                Role::Client => Team::Bravo,
                Role::Host | Role::Solo => Team::Alpha,
            });

        Bootstrap {
            player_id: Uuid::new_v4().simple().to_string(),
            name: self.player_name.clone(),
            class: self.player_class,
            team,
            role: self.role,
            room_code: self.room_code.clone(),
            audio_enabled: self.audio_enabled,
            seed: self.seed.unwrap_or_else(rand::random),
        }
    }
}

/// Per-process match bootstrap, resolved once from `Config`
#[derive(Debug, Clone)]
pub struct Bootstrap {
    pub player_id: String,
    pub name: String,
    pub class: PlayerClass,
    pub team: Team,
    pub role: Role,
    pub room_code: Option<String>,
    pub audio_enabled: bool,
    pub seed: u64,
}

impl Bootstrap {
    pub fn player_setup(&self) -> PlayerSetup {
        PlayerSetup {
            id: self.player_id.clone(),
            name: self.name.clone(),
            team: self.team,
            class: self.class,
        }
    }
}

fn parse_or<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match get(var) {
        None => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}

/// `alice:alpha,bob:bravo`
fn parse_squad(raw: &str) -> Result<Vec<(String, Team)>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let invalid = || ConfigError::Invalid {
                var: "SQUAD",
                value: entry.to_string(),
            };
            let (name, team) = entry.rsplit_once(':').ok_or_else(invalid)?;
            let team: Team = team.trim().parse().map_err(|_| invalid())?;
            Ok((name.trim().to_string(), team))
        })
        .collect()
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },

    #[error("Invalid server address format")]
    InvalidAddress,
}
