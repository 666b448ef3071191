//! Weapon catalog - static archetype table

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Weapon archetypes known to the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeaponKind {
    /// Fallback sidearm, never runs dry
    Pistol,
    Smg,
    Shotgun,
    Rifle,
    Railgun,
}

impl WeaponKind {
    /// Weapon equipped whenever another one is unusable
    pub const FALLBACK: WeaponKind = WeaponKind::Pistol;

    /// Everything a weapon box can drop
    pub const DROPPABLE: [WeaponKind; 4] = [
        WeaponKind::Smg,
        WeaponKind::Shotgun,
        WeaponKind::Rifle,
        WeaponKind::Railgun,
    ];

    pub fn key(self) -> &'static str {
        match self {
            WeaponKind::Pistol => "pistol",
            WeaponKind::Smg => "smg",
            WeaponKind::Shotgun => "shotgun",
            WeaponKind::Rifle => "rifle",
            WeaponKind::Railgun => "railgun",
        }
    }

    pub fn spec(self) -> &'static WeaponSpec {
        match self {
            WeaponKind::Pistol => &PISTOL,
            WeaponKind::Smg => &SMG,
            WeaponKind::Shotgun => &SHOTGUN,
            WeaponKind::Rifle => &RIFLE,
            WeaponKind::Railgun => &RAILGUN,
        }
    }

    /// Resolve a key, substituting the fallback weapon for unknown ids
    pub fn resolve_or_fallback(key: &str) -> WeaponKind {
        key.parse().unwrap_or(WeaponKind::FALLBACK)
    }
}

impl fmt::Display for WeaponKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for WeaponKind {
    type Err = WeaponError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pistol" => Ok(WeaponKind::Pistol),
            "smg" => Ok(WeaponKind::Smg),
            "shotgun" => Ok(WeaponKind::Shotgun),
            "rifle" => Ok(WeaponKind::Rifle),
            "railgun" => Ok(WeaponKind::Railgun),
            other => Err(WeaponError::UnknownWeaponKind(other.to_string())),
        }
    }
}

/// Preferred engagement distance bucket, used by bot AI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeaponCategory {
    Close,
    Mid,
    Far,
}

/// Static weapon archetype
#[derive(Debug, Clone, Copy)]
pub struct WeaponSpec {
    pub name: &'static str,
    /// Minimum time between shots
    pub fire_interval_ms: u64,
    /// Per-pellet damage
    pub damage: f32,
    /// Knockback applied to the shooter, opposite the fire direction
    pub recoil: f32,
    pub pellets: u32,
    /// Full spread cone in radians
    pub spread: f32,
    /// `None` means infinite ammo
    pub max_ammo: Option<u32>,
    pub projectile_speed: f32,
    /// Presentation-only projectile size
    pub projectile_weight: f32,
    pub category: WeaponCategory,
}

pub static PISTOL: WeaponSpec = WeaponSpec {
    name: "Pistol",
    fire_interval_ms: 350,
    damage: 12.0,
    recoil: 2.0,
    pellets: 1,
    spread: 0.04,
    max_ammo: None,
    projectile_speed: 900.0,
    projectile_weight: 1.0,
    category: WeaponCategory::Mid,
};

pub static SMG: WeaponSpec = WeaponSpec {
    name: "SMG",
    fire_interval_ms: 90,
    damage: 8.0,
    recoil: 1.5,
    pellets: 1,
    spread: 0.12,
    max_ammo: Some(120),
    projectile_speed: 1000.0,
    projectile_weight: 0.8,
    category: WeaponCategory::Mid,
};

pub static SHOTGUN: WeaponSpec = WeaponSpec {
    name: "Shotgun",
    fire_interval_ms: 800,
    damage: 9.0,
    recoil: 12.0,
    pellets: 6,
    spread: 0.45,
    max_ammo: Some(24),
    projectile_speed: 800.0,
    projectile_weight: 1.2,
    category: WeaponCategory::Close,
};

pub static RIFLE: WeaponSpec = WeaponSpec {
    name: "Rifle",
    fire_interval_ms: 200,
    damage: 16.0,
    recoil: 3.0,
    pellets: 1,
    spread: 0.05,
    max_ammo: Some(60),
    projectile_speed: 1200.0,
    projectile_weight: 1.0,
    category: WeaponCategory::Mid,
};

pub static RAILGUN: WeaponSpec = WeaponSpec {
    name: "Railgun",
    fire_interval_ms: 1400,
    damage: 65.0,
    recoil: 18.0,
    pellets: 1,
    spread: 0.0,
    max_ammo: Some(8),
    projectile_speed: 2200.0,
    projectile_weight: 2.0,
    category: WeaponCategory::Far,
};

/// Weapon lookup errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WeaponError {
    #[error("Unknown weapon kind: {0}")]
    UnknownWeaponKind(String),
}
