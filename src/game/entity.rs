//! Entity registry - every simulated object, indexed by stable id

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use super::bot::BotMind;
use super::physics::Vec2;
use super::weapons::WeaponKind;

/// Stable string id shared by every peer for the same entity
pub type EntityId = String;

/// Fixed bullet pool size
pub const BULLET_POOL_CAPACITY: usize = 256;

/// Spawn protection window applied at match start and on every respawn
pub const SAFE_ZONE_MS: u64 = 3000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Team {
    Alpha,
    Bravo,
    Neutral,
}

impl Team {
    pub fn opponent(self) -> Team {
        match self {
            Team::Alpha => Team::Bravo,
            Team::Bravo => Team::Alpha,
            Team::Neutral => Team::Neutral,
        }
    }

    /// Friendly fire never applies between members of the same team
    pub fn is_hostile_to(self, other: Team) -> bool {
        self != other && self != Team::Neutral && other != Team::Neutral
    }
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Team::Alpha => "ALPHA",
            Team::Bravo => "BRAVO",
            Team::Neutral => "NEUTRAL",
        })
    }
}

impl FromStr for Team {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "alpha" => Ok(Team::Alpha),
            "bravo" => Ok(Team::Bravo),
            "neutral" => Ok(Team::Neutral),
            _ => Err(()),
        }
    }
}

/// Player classes chosen in the lobby
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerClass {
    #[default]
    Assault,
    Scout,
    Heavy,
}

impl FromStr for PlayerClass {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "assault" => Ok(PlayerClass::Assault),
            "scout" => Ok(PlayerClass::Scout),
            "heavy" => Ok(PlayerClass::Heavy),
            _ => Err(()),
        }
    }
}

/// Class ability triggered by the input ability flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ability {
    /// Instant shield refill
    ShieldBurst,
    /// Short impulse along facing
    Dash,
    /// Brief damage immunity
    Fortify,
}

/// Per-class constants
#[derive(Debug, Clone, Copy)]
pub struct ClassStats {
    pub max_health: f32,
    pub max_shield: f32,
    /// Movement speed in units per second
    pub speed: f32,
    pub ability: Ability,
    pub ability_cooldown_ms: u64,
}

impl ClassStats {
    pub fn for_class(class: PlayerClass) -> Self {
        match class {
            PlayerClass::Assault => Self {
                max_health: 100.0,
                max_shield: 50.0,
                speed: 260.0,
                ability: Ability::ShieldBurst,
                ability_cooldown_ms: 12_000,
            },
            PlayerClass::Scout => Self {
                max_health: 80.0,
                max_shield: 40.0,
                speed: 320.0,
                ability: Ability::Dash,
                ability_cooldown_ms: 5_000,
            },
            PlayerClass::Heavy => Self {
                max_health: 150.0,
                max_shield: 75.0,
                speed: 200.0,
                ability: Ability::Fortify,
                ability_cooldown_ms: 15_000,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombatantKind {
    /// The entity this peer controls
    Player,
    /// Another peer's player, driven by its `sync` messages
    RemotePlayer,
    Bot,
}

/// Combatant lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifeState {
    Alive,
    Respawning { respawn_at: u64 },
    /// Out of lives; only reached by the local player in mission modes
    Eliminated,
}

/// Equipped weapon plus ammunition
#[derive(Debug, Clone, PartialEq)]
pub struct WeaponState {
    pub kind: WeaponKind,
    /// `None` when the weapon has infinite ammo
    pub ammo: Option<u32>,
    /// Match-clock time of the last shot
    pub last_fired: Option<u64>,
    /// Pending automatic swap to the fallback weapon
    pub swap_at: Option<u64>,
}

impl WeaponState {
    pub fn new(kind: WeaponKind) -> Self {
        Self {
            kind,
            ammo: kind.spec().max_ammo,
            last_fired: None,
            swap_at: None,
        }
    }

    /// Equip a weapon with full ammunition, cancelling any pending swap
    pub fn equip(&mut self, kind: WeaponKind) {
        self.kind = kind;
        self.ammo = kind.spec().max_ammo;
        self.swap_at = None;
    }

    pub fn is_infinite(&self) -> bool {
        self.ammo.is_none()
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.ammo, Some(0))
    }

    pub fn refill(&mut self) {
        self.ammo = self.kind.spec().max_ammo;
    }
}

/// Player, remote player, or bot
#[derive(Debug, Clone, PartialEq)]
pub struct Combatant {
    pub id: EntityId,
    pub name: String,
    pub kind: CombatantKind,
    pub team: Team,
    pub class: PlayerClass,

    pub pos: Vec2,
    pub angle: f32,
    pub vel: Vec2,
    pub speed: f32,

    pub health: f32,
    pub max_health: f32,
    pub shield: f32,
    pub max_shield: f32,

    pub weapon: WeaponState,
    pub life: LifeState,
    pub visible: bool,

    /// Damage is ignored until this match-clock time
    pub invulnerable_until: u64,
    /// Spawn protection: no damage and not a valid AI target
    pub safe_until: u64,
    pub last_damaged_at: Option<u64>,
    pub last_attacker: Option<EntityId>,
    pub ability_ready_at: u64,

    pub kills: u32,
    pub score: u32,

    /// Latest network position/angle for interpolated entities
    pub net_target: Option<(Vec2, f32)>,
    /// Host-side AI state; `None` for players
    pub mind: Option<BotMind>,
}

impl Combatant {
    fn base(id: EntityId, name: String, kind: CombatantKind, team: Team, pos: Vec2) -> Self {
        let stats = ClassStats::for_class(PlayerClass::Assault);
        Self {
            id,
            name,
            kind,
            team,
            class: PlayerClass::Assault,
            pos,
            angle: 0.0,
            vel: Vec2::ZERO,
            speed: stats.speed,
            health: stats.max_health,
            max_health: stats.max_health,
            shield: 0.0,
            max_shield: 0.0,
            weapon: WeaponState::new(WeaponKind::FALLBACK),
            life: LifeState::Alive,
            visible: true,
            invulnerable_until: 0,
            safe_until: 0,
            last_damaged_at: None,
            last_attacker: None,
            ability_ready_at: 0,
            kills: 0,
            score: 0,
            net_target: None,
            mind: None,
        }
    }

    /// The locally controlled player, spawn-protected from `now`
    pub fn player(
        id: EntityId,
        name: String,
        team: Team,
        class: PlayerClass,
        pos: Vec2,
        now: u64,
    ) -> Self {
        let stats = ClassStats::for_class(class);
        let mut c = Self::base(id, name, CombatantKind::Player, team, pos);
        c.class = class;
        c.speed = stats.speed;
        c.health = stats.max_health;
        c.max_health = stats.max_health;
        c.shield = stats.max_shield;
        c.max_shield = stats.max_shield;
        c.safe_until = now + SAFE_ZONE_MS;
        c
    }

    pub fn remote(id: EntityId, name: String, team: Team, pos: Vec2, angle: f32) -> Self {
        let mut c = Self::base(id, name, CombatantKind::RemotePlayer, team, pos);
        c.angle = angle;
        c.net_target = Some((pos, angle));
        c
    }

    /// Bot with health scaled by difficulty
    pub fn bot(
        id: EntityId,
        name: String,
        team: Team,
        pos: Vec2,
        weapon: WeaponKind,
        difficulty: f32,
        now: u64,
    ) -> Self {
        let mut c = Self::base(id, name, CombatantKind::Bot, team, pos);
        let max_health = 100.0 * (0.6 + 0.4 * difficulty);
        c.health = max_health;
        c.max_health = max_health;
        c.speed = 220.0;
        c.weapon = WeaponState::new(weapon);
        c.safe_until = now + SAFE_ZONE_MS;
        c.mind = Some(BotMind::default());
        c
    }

    pub fn is_alive(&self) -> bool {
        self.life == LifeState::Alive
    }

    pub fn is_protected(&self, now: u64) -> bool {
        now < self.safe_until
    }

    pub fn health_fraction(&self) -> f32 {
        if self.max_health <= 0.0 {
            0.0
        } else {
            self.health / self.max_health
        }
    }
}

/// Kind of item lying on the arena floor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickupKind {
    /// Ammo refill plus heal
    LuckBox,
    /// Opens into a random weapon item
    WeaponBox,
    WeaponItem(WeaponKind),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pickup {
    pub id: EntityId,
    pub kind: PickupKind,
    pub pos: Vec2,
}

/// Capturable zone for hardpoint matches
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectiveZone {
    pub id: EntityId,
    pub center: Vec2,
    pub radius: f32,
    /// Team that won the last tally; `Neutral` when contested or empty
    pub holder: Team,
}

/// Pooled projectile
#[derive(Debug, Clone)]
pub struct Bullet {
    pub slot: usize,
    pub owner_id: EntityId,
    pub team: Team,
    pub weapon: WeaponKind,
    pub pos: Vec2,
    pub vel: Vec2,
    pub angle: f32,
    pub damage: f32,
    pub expires_at: u64,
    pub active: bool,
}

/// Parameters for a new bullet
#[derive(Debug, Clone)]
pub struct BulletSpawn {
    pub owner_id: EntityId,
    pub team: Team,
    pub weapon: WeaponKind,
    pub pos: Vec2,
    pub angle: f32,
    pub expires_at: u64,
}

/// Fixed-capacity bullet storage; spawning past capacity recycles a live slot
#[derive(Debug)]
pub struct BulletPool {
    slots: Vec<Bullet>,
    cursor: usize,
}

impl BulletPool {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let slots = (0..capacity)
            .map(|slot| Bullet {
                slot,
                owner_id: String::new(),
                team: Team::Neutral,
                weapon: WeaponKind::FALLBACK,
                pos: Vec2::ZERO,
                vel: Vec2::ZERO,
                angle: 0.0,
                damage: 0.0,
                expires_at: 0,
                active: false,
            })
            .collect();
        Self { slots, cursor: 0 }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Activate a slot for a new bullet and return its index
    pub fn spawn(&mut self, spawn: BulletSpawn) -> usize {
        let len = self.slots.len();
        let slot = (0..len)
            .map(|i| (self.cursor + i) % len)
            .find(|&i| !self.slots[i].active)
            .unwrap_or(self.cursor);
        self.cursor = (slot + 1) % len;

        let spec = spawn.weapon.spec();
        let bullet = &mut self.slots[slot];
        bullet.owner_id = spawn.owner_id;
        bullet.team = spawn.team;
        bullet.weapon = spawn.weapon;
        bullet.pos = spawn.pos;
        bullet.angle = spawn.angle;
        bullet.vel = Vec2::from_angle(spawn.angle) * spec.projectile_speed;
        bullet.damage = spec.damage;
        bullet.expires_at = spawn.expires_at;
        bullet.active = true;
        slot
    }

    /// Return a slot to the pool; releasing an inactive slot is a no-op
    pub fn release(&mut self, slot: usize) -> bool {
        match self.slots.get_mut(slot) {
            Some(bullet) if bullet.active => {
                bullet.active = false;
                true
            }
            _ => false,
        }
    }

    pub fn active(&self) -> impl Iterator<Item = &Bullet> {
        self.slots.iter().filter(|b| b.active)
    }

    pub fn active_mut(&mut self) -> impl Iterator<Item = &mut Bullet> {
        self.slots.iter_mut().filter(|b| b.active)
    }

    pub fn active_count(&self) -> usize {
        self.active().count()
    }
}

/// What a `destroy` call removed
#[derive(Debug, Clone, PartialEq)]
pub enum Destroyed {
    Combatant(Combatant),
    Pickup(Pickup),
    Nothing,
}

/// Holds all live entities. Destruction removes an entity from every index at once.
#[derive(Debug)]
pub struct EntityRegistry {
    local_id: EntityId,
    combatants: BTreeMap<EntityId, Combatant>,
    pickups: BTreeMap<EntityId, Pickup>,
    pub bullets: BulletPool,
    pub objective: Option<ObjectiveZone>,
}

impl EntityRegistry {
    pub fn new(local: Combatant) -> Self {
        let local_id = local.id.clone();
        let mut combatants = BTreeMap::new();
        combatants.insert(local_id.clone(), local);
        Self {
            local_id,
            combatants,
            pickups: BTreeMap::new(),
            bullets: BulletPool::with_capacity(BULLET_POOL_CAPACITY),
            objective: None,
        }
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn local(&self) -> Option<&Combatant> {
        self.combatants.get(&self.local_id)
    }

    pub fn local_mut(&mut self) -> Option<&mut Combatant> {
        self.combatants.get_mut(&self.local_id)
    }

    /// Insert a combatant; a duplicate id is a no-op returning false
    pub fn spawn_combatant(&mut self, combatant: Combatant) -> bool {
        if self.contains(&combatant.id) {
            debug!(entity_id = %combatant.id, "Duplicate combatant spawn ignored");
            return false;
        }
        self.combatants.insert(combatant.id.clone(), combatant);
        true
    }

    pub fn combatant(&self, id: &str) -> Option<&Combatant> {
        self.combatants.get(id)
    }

    pub fn combatant_mut(&mut self, id: &str) -> Option<&mut Combatant> {
        self.combatants.get_mut(id)
    }

    /// A combatant together with the bullet pool, for firing
    pub fn shooter_mut(&mut self, id: &str) -> Option<(&mut Combatant, &mut BulletPool)> {
        let shooter = self.combatants.get_mut(id)?;
        Some((shooter, &mut self.bullets))
    }

    pub fn combatants(&self) -> impl Iterator<Item = &Combatant> {
        self.combatants.values()
    }

    pub fn combatants_mut(&mut self) -> impl Iterator<Item = &mut Combatant> {
        self.combatants.values_mut()
    }

    pub fn bots(&self) -> impl Iterator<Item = &Combatant> {
        self.combatants
            .values()
            .filter(|c| c.kind == CombatantKind::Bot)
    }

    pub fn bot_ids(&self) -> Vec<EntityId> {
        self.bots().map(|c| c.id.clone()).collect()
    }

    /// Insert a pickup; a duplicate id is a no-op returning false
    pub fn spawn_pickup(&mut self, pickup: Pickup) -> bool {
        if self.contains(&pickup.id) {
            debug!(entity_id = %pickup.id, "Duplicate pickup spawn ignored");
            return false;
        }
        self.pickups.insert(pickup.id.clone(), pickup);
        true
    }

    pub fn pickup(&self, id: &str) -> Option<&Pickup> {
        self.pickups.get(id)
    }

    pub fn pickups(&self) -> impl Iterator<Item = &Pickup> {
        self.pickups.values()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.combatants.contains_key(id) || self.pickups.contains_key(id)
    }

    /// Remove any entity by id. Safe to call repeatedly; the local player is never removed.
    pub fn destroy(&mut self, id: &str) -> Destroyed {
        if id == self.local_id {
            return Destroyed::Nothing;
        }
        if let Some(c) = self.combatants.remove(id) {
            return Destroyed::Combatant(c);
        }
        if let Some(p) = self.pickups.remove(id) {
            return Destroyed::Pickup(p);
        }
        debug!(entity_id = %id, "Destroy for absent id ignored");
        Destroyed::Nothing
    }

    /// Purge the remote-player entity owned by a disconnected peer
    pub fn remove_peer(&mut self, peer_id: &str) -> bool {
        let owned = self
            .combatants
            .get(peer_id)
            .is_some_and(|c| c.kind == CombatantKind::RemotePlayer);
        if owned {
            self.combatants.remove(peer_id);
        }
        owned
    }

    /// Purge every remote player; returns how many went
    pub fn remove_remote_players(&mut self) -> usize {
        let before = self.combatants.len();
        self.combatants
            .retain(|_, c| c.kind != CombatantKind::RemotePlayer);
        before - self.combatants.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> EntityRegistry {
        EntityRegistry::new(Combatant::player(
            "me".into(),
            "Me".into(),
            Team::Alpha,
            PlayerClass::Assault,
            Vec2::new(100.0, 100.0),
            0,
        ))
    }

    fn bot(id: &str) -> Combatant {
        Combatant::bot(
            id.into(),
            id.into(),
            Team::Bravo,
            Vec2::new(500.0, 500.0),
            WeaponKind::Smg,
            1.0,
            0,
        )
    }

    #[test]
    fn duplicate_spawn_keeps_one_entity() {
        let mut reg = registry();
        assert!(reg.spawn_combatant(bot("b1")));
        assert!(!reg.spawn_combatant(bot("b1")));
        assert_eq!(reg.bots().count(), 1);
    }

    #[test]
    fn destroy_twice_is_a_noop() {
        let mut reg = registry();
        reg.spawn_combatant(bot("b1"));
        assert!(matches!(reg.destroy("b1"), Destroyed::Combatant(_)));
        assert_eq!(reg.destroy("b1"), Destroyed::Nothing);
        assert!(reg.combatant("b1").is_none());
    }

    #[test]
    fn destroy_before_spawn_does_not_block_later_spawns() {
        let mut reg = registry();
        assert_eq!(reg.destroy("ghost"), Destroyed::Nothing);
        assert!(reg.spawn_pickup(Pickup {
            id: "box-1".into(),
            kind: PickupKind::LuckBox,
            pos: Vec2::new(10.0, 10.0),
        }));
        assert!(reg.pickup("box-1").is_some());
    }

    #[test]
    fn local_player_cannot_be_destroyed() {
        let mut reg = registry();
        assert_eq!(reg.destroy("me"), Destroyed::Nothing);
        assert!(reg.local().is_some());
    }

    #[test]
    fn remove_peer_only_purges_remote_players() {
        let mut reg = registry();
        reg.spawn_combatant(Combatant::remote(
            "peer-2".into(),
            "Two".into(),
            Team::Bravo,
            Vec2::ZERO,
            0.0,
        ));
        reg.spawn_combatant(bot("b1"));
        assert!(reg.remove_peer("peer-2"));
        assert!(!reg.remove_peer("peer-2"));
        assert!(!reg.remove_peer("b1"));
        assert!(reg.combatant("b1").is_some());
    }

    #[test]
    fn losing_the_host_purges_all_remote_players() {
        let mut reg = registry();
        for id in ["host-1", "peer-3"] {
            let remote = Combatant::remote(id.into(), id.into(), Team::Bravo, Vec2::ZERO, 0.0);
            reg.spawn_combatant(remote);
        }
        reg.spawn_combatant(bot("b1"));
        assert_eq!(reg.remove_remote_players(), 2);
        assert!(reg.combatant("host-1").is_none());
        assert!(reg.combatant("b1").is_some());
        assert!(reg.local().is_some());
    }

    #[test]
    fn bullet_pool_is_bounded_and_recycles() {
        let mut pool = BulletPool::with_capacity(4);
        for _ in 0..10 {
            pool.spawn(BulletSpawn {
                owner_id: "me".into(),
                team: Team::Alpha,
                weapon: WeaponKind::Pistol,
                pos: Vec2::ZERO,
                angle: 0.0,
                expires_at: 1000,
            });
        }
        assert_eq!(pool.active_count(), 4);
        assert!(pool.release(2));
        assert!(!pool.release(2));
        assert_eq!(pool.active_count(), 3);
    }

    #[test]
    fn friendly_fire_is_never_hostile() {
        assert!(!Team::Alpha.is_hostile_to(Team::Alpha));
        assert!(Team::Alpha.is_hostile_to(Team::Bravo));
        assert!(!Team::Neutral.is_hostile_to(Team::Bravo));
        assert_eq!(Team::Alpha.to_string(), "ALPHA");
    }
}
