//! Combat system - movement, firing, damage, death, respawn, pickups

use rand::Rng;

use super::entity::{
    Ability, BulletPool, BulletSpawn, ClassStats, Combatant, EntityId, LifeState, PickupKind,
    Team, SAFE_ZONE_MS,
};
use super::physics::{PhysicsSystem, Vec2, Wall, UNIT_RADIUS};
use super::weapons::{WeaponError, WeaponKind};
use super::PlayerInput;

/// Post-hit immunity so one overlapping bullet cannot hit twice in a physics step
pub const INVULNERABILITY_MS: u64 = 400;
pub const RESPAWN_DELAY_MS: u64 = 3000;
/// Delay before an emptied weapon is replaced by the fallback
pub const FALLBACK_SWAP_DELAY_MS: u64 = 600;
pub const SHIELD_REGEN_DELAY_MS: u64 = 2000;
pub const SHIELD_REGEN_PER_SEC: f32 = 8.0;
pub const BULLET_LIFETIME_MS: u64 = 1800;
pub const BULLET_RADIUS: f32 = 4.0;
pub const PICKUP_RADIUS: f32 = 28.0;
pub const MUZZLE_OFFSET: f32 = UNIT_RADIUS + 6.0;

pub const LUCK_BOX_HEAL: f32 = 35.0;
pub const LUCK_BOX_POINTS: u32 = 50;
pub const WEAPON_ITEM_POINTS: u32 = 25;
pub const KILL_POINTS: u32 = 100;

pub const DASH_DISTANCE: f32 = 140.0;
pub const FORTIFY_MS: u64 = 1500;

/// Result of applying a hit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DamageOutcome {
    /// Target dead, spawn-protected, or inside its invulnerability window
    Ignored,
    /// Shield took all of it
    Absorbed,
    Damaged,
    /// Health reached zero on this hit
    Killed,
}

/// Result of a fire request
#[derive(Debug, Clone, PartialEq)]
pub enum FireOutcome {
    Fired(Volley),
    CoolingDown,
    /// Weapon was dry; the fallback weapon is now equipped
    OutOfAmmo,
    NotAlive,
}

/// Bullets spawned by one trigger pull
#[derive(Debug, Clone, PartialEq)]
pub struct Volley {
    pub owner_id: EntityId,
    pub team: Team,
    pub weapon: WeaponKind,
    pub origin: Vec2,
    pub angles: Vec<f32>,
}

/// What a pickup did to its collector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickupEffect {
    Restocked,
    /// Box must be opened into a weapon item by the authority
    BoxOpened,
    Equipped(WeaponKind),
}

/// Combat system for managing weapons, damage and lifecycle
pub struct CombatSystem;

impl CombatSystem {
    /// Difficulty-scaled bullet damage
    pub fn scaled_damage(base_damage: f32, difficulty: f32) -> f32 {
        base_damage * (0.7 + difficulty * 0.3)
    }

    /// Apply movement input for one tick. Zero input stops the unit dead.
    pub fn apply_movement(c: &mut Combatant, input: &PlayerInput, dt: f32, walls: &[Wall]) {
        let axes = Vec2::new(input.move_x.clamp(-1.0, 1.0), input.move_y.clamp(-1.0, 1.0));
        c.vel = axes * c.speed;

        match input.aim {
            Some(aim) => c.angle = aim,
            None if axes != Vec2::ZERO => c.angle = axes.to_angle(),
            None => {}
        }

        c.pos = PhysicsSystem::move_with_walls(c.pos, c.vel * dt, UNIT_RADIUS, walls);
    }

    /// Random pellet angles within `aim +- spread/2` (plus any extra aim error)
    pub fn pellet_angles<R: Rng + ?Sized>(
        aim: f32,
        weapon: WeaponKind,
        extra_error: f32,
        rng: &mut R,
    ) -> Vec<f32> {
        let spec = weapon.spec();
        let half = (spec.spread + extra_error.max(0.0)) * 0.5;
        (0..spec.pellets.max(1))
            .map(|_| aim + rng.gen_range(-half..=half))
            .collect()
    }

    /// Fire the equipped weapon if cooldown and ammo allow
    pub fn try_fire<R: Rng + ?Sized>(
        shooter: &mut Combatant,
        aim: f32,
        extra_error: f32,
        now: u64,
        rng: &mut R,
        bullets: &mut BulletPool,
    ) -> FireOutcome {
        if !shooter.is_alive() {
            return FireOutcome::NotAlive;
        }

        if shooter.weapon.is_empty() {
            shooter.weapon.equip(WeaponKind::FALLBACK);
            return FireOutcome::OutOfAmmo;
        }

        let spec = shooter.weapon.kind.spec();
        if let Some(last) = shooter.weapon.last_fired {
            if now < last + spec.fire_interval_ms {
                return FireOutcome::CoolingDown;
            }
        }

        let weapon = shooter.weapon.kind;
        let dir = Vec2::from_angle(aim);
        let origin = shooter.pos + dir * MUZZLE_OFFSET;
        let angles = Self::pellet_angles(aim, weapon, extra_error, rng);
        Self::spawn_volley(bullets, &shooter.id, shooter.team, weapon, origin, &angles, now);

        // Recoil kicks the shooter back along the fire line
        shooter.pos = PhysicsSystem::clamp_to_arena(shooter.pos - dir * spec.recoil, UNIT_RADIUS);
        shooter.weapon.last_fired = Some(now);

        if let Some(ammo) = shooter.weapon.ammo.as_mut() {
            *ammo = ammo.saturating_sub(1);
            if *ammo == 0 {
                shooter.weapon.swap_at = Some(now + FALLBACK_SWAP_DELAY_MS);
            }
        }

        FireOutcome::Fired(Volley {
            owner_id: shooter.id.clone(),
            team: shooter.team,
            weapon,
            origin,
            angles,
        })
    }

    /// Spawn bullets for a volley, local or received from a peer
    pub fn spawn_volley(
        bullets: &mut BulletPool,
        owner_id: &str,
        team: Team,
        weapon: WeaponKind,
        origin: Vec2,
        angles: &[f32],
        now: u64,
    ) {
        for &angle in angles {
            bullets.spawn(BulletSpawn {
                owner_id: owner_id.to_string(),
                team,
                weapon,
                pos: origin,
                angle,
                expires_at: now + BULLET_LIFETIME_MS,
            });
        }
    }

    /// Presentation-requested weapon change; unknown ids are rejected untouched
    pub fn swap_weapon(c: &mut Combatant, key: &str) -> Result<WeaponKind, WeaponError> {
        let kind: WeaponKind = key.parse()?;
        c.weapon.equip(kind);
        Ok(kind)
    }

    /// Complete a pending fallback swap once its delay elapses
    pub fn tick_weapon(c: &mut Combatant, now: u64) {
        if let Some(at) = c.weapon.swap_at {
            if now >= at {
                c.weapon.equip(WeaponKind::FALLBACK);
            }
        }
    }

    /// Shields absorb first, overflow reduces health (clamped at zero)
    pub fn apply_damage(
        target: &mut Combatant,
        amount: f32,
        attacker: Option<&str>,
        now: u64,
    ) -> DamageOutcome {
        if !target.is_alive() || target.is_protected(now) || now < target.invulnerable_until {
            return DamageOutcome::Ignored;
        }

        let absorbed = amount.min(target.shield).max(0.0);
        target.shield -= absorbed;
        let overflow = (amount - absorbed).max(0.0);
        target.health = (target.health - overflow).max(0.0);

        target.invulnerable_until = now + INVULNERABILITY_MS;
        target.last_damaged_at = Some(now);
        if let Some(attacker) = attacker {
            target.last_attacker = Some(attacker.to_string());
        }

        if target.health <= 0.0 {
            DamageOutcome::Killed
        } else if overflow > 0.0 {
            DamageOutcome::Damaged
        } else {
            DamageOutcome::Absorbed
        }
    }

    /// Alive -> Respawning. Returns false when the combatant was already down.
    pub fn begin_death(c: &mut Combatant, now: u64) -> bool {
        if !c.is_alive() {
            return false;
        }
        c.health = 0.0;
        c.vel = Vec2::ZERO;
        c.visible = false;
        c.life = LifeState::Respawning {
            respawn_at: now + RESPAWN_DELAY_MS,
        };
        true
    }

    /// Whether the respawn delay has elapsed
    pub fn respawn_due(c: &Combatant, now: u64) -> bool {
        matches!(c.life, LifeState::Respawning { respawn_at } if now >= respawn_at)
    }

    /// Reset vitals, reposition, and reapply spawn protection
    pub fn respawn(c: &mut Combatant, at: Vec2, now: u64) {
        c.health = c.max_health;
        c.shield = c.max_shield;
        c.pos = at;
        c.vel = Vec2::ZERO;
        c.visible = true;
        c.life = LifeState::Alive;
        c.safe_until = now + SAFE_ZONE_MS;
        c.invulnerable_until = 0;
        c.last_attacker = None;
        c.weapon.refill();
    }

    /// Passive shield regeneration after a quiet period
    pub fn regen_shield(c: &mut Combatant, dt: f32, now: u64) {
        if !c.is_alive() || c.shield >= c.max_shield {
            return;
        }
        let quiet = c
            .last_damaged_at
            .map_or(true, |at| now >= at + SHIELD_REGEN_DELAY_MS);
        if quiet {
            c.shield = (c.shield + SHIELD_REGEN_PER_SEC * dt).min(c.max_shield);
        }
    }

    /// Trigger the class ability if off cooldown
    pub fn use_ability(c: &mut Combatant, now: u64, walls: &[Wall]) -> bool {
        if !c.is_alive() || now < c.ability_ready_at {
            return false;
        }

        let stats = ClassStats::for_class(c.class);
        match stats.ability {
            Ability::ShieldBurst => c.shield = c.max_shield,
            Ability::Dash => {
                let dir = Vec2::from_angle(c.angle);
                c.pos =
                    PhysicsSystem::move_with_walls(c.pos, dir * DASH_DISTANCE, UNIT_RADIUS, walls);
            }
            Ability::Fortify => {
                c.invulnerable_until = c.invulnerable_until.max(now + FORTIFY_MS);
            }
        }
        c.ability_ready_at = now + stats.ability_cooldown_ms;
        true
    }

    /// Apply a pickup to its collector
    pub fn collect(c: &mut Combatant, kind: PickupKind) -> PickupEffect {
        match kind {
            PickupKind::LuckBox => {
                c.weapon.refill();
                c.health = (c.health + LUCK_BOX_HEAL).min(c.max_health);
                c.score += LUCK_BOX_POINTS;
                PickupEffect::Restocked
            }
            PickupKind::WeaponBox => PickupEffect::BoxOpened,
            PickupKind::WeaponItem(weapon) => {
                c.weapon.equip(weapon);
                c.score += WEAPON_ITEM_POINTS;
                PickupEffect::Equipped(weapon)
            }
        }
    }
}
