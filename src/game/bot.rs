//! Bot AI - host-only steering, targeting and fire decisions

use rand::Rng;

use super::entity::{Combatant, EntityId, Team};
use super::physics::{PhysicsSystem, Vec2, Wall, ARENA_SIZE, UNIT_RADIUS};
use super::weapons::WeaponCategory;

/// Max distance at which a bot notices an enemy
pub const DETECTION_RADIUS: f32 = 700.0;
/// Enemy bullets closer than this are dodged
pub const BULLET_AVOID_RADIUS: f32 = 160.0;
/// Teammates closer than this repel each other
pub const CLUSTER_RADIUS: f32 = 90.0;
/// Health fraction under which a bot breaks off to find cover
pub const LOW_HEALTH_FRACTION: f32 = 0.3;
/// Patrol point counts as reached inside this distance
pub const PATROL_ARRIVE_RADIUS: f32 = 40.0;
/// Per-tick chance to pick a fresh patrol point early
pub const PATROL_REROLL_CHANCE: f64 = 0.005;
/// Base aim error (radians) at detection range, difficulty 1.0
pub const AIM_ERROR_BASE: f32 = 0.3;

const AVOID_WEIGHT: f32 = 3.0;
const SEPARATION_WEIGHT: f32 = 1.5;
const TARGET_WEIGHT: f32 = 1.0;
const OBJECTIVE_WEIGHT: f32 = 0.8;
const OBJECTIVE_WEIGHT_THREATENED: f32 = 0.3;
const STRAFE_WEIGHT: f32 = 0.6;
const COVER_CLEARANCE: f32 = 30.0;

/// Per-bot memory kept between ticks
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BotMind {
    pub target_id: Option<EntityId>,
    pub patrol_point: Option<Vec2>,
    /// Offsets this bot's strafe oscillation from its teammates'
    pub strafe_phase: f32,
}

/// What a bot can see of another combatant
#[derive(Debug, Clone)]
pub struct Contact {
    pub id: EntityId,
    pub team: Team,
    pub pos: Vec2,
    pub alive: bool,
    /// Inside spawn protection; never a valid fire target
    pub protected: bool,
}

/// An in-flight bullet a bot may need to dodge
#[derive(Debug, Clone, Copy)]
pub struct Threat {
    pub pos: Vec2,
    pub vel: Vec2,
    pub team: Team,
}

/// Shared per-tick inputs for every bot decision
pub struct BotContext<'a> {
    pub contacts: &'a [Contact],
    pub threats: &'a [Threat],
    pub walls: &'a [Wall],
    /// Objective center in zone-control modes
    pub objective: Option<Vec2>,
    pub difficulty: f32,
    pub now: u64,
}

/// Decision for one bot for one tick
#[derive(Debug, Clone, PartialEq)]
pub struct BotIntent {
    /// Unit movement direction; never zero
    pub move_dir: Vec2,
    pub face: f32,
    /// Aim angle and extra aim error, when the bot should pull the trigger
    pub fire: Option<(f32, f32)>,
}

/// Bot decision making
pub struct BotAi;

impl BotAi {
    /// Nearest living enemy within detection range
    pub fn acquire_target<'a>(bot: &Combatant, contacts: &'a [Contact]) -> Option<&'a Contact> {
        contacts
            .iter()
            .filter(|c| c.alive && c.id != bot.id && bot.team.is_hostile_to(c.team))
            .map(|c| (c, bot.pos.distance(c.pos)))
            .filter(|(_, d)| *d <= DETECTION_RADIUS)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(c, _)| c)
    }

    /// Sideways deflection away from enemy bullets heading this way
    pub fn bullet_avoidance(pos: Vec2, team: Team, threats: &[Threat]) -> Vec2 {
        let mut force = Vec2::ZERO;
        for threat in threats.iter().filter(|t| team.is_hostile_to(t.team)) {
            let to_bot = pos - threat.pos;
            let dist = to_bot.length();
            if dist > BULLET_AVOID_RADIUS || dist < 1e-3 {
                continue;
            }
            let heading = threat.vel.normalize_or_zero();
            if heading.dot(to_bot) <= 0.0 {
                continue; // moving away
            }
            let side = heading.perp();
            let sign = if side.dot(to_bot) >= 0.0 { 1.0 } else { -1.0 };
            force += side * (sign * (1.0 - dist / BULLET_AVOID_RADIUS));
        }
        force
    }

    /// Repulsion from teammates bunched too close
    pub fn teammate_separation(bot: &Combatant, contacts: &[Contact]) -> Vec2 {
        let mut force = Vec2::ZERO;
        for mate in contacts
            .iter()
            .filter(|c| c.alive && c.id != bot.id && c.team == bot.team)
        {
            let away = bot.pos - mate.pos;
            let dist = away.length();
            if dist < CLUSTER_RADIUS && dist > 1e-3 {
                force += away.normalize_or_zero() * (1.0 - dist / CLUSTER_RADIUS);
            }
        }
        force
    }

    /// Closest spot behind a wall that breaks line of sight to `threat`
    pub fn find_cover(pos: Vec2, threat: Vec2, walls: &[Wall]) -> Option<Vec2> {
        walls
            .iter()
            .filter_map(|wall| {
                let center = wall.center();
                let away = (center - threat).normalize_or_zero();
                if away == Vec2::ZERO {
                    return None;
                }
                let spot = PhysicsSystem::clamp_to_arena(
                    center + away * (wall.half_diagonal() + COVER_CLEARANCE),
                    UNIT_RADIUS,
                );
                let hidden = !PhysicsSystem::has_line_of_sight(spot, threat, walls);
                let clear = !walls.iter().any(|w| w.contains(spot, UNIT_RADIUS));
                (hidden && clear).then_some(spot)
            })
            .min_by(|a, b| pos.distance(*a).total_cmp(&pos.distance(*b)))
    }

    /// Preferred distance to a target by weapon category
    pub fn engagement_range(category: WeaponCategory) -> f32 {
        match category {
            WeaponCategory::Close => 170.0,
            WeaponCategory::Mid => 340.0,
            WeaponCategory::Far => 560.0,
        }
    }

    /// Hold optimal range and strafe around the target
    pub fn engagement_force(bot: &Combatant, target: Vec2, strafe_phase: f32, now: u64) -> Vec2 {
        let to_target = target - bot.pos;
        let dist = to_target.length();
        let dir = to_target.normalize_or_zero();
        let preferred = Self::engagement_range(bot.weapon.kind.spec().category);

        let radial = if dist > preferred * 1.15 {
            dir
        } else if dist < preferred * 0.85 {
            -dir
        } else {
            Vec2::ZERO
        };

        let t = now as f32 / 1000.0;
        let strafe = dir.perp() * ((t * 2.0 + strafe_phase).sin() * STRAFE_WEIGHT);
        radial + strafe
    }

    /// Cooldown multiplier; harder bots wait less between shots
    pub fn reaction_factor(difficulty: f32) -> f32 {
        (1.6 - 0.3 * difficulty).max(1.0)
    }

    /// Extra aim jitter beyond weapon spread, growing with distance, shrinking with difficulty
    pub fn aim_error(distance: f32, difficulty: f32) -> f32 {
        (distance / DETECTION_RADIUS) * AIM_ERROR_BASE / difficulty.max(0.25)
    }

    fn random_point<R: Rng + ?Sized>(walls: &[Wall], rng: &mut R) -> Vec2 {
        let margin = UNIT_RADIUS * 3.0;
        let mut point = Vec2::new(ARENA_SIZE * 0.5, ARENA_SIZE * 0.5);
        for _ in 0..16 {
            point = Vec2::new(
                rng.gen_range(margin..ARENA_SIZE - margin),
                rng.gen_range(margin..ARENA_SIZE - margin),
            );
            if !walls.iter().any(|w| w.contains(point, UNIT_RADIUS)) {
                break;
            }
        }
        point
    }

    /// Direction toward the patrol point, choosing a new one when missing, reached, or rerolled
    fn patrol_dir<R: Rng + ?Sized>(
        pos: Vec2,
        mind: &mut BotMind,
        walls: &[Wall],
        rng: &mut R,
    ) -> Vec2 {
        let stale = match mind.patrol_point {
            None => true,
            Some(p) => pos.distance(p) < PATROL_ARRIVE_RADIUS || rng.gen_bool(PATROL_REROLL_CHANCE),
        };
        if stale {
            mind.patrol_point = Some(Self::random_point(walls, rng));
        }

        let mut dir = mind
            .patrol_point
            .map(|p| (p - pos).normalize_or_zero())
            .unwrap_or(Vec2::ZERO);
        if dir == Vec2::ZERO {
            let p = Self::random_point(walls, rng);
            mind.patrol_point = Some(p);
            dir = (p - pos).normalize_or_zero();
        }
        if dir == Vec2::ZERO {
            dir = Vec2::from_angle(rng.gen_range(0.0..std::f32::consts::TAU));
        }
        dir
    }

    /// Decide movement, facing, and firing for one bot
    pub fn think<R: Rng + ?Sized>(
        bot: &mut Combatant,
        ctx: &BotContext<'_>,
        rng: &mut R,
    ) -> BotIntent {
        let mut mind = bot.mind.take().unwrap_or_default();

        let target = Self::acquire_target(bot, ctx.contacts).cloned();
        mind.target_id = target.as_ref().map(|t| t.id.clone());

        let mut force = Self::bullet_avoidance(bot.pos, bot.team, ctx.threats) * AVOID_WEIGHT
            + Self::teammate_separation(bot, ctx.contacts) * SEPARATION_WEIGHT;

        let mut face = bot.angle;
        let mut fire = None;

        match &target {
            Some(t) => {
                let to_target = t.pos - bot.pos;
                face = to_target.to_angle();

                let pull = if bot.health_fraction() < LOW_HEALTH_FRACTION {
                    match Self::find_cover(bot.pos, t.pos, ctx.walls) {
                        Some(cover) => (cover - bot.pos).normalize_or_zero(),
                        None => (-to_target).normalize_or_zero(),
                    }
                } else {
                    Self::engagement_force(bot, t.pos, mind.strafe_phase, ctx.now)
                };
                force += pull * TARGET_WEIGHT;

                if Self::can_shoot(bot, t, ctx) {
                    let error = Self::aim_error(to_target.length(), ctx.difficulty);
                    fire = Some((face, error));
                }
            }
            None => {
                let dir = Self::patrol_dir(bot.pos, &mut mind, ctx.walls, rng);
                force += dir;
                face = dir.to_angle();
            }
        }

        if let Some(center) = ctx.objective {
            let weight = if target.is_some() {
                OBJECTIVE_WEIGHT_THREATENED
            } else {
                OBJECTIVE_WEIGHT
            };
            force += (center - bot.pos).normalize_or_zero() * weight;
        }

        let mut move_dir = force.normalize_or_zero();
        if move_dir == Vec2::ZERO {
            move_dir = Self::patrol_dir(bot.pos, &mut mind, ctx.walls, rng);
        }

        bot.mind = Some(mind);
        BotIntent {
            move_dir,
            face,
            fire,
        }
    }

    /// Fire gate: live unprotected target, clear sight line, difficulty-scaled cooldown
    fn can_shoot(bot: &Combatant, target: &Contact, ctx: &BotContext<'_>) -> bool {
        if !target.alive || target.protected {
            return false;
        }
        if bot.pos.distance(target.pos) > DETECTION_RADIUS {
            return false;
        }
        if !PhysicsSystem::has_line_of_sight(bot.pos, target.pos, ctx.walls) {
            return false;
        }
        let interval = bot.weapon.kind.spec().fire_interval_ms as f32
            * Self::reaction_factor(ctx.difficulty);
        match bot.weapon.last_fired {
            Some(last) => ctx.now as f32 >= last as f32 + interval,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::weapons::WeaponKind;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn bot_at(pos: Vec2) -> Combatant {
        let mut b = Combatant::bot(
            "bot-1".into(),
            "Bot 1".into(),
            Team::Bravo,
            pos,
            WeaponKind::Smg,
            1.0,
            0,
        );
        b.safe_until = 0;
        b
    }

    fn contact(id: &str, team: Team, pos: Vec2) -> Contact {
        Contact {
            id: id.into(),
            team,
            pos,
            alive: true,
            protected: false,
        }
    }

    fn ctx<'a>(contacts: &'a [Contact], walls: &'a [Wall]) -> BotContext<'a> {
        BotContext {
            contacts,
            threats: &[],
            walls,
            objective: None,
            difficulty: 1.0,
            now: 10_000,
        }
    }

    #[test]
    fn nearest_enemy_in_range_is_targeted() {
        let bot = bot_at(Vec2::new(500.0, 500.0));
        let contacts = vec![
            contact("mate", Team::Bravo, Vec2::new(510.0, 500.0)),
            contact("far", Team::Alpha, Vec2::new(900.0, 500.0)),
            contact("near", Team::Alpha, Vec2::new(700.0, 500.0)),
            contact("out", Team::Alpha, Vec2::new(1900.0, 1900.0)),
        ];
        let target = BotAi::acquire_target(&bot, &contacts).map(|c| c.id.as_str());
        assert_eq!(target, Some("near"));
    }

    #[test]
    fn protected_target_is_never_fired_upon() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let mut bot = bot_at(Vec2::new(500.0, 500.0));
        let mut enemy = contact("p1", Team::Alpha, Vec2::new(700.0, 500.0));
        enemy.protected = true;
        let contacts = vec![enemy];
        let intent = BotAi::think(&mut bot, &ctx(&contacts, &[]), &mut rng);
        assert!(intent.fire.is_none());

        let contacts = vec![contact("p1", Team::Alpha, Vec2::new(700.0, 500.0))];
        let intent = BotAi::think(&mut bot, &ctx(&contacts, &[]), &mut rng);
        assert!(intent.fire.is_some());
    }

    #[test]
    fn walls_block_fire() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let mut bot = bot_at(Vec2::new(500.0, 500.0));
        let walls = [Wall::new(580.0, 300.0, 40.0, 400.0)];
        let contacts = vec![contact("p1", Team::Alpha, Vec2::new(700.0, 500.0))];
        let intent = BotAi::think(&mut bot, &ctx(&contacts, &walls), &mut rng);
        assert!(intent.fire.is_none());
    }

    #[test]
    fn wounded_bot_retreats_without_cover() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let mut bot = bot_at(Vec2::new(500.0, 500.0));
        bot.health = bot.max_health * 0.1;
        let contacts = vec![contact("p1", Team::Alpha, Vec2::new(700.0, 500.0))];
        let intent = BotAi::think(&mut bot, &ctx(&contacts, &[]), &mut rng);
        assert!(intent.move_dir.x < 0.0);
    }

    #[test]
    fn cover_spot_hides_from_threat() {
        let walls = [Wall::new(900.0, 900.0, 100.0, 200.0)];
        let threat = Vec2::new(600.0, 1000.0);
        let cover = BotAi::find_cover(Vec2::new(800.0, 1000.0), threat, &walls);
        let spot = cover.expect("cover behind the wall");
        assert!(spot.x > 1000.0);
        assert!(!PhysicsSystem::has_line_of_sight(spot, threat, &walls));
    }

    #[test]
    fn idle_bot_lazily_picks_patrol_point_and_moves() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let mut bot = bot_at(Vec2::new(500.0, 500.0));
        bot.mind = None;
        let intent = BotAi::think(&mut bot, &ctx(&[], &[]), &mut rng);
        assert_ne!(intent.move_dir, Vec2::ZERO);
        assert!(bot.mind.as_ref().and_then(|m| m.patrol_point).is_some());
        assert!(intent.fire.is_none());
    }

    #[test]
    fn incoming_bullet_deflects_sideways() {
        let threats = [Threat {
            pos: Vec2::new(400.0, 500.0),
            vel: Vec2::new(900.0, 0.0),
            team: Team::Alpha,
        }];
        let force = BotAi::bullet_avoidance(Vec2::new(500.0, 510.0), Team::Bravo, &threats);
        assert!(force.y > 0.0);
        assert!(force.x.abs() < 1e-4);

        let friendly = BotAi::bullet_avoidance(Vec2::new(500.0, 510.0), Team::Alpha, &threats);
        assert_eq!(friendly, Vec2::ZERO);
    }

    #[test]
    fn difficulty_tightens_aim_and_speeds_fire() {
        assert!(BotAi::aim_error(400.0, 2.0) < BotAi::aim_error(400.0, 1.0));
        assert!(BotAi::aim_error(600.0, 1.0) > BotAi::aim_error(200.0, 1.0));
        assert!(BotAi::reaction_factor(2.0) <= BotAi::reaction_factor(0.5));
    }
}
