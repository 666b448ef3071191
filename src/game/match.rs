//! Match state and the per-peer tick loop

use chrono::{DateTime, Utc};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::util::time::{
    delta_micros, tick_delta, Timer, PLAYER_SYNC_INTERVAL_MS, TICK_DURATION_MICROS,
};
use crate::ws::protocol::{BoxInfo, ItemInfo, ObjectiveInfo, PeerMsg, WorldSnapshot};
use crate::ws::{Outbound, Transport};

use super::combat::{
    CombatSystem, DamageOutcome, FireOutcome, PickupEffect, BULLET_RADIUS, KILL_POINTS,
    PICKUP_RADIUS,
};
use super::entity::{
    Combatant, CombatantKind, Destroyed, EntityId, EntityRegistry, LifeState, ObjectiveZone,
    Pickup, PickupKind, PlayerClass, Team,
};
use super::physics::{
    ArenaMap, PhysicsSystem, Vec2, ARENA_SIZE, INTERPOLATION_FACTOR, MIN_SEPARATION, UNIT_RADIUS,
};
use super::replication::{self, Replicator};
use super::role::NetworkRole;
use super::rules::{
    GameMode, MatchConfig, MatchLatch, MatchResult, ScoringRule, Standing, WinEvaluator,
    HARDPOINT_RADIUS,
};
use super::snapshot::{Cadence, HudSnapshot};
use super::weapons::WeaponKind;
use super::PlayerInput;

/// Bounded queue between network tasks and the match task
pub const COMMAND_QUEUE_CAPACITY: usize = 1024;
/// Boxes placed when the host starts a match
pub const INITIAL_BOXES: usize = 3;
/// Spawner stops while this many boxes are on the floor
pub const MAX_BOXES: usize = 6;
pub const BOX_SPAWN_INTERVAL_MS: u64 = 15_000;
/// Frozen frames keep going this long after match over so final messages flush
pub const MATCH_OVER_LINGER_MS: u64 = 2000;

const SPAWN_JITTER: f32 = 40.0;
const ITEM_DROP_OFFSET: f32 = 60.0;

/// Local player identity for a new match
#[derive(Debug, Clone)]
pub struct PlayerSetup {
    pub id: EntityId,
    pub name: String,
    pub team: Team,
    pub class: PlayerClass,
}

/// Intents queued for the match task, drained once per tick
#[derive(Debug, Clone)]
pub enum MatchCommand {
    PeerJoined { peer_id: String },
    PeerLeft { peer_id: String },
    Message { from: String, msg: PeerMsg },
    /// Presentation weapon-swap request
    SwapWeapon { key: String },
}

/// Outcome payload handed to the shell
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchReport {
    #[serde(flatten)]
    pub result: MatchResult,
    pub kills: u32,
    pub points: u32,
    pub alpha_score: u32,
    pub bravo_score: u32,
    pub finished_at: DateTime<Utc>,
}

/// Discrete events for the lobby/shell
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    Ready { peer_id: String, audio_enabled: bool },
    MatchComplete(MatchReport),
    ConnectionStatus { status: String },
}

/// Match state (owned by the match task)
pub struct MatchState {
    pub config: MatchConfig,
    pub map: ArenaMap,
    pub registry: EntityRegistry,
    pub rng: ChaCha8Rng,
    /// Match clock in milliseconds; stops advancing once the match is over
    pub clock_ms: u64,
    /// Sub-millisecond remainder carried between ticks
    clock_carry_us: u64,
    pub tick: u64,
    pub alpha_score: u32,
    pub bravo_score: u32,
    /// Mission lives left
    pub lives: u32,
    pub items_collected: u32,
    pub latch: MatchLatch,
}

impl MatchState {
    pub fn new(config: MatchConfig, player: PlayerSetup, seed: u64) -> Self {
        let map = ArenaMap::for_id(&config.map_id);
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let spawn = Self::pick_spawn(&map, player.team, &mut rng);
        let local = Combatant::player(player.id, player.name, player.team, player.class, spawn, 0);
        let lives = config.lives;

        Self {
            config,
            map,
            registry: EntityRegistry::new(local),
            rng,
            clock_ms: 0,
            clock_carry_us: 0,
            tick: 0,
            alpha_score: 0,
            bravo_score: 0,
            lives,
            items_collected: 0,
            latch: MatchLatch::default(),
        }
    }

    pub fn local_id(&self) -> EntityId {
        self.registry.local_id().to_string()
    }

    /// Fresh stable id for a spawned object, drawn from the match RNG
    pub fn new_object_id(&mut self, prefix: &str) -> EntityId {
        let id = uuid::Builder::from_random_bytes(self.rng.gen()).into_uuid();
        format!("{prefix}-{}", id.simple())
    }

    fn pick_spawn(map: &ArenaMap, team: Team, rng: &mut ChaCha8Rng) -> Vec2 {
        let points = match team {
            Team::Bravo => &map.bravo_spawns,
            Team::Alpha | Team::Neutral => &map.alpha_spawns,
        };
        let Some(&base) = points.get(rng.gen_range(0..points.len().max(1))) else {
            return Vec2::new(UNIT_RADIUS * 4.0, UNIT_RADIUS * 4.0);
        };
        let jittered = PhysicsSystem::clamp_to_arena(
            base + Vec2::new(
                rng.gen_range(-SPAWN_JITTER..=SPAWN_JITTER),
                rng.gen_range(-SPAWN_JITTER..=SPAWN_JITTER),
            ),
            UNIT_RADIUS,
        );
        if map.blocked(jittered, UNIT_RADIUS) {
            base
        } else {
            jittered
        }
    }

    pub fn spawn_point(&mut self, team: Team) -> Vec2 {
        Self::pick_spawn(&self.map, team, &mut self.rng)
    }

    /// Random point clear of every wall
    pub fn random_open_point(&mut self) -> Vec2 {
        let margin = UNIT_RADIUS * 4.0;
        for _ in 0..32 {
            let p = Vec2::new(
                self.rng.gen_range(margin..ARENA_SIZE - margin),
                self.rng.gen_range(margin..ARENA_SIZE - margin),
            );
            if !self.map.blocked(p, UNIT_RADIUS * 2.0) {
                return p;
            }
        }
        self.spawn_point(Team::Alpha)
    }

    // ---- host-side world building ----

    /// Bots, starting boxes, and the hardpoint zone
    pub fn populate(&mut self) {
        for (team, count) in [
            (Team::Alpha, self.config.alpha_bots),
            (Team::Bravo, self.config.bravo_bots),
        ] {
            for n in 1..=count {
                self.spawn_bot(team, n);
            }
        }
        for _ in 0..INITIAL_BOXES {
            self.spawn_box();
        }
        if self.config.mode.has_objective_zone() {
            let center = self.random_open_point();
            let id = self.new_object_id("zone");
            self.registry.objective = Some(ObjectiveZone {
                id,
                center,
                radius: HARDPOINT_RADIUS,
                holder: Team::Neutral,
            });
        }
        info!(
            bots = self.registry.bots().count(),
            boxes = self.registry.pickups().count(),
            "World populated"
        );
    }

    pub fn spawn_bot(&mut self, team: Team, n: u32) -> Option<EntityId> {
        let id = self.new_object_id("bot");
        let pos = self.spawn_point(team);
        let weapon = match self.rng.gen_range(0..=WeaponKind::DROPPABLE.len()) {
            0 => WeaponKind::FALLBACK,
            i => WeaponKind::DROPPABLE[i - 1],
        };
        let bot = Combatant::bot(
            id.clone(),
            format!("{team} Bot {n}"),
            team,
            pos,
            weapon,
            self.config.difficulty,
            self.clock_ms,
        );
        self.registry.spawn_combatant(bot).then_some(id)
    }

    /// Drop a random box somewhere open
    pub fn spawn_box(&mut self) -> Option<BoxInfo> {
        let kind = if self.rng.gen_bool(0.5) {
            PickupKind::LuckBox
        } else {
            PickupKind::WeaponBox
        };
        let pickup = Pickup {
            id: self.new_object_id("box"),
            kind,
            pos: self.random_open_point(),
        };
        let info = replication::box_info(&pickup);
        self.registry.spawn_pickup(pickup).then_some(info).flatten()
    }

    /// Turn an opened weapon box into a random weapon item next to it
    pub fn spawn_weapon_item(&mut self, near: Vec2) -> Option<ItemInfo> {
        let weapon = WeaponKind::DROPPABLE[self.rng.gen_range(0..WeaponKind::DROPPABLE.len())];
        let angle = self.rng.gen_range(0.0..std::f32::consts::TAU);
        let offset = Vec2::from_angle(angle) * ITEM_DROP_OFFSET;
        let pos = PhysicsSystem::move_with_walls(near, offset, UNIT_RADIUS, &self.map.walls);
        let pickup = Pickup {
            id: self.new_object_id("item"),
            kind: PickupKind::WeaponItem(weapon),
            pos,
        };
        let info = replication::item_info(&pickup);
        self.registry.spawn_pickup(pickup).then_some(info).flatten()
    }

    pub fn box_count(&self) -> usize {
        self.registry
            .pickups()
            .filter(|p| matches!(p.kind, PickupKind::LuckBox | PickupKind::WeaponBox))
            .count()
    }

    /// Full state for a late joiner
    pub fn world_snapshot(&self) -> WorldSnapshot {
        WorldSnapshot {
            bots: self.registry.bots().map(replication::bot_info).collect(),
            boxes: self.registry.pickups().filter_map(replication::box_info).collect(),
            items: self.registry.pickups().filter_map(replication::item_info).collect(),
            alpha: self.alpha_score,
            bravo: self.bravo_score,
            objective: self.registry.objective.as_ref().map(|z| ObjectiveInfo {
                x: z.center.x,
                y: z.center.y,
                radius: z.radius,
            }),
        }
    }

    /// This peer's own `sync` message
    pub fn local_sync(&self) -> Option<PeerMsg> {
        self.registry.local().map(|me| PeerMsg::Sync {
            id: me.id.clone(),
            name: me.name.clone(),
            team: me.team,
            x: me.pos.x,
            y: me.pos.y,
            angle: me.angle,
            weapon: me.weapon.kind.key().to_string(),
            alive: me.is_alive(),
        })
    }

    // ---- scoring ----

    /// Apply the mode's scoring rule for one kill. Returns true when a team counter moved.
    pub fn credit_kill(&mut self, victim_id: &str, killer_id: Option<&str>) -> bool {
        let Some(killer_id) = killer_id else {
            return false;
        };
        let victim_team = self.registry.combatant(victim_id).map(|c| c.team);
        let killer_team = match self.registry.combatant_mut(killer_id) {
            Some(killer) => {
                killer.kills += 1;
                killer.score += KILL_POINTS;
                Some(killer.team)
            }
            None => victim_team.map(Team::opponent),
        };

        if self.config.mode.scoring() != ScoringRule::TeamScore {
            return false;
        }
        match killer_team {
            Some(Team::Alpha) => self.alpha_score += 1,
            Some(Team::Bravo) => self.bravo_score += 1,
            _ => return false,
        }
        true
    }

    /// A peer reported that our player got the kill
    pub fn credit_local_kill(&mut self) {
        if let Some(me) = self.registry.local_mut() {
            me.kills += 1;
            me.score += KILL_POINTS;
        }
    }

    pub fn score_update(&self) -> PeerMsg {
        PeerMsg::ScoreUpdate {
            alpha: self.alpha_score,
            bravo: self.bravo_score,
        }
    }

    pub fn standing(&self) -> Standing {
        let local = self.registry.local();
        Standing {
            alpha: self.alpha_score,
            bravo: self.bravo_score,
            local_kills: local.map_or(0, |c| c.kills),
            items_collected: self.items_collected,
            elapsed_ms: self.clock_ms,
            lives_exhausted: self.config.mode.is_mission() && self.lives == 0,
        }
    }

    pub fn evaluate(&self) -> Option<MatchResult> {
        WinEvaluator::evaluate(&self.config, &self.standing())
    }

    /// Team that reached the limit in a team mode
    pub fn team_limit_reached(&self) -> Option<Team> {
        if self.config.mode.is_mission() {
            return None;
        }
        WinEvaluator::team_winner(self.config.score_limit, self.alpha_score, self.bravo_score)
    }

    /// Trip the match-over latch; true only the first time.
    /// `success` is judged from the local player's team.
    pub fn finish(&mut self, result: MatchResult) -> bool {
        let result = match self.registry.local() {
            Some(me) => result.seen_by(me.team),
            None => result,
        };
        let reason = result.reason.clone();
        let tripped = self.latch.trip(result);
        if tripped {
            info!(tick = self.tick, reason = %reason, "Match over");
        }
        tripped
    }

    // ---- local-player helpers ----

    pub fn swap_local_weapon(&mut self, key: &str) {
        let Some(me) = self.registry.local_mut() else {
            return;
        };
        match CombatSystem::swap_weapon(me, key) {
            Ok(kind) => debug!(weapon = %kind, "Weapon swapped"),
            Err(e) => debug!(error = %e, "Weapon swap ignored"),
        }
    }

    /// Purge a disconnected peer's player
    pub fn drop_peer(&mut self, peer_id: &str) {
        if self.registry.remove_peer(peer_id) {
            info!(peer_id = %peer_id, "Remote player removed");
        }
    }

    /// Local player death: spend a life, then let the role credit the killer
    fn kill_local(
        &mut self,
        attacker: Option<String>,
        role: &mut dyn NetworkRole,
        out: &mut Vec<Outbound>,
    ) {
        let now = self.clock_ms;
        let mission = self.config.mode.is_mission();
        let Some(me) = self.registry.local_mut() else {
            return;
        };
        if !CombatSystem::begin_death(me, now) {
            return;
        }
        if mission {
            self.lives = self.lives.saturating_sub(1);
            if self.lives == 0 {
                me.life = LifeState::Eliminated;
            }
        }
        info!(killer = ?attacker, lives = self.lives, "Local player down");

        let victim = self.local_id();
        role.credit_kill(self, &victim, attacker.as_deref(), out);
    }

    /// Move every entity of `kind` toward its latest network target
    pub fn interpolate(&mut self, kind: CombatantKind) {
        for c in self.registry.combatants_mut().filter(|c| c.kind == kind) {
            if let Some((target, angle)) = c.net_target {
                c.pos = PhysicsSystem::lerp(c.pos, target, INTERPOLATION_FACTOR);
                c.angle = PhysicsSystem::lerp_angle(c.angle, angle, INTERPOLATION_FACTOR);
            }
        }
    }

    // ---- tick ----

    /// Advance one simulation tick. Does nothing once the match is over.
    pub fn step(
        &mut self,
        input: &PlayerInput,
        dt: f32,
        role: &mut dyn NetworkRole,
        out: &mut Vec<Outbound>,
    ) {
        if self.latch.is_over() {
            return;
        }
        self.tick += 1;
        let elapsed_us = self.clock_carry_us + delta_micros(dt);
        self.clock_ms += elapsed_us / 1000;
        self.clock_carry_us = elapsed_us % 1000;

        self.step_local(input, dt, out);
        role.drive_bots(self, dt, out);
        self.interpolate(CombatantKind::RemotePlayer);
        self.step_bullets(dt, role, out);
        self.step_pickups(role, out);
        self.separate_units();
        self.step_local_respawn();
        role.periodic(self, out);
    }

    fn step_local(&mut self, input: &PlayerInput, dt: f32, out: &mut Vec<Outbound>) {
        let now = self.clock_ms;
        let local_id = self.local_id();
        let Some((me, bullets)) = self.registry.shooter_mut(&local_id) else {
            return;
        };

        CombatSystem::tick_weapon(me, now);
        CombatSystem::regen_shield(me, dt, now);
        if !me.is_alive() {
            me.vel = Vec2::ZERO;
            return;
        }

        CombatSystem::apply_movement(me, input, dt, &self.map.walls);
        if input.ability && CombatSystem::use_ability(me, now, &self.map.walls) {
            debug!(class = ?me.class, "Ability used");
        }

        if input.fire {
            let aim = input.aim.unwrap_or(me.angle);
            match CombatSystem::try_fire(me, aim, 0.0, now, &mut self.rng, bullets) {
                FireOutcome::Fired(volley) => {
                    out.push(Outbound::broadcast(replication::fire_msg(&volley)));
                }
                FireOutcome::OutOfAmmo => debug!("Out of ammo, fallback equipped"),
                FireOutcome::CoolingDown | FireOutcome::NotAlive => {}
            }
        }
    }

    fn step_bullets(&mut self, dt: f32, role: &mut dyn NetworkRole, out: &mut Vec<Outbound>) {
        let now = self.clock_ms;
        let targets: Vec<(EntityId, Team, Vec2, CombatantKind)> = self
            .registry
            .combatants()
            .filter(|c| c.is_alive())
            .map(|c| (c.id.clone(), c.team, c.pos, c.kind))
            .collect();

        let mut spent = Vec::new();
        let mut hits = Vec::new();
        for bullet in self.registry.bullets.active_mut() {
            let from = bullet.pos;
            bullet.pos += bullet.vel * dt;

            if now >= bullet.expires_at || !PhysicsSystem::in_arena(bullet.pos) {
                spent.push(bullet.slot);
                continue;
            }
            if self
                .map
                .walls
                .iter()
                .any(|w| PhysicsSystem::segment_hits_wall(from, bullet.pos, w))
            {
                spent.push(bullet.slot);
                continue;
            }

            let struck = targets.iter().find(|(id, team, pos, _)| {
                *id != bullet.owner_id
                    && bullet.team.is_hostile_to(*team)
                    && PhysicsSystem::segment_hits_circle(
                        from,
                        bullet.pos,
                        *pos,
                        BULLET_RADIUS + UNIT_RADIUS,
                    )
            });
            if let Some((id, _, _, kind)) = struck {
                spent.push(bullet.slot);
                hits.push((id.clone(), *kind, bullet.owner_id.clone(), bullet.damage));
            }
        }
        for slot in spent {
            self.registry.bullets.release(slot);
        }

        for (target_id, kind, owner_id, base_damage) in hits {
            let damage = CombatSystem::scaled_damage(base_damage, self.config.difficulty);
            match kind {
                CombatantKind::Player => {
                    let Some(me) = self.registry.local_mut() else {
                        continue;
                    };
                    if CombatSystem::apply_damage(me, damage, Some(&owner_id), now)
                        == DamageOutcome::Killed
                    {
                        self.kill_local(Some(owner_id), role, out);
                    }
                }
                CombatantKind::Bot => {
                    role.resolve_bot_hit(self, &target_id, &owner_id, damage, out)
                }
                // The victim's own peer resolves damage to its player
                CombatantKind::RemotePlayer => {}
            }
        }
    }

    fn step_pickups(&mut self, role: &mut dyn NetworkRole, out: &mut Vec<Outbound>) {
        let Some(me) = self.registry.local().filter(|c| c.is_alive()) else {
            return;
        };
        let pos = me.pos;
        let touched: Vec<EntityId> = self
            .registry
            .pickups()
            .filter(|p| PhysicsSystem::check_overlap(pos, UNIT_RADIUS, p.pos, PICKUP_RADIUS))
            .map(|p| p.id.clone())
            .collect();

        for id in touched {
            let Destroyed::Pickup(pickup) = self.registry.destroy(&id) else {
                continue;
            };
            let Some(me) = self.registry.local_mut() else {
                return;
            };
            let effect = CombatSystem::collect(me, pickup.kind);
            self.items_collected += 1;
            debug!(pickup_id = %pickup.id, effect = ?effect, "Pickup collected");

            out.push(Outbound::broadcast(PeerMsg::DestroyObject {
                id: pickup.id.clone(),
            }));
            if effect == PickupEffect::BoxOpened {
                role.open_weapon_box(self, &pickup, out);
            }
        }
    }

    /// Soft pairwise push-apart so units never stack
    fn separate_units(&mut self) {
        let units: Vec<(EntityId, Vec2)> = self
            .registry
            .combatants()
            .filter(|c| c.is_alive())
            .map(|c| (c.id.clone(), c.pos))
            .collect();

        let mut pushes = vec![Vec2::ZERO; units.len()];
        for i in 0..units.len() {
            for j in (i + 1)..units.len() {
                let (da, db) =
                    PhysicsSystem::separation_push(units[i].1, units[j].1, MIN_SEPARATION);
                pushes[i] += da;
                pushes[j] += db;
            }
        }

        for ((id, _), push) in units.iter().zip(pushes) {
            if push == Vec2::ZERO {
                continue;
            }
            if let Some(c) = self.registry.combatant_mut(id) {
                c.pos = PhysicsSystem::move_with_walls(c.pos, push, UNIT_RADIUS, &self.map.walls);
            }
        }
    }

    fn step_local_respawn(&mut self) {
        let now = self.clock_ms;
        let Some(team) = self
            .registry
            .local()
            .filter(|c| CombatSystem::respawn_due(c, now))
            .map(|c| c.team)
        else {
            return;
        };
        let at = self.spawn_point(team);
        if let Some(me) = self.registry.local_mut() {
            CombatSystem::respawn(me, at, now);
            info!("Local player respawned");
        }
    }

    fn report(&self) -> Option<MatchReport> {
        let result = self.latch.result()?.clone();
        let local = self.registry.local();
        Some(MatchReport {
            result,
            kills: local.map_or(0, |c| c.kills),
            points: local.map_or(0, |c| c.score),
            alpha_score: self.alpha_score,
            bravo_score: self.bravo_score,
            finished_at: Utc::now(),
        })
    }
}

/// Handle held by the shell and the network tasks
#[derive(Clone)]
pub struct MatchHandle {
    pub commands: mpsc::Sender<MatchCommand>,
    pub input: Arc<watch::Sender<PlayerInput>>,
    pub hud: watch::Receiver<HudSnapshot>,
    pub lifecycle: broadcast::Sender<LifecycleEvent>,
}

impl MatchHandle {
    pub fn set_input(&self, input: PlayerInput) {
        self.input.send_replace(input);
    }

    pub fn hud(&self) -> HudSnapshot {
        self.hud.borrow().clone()
    }

    pub fn subscribe_lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.lifecycle.subscribe()
    }

    /// Publish a human-readable connection status
    pub fn connection_status(&self, status: &str) {
        info!(status = %status, "Connection status");
        let _ = self.lifecycle.send(LifecycleEvent::ConnectionStatus {
            status: status.to_string(),
        });
    }
}

/// The match task: sole writer of `MatchState`
pub struct GameMatch {
    state: MatchState,
    role: Box<dyn NetworkRole>,
    transport: Arc<dyn Transport>,
    commands_rx: mpsc::Receiver<MatchCommand>,
    input_rx: watch::Receiver<PlayerInput>,
    hud_tx: watch::Sender<HudSnapshot>,
    lifecycle_tx: broadcast::Sender<LifecycleEvent>,
    sync_cadence: Cadence,
    peer_id: String,
    audio_enabled: bool,
    over_since: Option<Instant>,
}

impl GameMatch {
    pub fn new(
        state: MatchState,
        role: Box<dyn NetworkRole>,
        transport: Arc<dyn Transport>,
        peer_id: String,
        audio_enabled: bool,
    ) -> (Self, MatchHandle) {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let (input_tx, input_rx) = watch::channel(PlayerInput::default());
        let (hud_tx, hud_rx) = watch::channel(HudSnapshot::capture(&state));
        let (lifecycle_tx, _) = broadcast::channel(64);

        let handle = MatchHandle {
            commands: commands_tx,
            input: Arc::new(input_tx),
            hud: hud_rx,
            lifecycle: lifecycle_tx.clone(),
        };

        let game_match = Self {
            state,
            role,
            transport,
            commands_rx,
            input_rx,
            hud_tx,
            lifecycle_tx,
            sync_cadence: Cadence::new(PLAYER_SYNC_INTERVAL_MS),
            peer_id,
            audio_enabled,
            over_since: None,
        };

        (game_match, handle)
    }

    /// Run the tick loop until the match is over (plus a short linger) or all handles drop
    pub async fn run(mut self) {
        info!(
            peer_id = %self.peer_id,
            role = self.role.name(),
            mode = self.state.config.mode.label(),
            "Match started"
        );
        self.role.start(&mut self.state);
        let _ = self.lifecycle_tx.send(LifecycleEvent::Ready {
            peer_id: self.peer_id.clone(),
            audio_enabled: self.audio_enabled,
        });

        let mut tick_interval = interval(Duration::from_micros(TICK_DURATION_MICROS));
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let dt = tick_delta();
        let mut out = Vec::new();

        loop {
            tick_interval.tick().await;
            let tick_timer = Timer::new();

            if !self.drain_commands(&mut out) {
                info!(peer_id = %self.peer_id, "Command channel closed, stopping match");
                break;
            }

            let input = self.input_rx.borrow().clone();
            self.state.step(&input, dt, self.role.as_mut(), &mut out);

            if !self.state.latch.is_over() && self.sync_cadence.due(self.state.clock_ms) {
                if let Some(sync) = self.state.local_sync() {
                    out.push(Outbound::broadcast(sync));
                }
            }

            for outbound in out.drain(..) {
                self.transport.deliver(outbound);
            }
            self.hud_tx.send_replace(HudSnapshot::capture(&self.state));

            let spent_ms = tick_timer.elapsed_ms();
            if spent_ms > TICK_DURATION_MICROS / 1000 {
                warn!(tick = self.state.tick, spent_ms, "Tick overran its budget");
            }

            match self.over_since {
                None if self.state.latch.is_over() => {
                    self.over_since = Some(Instant::now());
                    if let Some(report) = self.state.report() {
                        info!(
                            success = report.result.success,
                            winner = ?report.result.winner,
                            kills = report.kills,
                            "Match complete"
                        );
                        let _ = self.lifecycle_tx.send(LifecycleEvent::MatchComplete(report));
                    }
                }
                Some(since) if since.elapsed() >= Duration::from_millis(MATCH_OVER_LINGER_MS) => {
                    info!(peer_id = %self.peer_id, "Match ended");
                    break;
                }
                _ => {}
            }
        }
    }

    /// Apply every queued command; false once all senders are gone
    fn drain_commands(&mut self, out: &mut Vec<Outbound>) -> bool {
        loop {
            match self.commands_rx.try_recv() {
                Ok(cmd) => self.handle_command(cmd, out),
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            }
        }
    }

    fn handle_command(&mut self, cmd: MatchCommand, out: &mut Vec<Outbound>) {
        match cmd {
            MatchCommand::PeerJoined { peer_id } => {
                info!(peer_id = %peer_id, "Peer joined match");
                if let Some(welcome) = self.role.welcome(&self.state, &peer_id) {
                    out.push(welcome);
                }
            }
            MatchCommand::PeerLeft { peer_id } => {
                info!(peer_id = %peer_id, "Peer left match");
                self.role.on_peer_left(&mut self.state, &peer_id, out);
            }
            MatchCommand::Message { from, msg } => {
                Replicator::apply(&mut self.state, self.role.as_mut(), &from, msg, out);
            }
            MatchCommand::SwapWeapon { key } => self.state.swap_local_weapon(&key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::combat::RESPAWN_DELAY_MS;
    use crate::game::role::{ClientRole, HostRole};
    use crate::ws::transport::{Offline, Target};

    fn setup(team: Team) -> PlayerSetup {
        PlayerSetup {
            id: "me".into(),
            name: "Me".into(),
            team,
            class: PlayerClass::Assault,
        }
    }

    fn open_config(mode: GameMode) -> MatchConfig {
        MatchConfig {
            mode,
            map_id: "open".into(),
            alpha_bots: 0,
            bravo_bots: 0,
            ..MatchConfig::default()
        }
    }

    fn exposed(state: &mut MatchState) {
        let me = state.registry.local_mut().unwrap();
        me.safe_until = 0;
        me.shield = 0.0;
    }

    fn enemy_bot(state: &mut MatchState, id: &str, pos: Vec2) {
        let mut bot =
            Combatant::bot(id.into(), id.into(), Team::Bravo, pos, WeaponKind::Pistol, 1.0, 0);
        bot.safe_until = 0;
        state.registry.spawn_combatant(bot);
    }

    #[test]
    fn elimination_ends_on_the_kill_that_reaches_target() {
        let mut config = open_config(GameMode::Elimination);
        config.target_value = 5;
        let mut state = MatchState::new(config, setup(Team::Alpha), 1);
        let mut role = HostRole::new(0);
        let mut out = Vec::new();

        for n in 0..4 {
            enemy_bot(&mut state, &format!("b{n}"), Vec2::new(1500.0, 1500.0));
            state.credit_kill(&format!("b{n}"), Some("me"));
        }
        state.step(&PlayerInput::default(), tick_delta(), &mut role, &mut out);
        assert!(!state.latch.is_over());

        state.credit_kill("b0", Some("me"));
        state.step(&PlayerInput::default(), tick_delta(), &mut role, &mut out);
        assert!(state.latch.is_over());
        assert_eq!(state.registry.local().unwrap().kills, 5);
    }

    #[test]
    fn nothing_moves_after_match_over() {
        let mut state =
            MatchState::new(open_config(GameMode::TeamDeathmatch), setup(Team::Alpha), 2);
        let mut role = HostRole::new(0);
        let mut out = Vec::new();
        state.finish(MatchResult::team_win(Team::Alpha));

        let before = state.registry.local().unwrap().pos;
        let input = PlayerInput {
            move_x: 1.0,
            fire: true,
            ..PlayerInput::default()
        };
        state.step(&input, tick_delta(), &mut role, &mut out);
        assert_eq!(state.registry.local().unwrap().pos, before);
        assert_eq!(state.registry.bullets.active_count(), 0);
        assert!(out.is_empty());
    }

    #[test]
    fn firing_broadcasts_a_fire_event_immediately() {
        let mut state =
            MatchState::new(open_config(GameMode::TeamDeathmatch), setup(Team::Alpha), 3);
        let mut role = HostRole::new(0);
        let mut out = Vec::new();
        let input = PlayerInput {
            aim: Some(0.5),
            fire: true,
            ..PlayerInput::default()
        };
        state.step(&input, tick_delta(), &mut role, &mut out);
        assert!(out
            .iter()
            .any(|o| o.target == Target::Broadcast && matches!(o.msg, PeerMsg::Fire { .. })));
        assert_eq!(state.registry.bullets.active_count(), 1);
    }

    #[test]
    fn client_reports_its_own_death_to_the_host() {
        let mut state =
            MatchState::new(open_config(GameMode::TeamDeathmatch), setup(Team::Bravo), 4);
        let mut role = ClientRole::new();
        let mut out = Vec::new();
        exposed(&mut state);
        state.registry.local_mut().unwrap().health = 1.0;
        let me = state.registry.local().unwrap().pos;

        crate::game::combat::CombatSystem::spawn_volley(
            &mut state.registry.bullets,
            "bot-x",
            Team::Alpha,
            WeaponKind::Rifle,
            me - Vec2::new(10.0, 0.0),
            &[0.0],
            0,
        );
        state.step(&PlayerInput::default(), tick_delta(), &mut role, &mut out);

        assert!(!state.registry.local().unwrap().is_alive());
        assert!(out.iter().any(|o| matches!(
            &o.msg,
            PeerMsg::Killed { victim_id, killer_id }
                if victim_id == "me" && killer_id.as_deref() == Some("bot-x")
        )));
        // Team counters are host-owned
        assert_eq!(state.alpha_score, 0);
    }

    #[test]
    fn bullets_never_damage_remote_players_locally() {
        let mut state =
            MatchState::new(open_config(GameMode::TeamDeathmatch), setup(Team::Alpha), 5);
        let mut role = HostRole::new(0);
        let mut out = Vec::new();
        let pos = Vec2::new(1000.0, 1000.0);
        let mut remote = Combatant::remote("peer-2".into(), "Two".into(), Team::Bravo, pos, 0.0);
        remote.safe_until = 0;
        state.registry.spawn_combatant(remote);

        CombatSystem::spawn_volley(
            &mut state.registry.bullets,
            "me",
            Team::Alpha,
            WeaponKind::Railgun,
            pos - Vec2::new(10.0, 0.0),
            &[0.0],
            0,
        );
        state.step(&PlayerInput::default(), tick_delta(), &mut role, &mut out);

        let remote = state.registry.combatant("peer-2").unwrap();
        assert_eq!(remote.health, remote.max_health);
        assert_eq!(state.registry.bullets.active_count(), 0);
    }

    #[test]
    fn host_opens_weapon_box_into_an_item() {
        let mut state =
            MatchState::new(open_config(GameMode::TeamDeathmatch), setup(Team::Alpha), 6);
        let mut role = HostRole::new(0);
        let mut out = Vec::new();
        let pos = state.registry.local().unwrap().pos;
        state.registry.spawn_pickup(Pickup {
            id: "box-1".into(),
            kind: PickupKind::WeaponBox,
            pos,
        });

        state.step(&PlayerInput::default(), tick_delta(), &mut role, &mut out);

        assert!(state.registry.pickup("box-1").is_none());
        assert!(out.iter().any(|o| o.msg == PeerMsg::DestroyObject { id: "box-1".into() }));
        let spawned = out.iter().find_map(|o| match &o.msg {
            PeerMsg::SpawnItem(item) => Some(item.id.clone()),
            _ => None,
        });
        let item_id = spawned.expect("item spawned");
        assert!(state.registry.pickup(&item_id).is_some());
        assert_eq!(state.items_collected, 1);
    }

    #[test]
    fn mission_death_spends_lives_until_failure() {
        let mut config = open_config(GameMode::Survival);
        config.lives = 1;
        config.target_value = 600;
        let mut state = MatchState::new(config, setup(Team::Alpha), 7);
        let mut role = HostRole::new(0);
        let mut out = Vec::new();
        exposed(&mut state);
        state.registry.local_mut().unwrap().health = 1.0;
        let me = state.registry.local().unwrap().pos;

        CombatSystem::spawn_volley(
            &mut state.registry.bullets,
            "b1",
            Team::Bravo,
            WeaponKind::Rifle,
            me - Vec2::new(10.0, 0.0),
            &[0.0],
            0,
        );
        state.step(&PlayerInput::default(), tick_delta(), &mut role, &mut out);

        assert_eq!(state.lives, 0);
        assert_eq!(state.registry.local().unwrap().life, LifeState::Eliminated);
        assert_eq!(state.latch.result().map(|r| r.success), Some(false));
    }

    #[test]
    fn local_player_respawns_after_delay() {
        let mut state =
            MatchState::new(open_config(GameMode::TeamDeathmatch), setup(Team::Alpha), 8);
        let mut role = HostRole::new(0);
        let mut out = Vec::new();
        CombatSystem::begin_death(state.registry.local_mut().unwrap(), 0);

        let ticks = RESPAWN_DELAY_MS * 1000 / delta_micros(tick_delta()) + 2;
        for _ in 0..ticks {
            state.step(&PlayerInput::default(), tick_delta(), &mut role, &mut out);
        }
        let me = state.registry.local().unwrap();
        assert!(me.is_alive());
        assert!(me.is_protected(state.clock_ms));
    }

    #[test]
    fn kill_credit_moves_team_counter_in_deathmatch_modes_only() {
        for mode in [GameMode::TeamDeathmatch, GameMode::FreeForAll] {
            let mut state = MatchState::new(open_config(mode), setup(Team::Alpha), 9);
            enemy_bot(&mut state, "b1", Vec2::new(900.0, 900.0));
            assert!(state.credit_kill("b1", Some("me")));
            assert_eq!(state.alpha_score, 1);
        }

        let mut hardpoint =

            MatchState::new(open_config(GameMode::Hardpoint), setup(Team::Alpha), 9);
        enemy_bot(&mut hardpoint, "b1", Vec2::new(900.0, 900.0));
        assert!(!hardpoint.credit_kill("b1", Some("me")));
        assert_eq!(hardpoint.alpha_score, 0);
        assert_eq!(hardpoint.registry.local().unwrap().kills, 1);
    }

    #[test]
    fn match_clock_tracks_real_time() {
        let mut state =
            MatchState::new(open_config(GameMode::TeamDeathmatch), setup(Team::Alpha), 11);
        let mut role = HostRole::new(0);
        let mut out = Vec::new();
        for _ in 0..60 {
            state.step(&PlayerInput::default(), tick_delta(), &mut role, &mut out);
        }
        assert_eq!(state.clock_ms, 1000);

        for _ in 0..540 {
            state.step(&PlayerInput::default(), tick_delta(), &mut role, &mut out);
        }
        assert_eq!(state.clock_ms, 10_000);
    }

    #[test]
    fn losing_side_gets_an_unsuccessful_report() {
        let mut state =
            MatchState::new(open_config(GameMode::TeamDeathmatch), setup(Team::Bravo), 12);
        assert!(state.finish(MatchResult::team_win(Team::Alpha)));
        let report = state.report().unwrap();
        assert_eq!(report.result.winner.as_deref(), Some("ALPHA"));
        assert!(!report.result.success);
    }

    #[test]
    fn queued_swap_command_changes_the_local_weapon() {
        let state = MatchState::new(open_config(GameMode::TeamDeathmatch), setup(Team::Alpha), 13);
        let (mut game, _handle) = GameMatch::new(
            state,
            Box::new(HostRole::new(0)),
            Arc::new(Offline),
            "solo".into(),
            false,
        );
        let mut out = Vec::new();

        game.handle_command(MatchCommand::SwapWeapon { key: "shotgun".into() }, &mut out);
        assert_eq!(game.state.registry.local().unwrap().weapon.kind, WeaponKind::Shotgun);

        game.handle_command(MatchCommand::SwapWeapon { key: "plasma_cannon".into() }, &mut out);
        assert_eq!(game.state.registry.local().unwrap().weapon.kind, WeaponKind::Shotgun);
        assert!(out.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_reports_ready_then_completion() {
        let mut config = open_config(GameMode::Elimination);
        config.target_value = 0;
        let state = MatchState::new(config, setup(Team::Alpha), 10);
        let (game, handle) = GameMatch::new(
            state,
            Box::new(HostRole::new(0)),
            Arc::new(Offline),
            "solo".into(),
            true,
        );
        let mut events = handle.subscribe_lifecycle();
        let task = tokio::spawn(game.run());

        assert!(matches!(
            events.recv().await,
            Ok(LifecycleEvent::Ready { audio_enabled: true, .. })
        ));
        match events.recv().await {
            Ok(LifecycleEvent::MatchComplete(report)) => assert!(report.result.success),
            other => panic!("unexpected {other:?}"),
        }
        assert!(handle.hud().match_over);

        tokio::time::timeout(Duration::from_secs(10), task)
            .await
            .expect("match task lingers then stops")
            .unwrap();
    }
}
