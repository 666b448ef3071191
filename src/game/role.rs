//! Host and client behavior behind one seam

use tracing::{debug, info};

use crate::util::time::BOT_SYNC_INTERVAL_MS;
use crate::ws::protocol::PeerMsg;
use crate::ws::Outbound;

use super::bot::{BotAi, BotContext, Contact, Threat};
use super::combat::{CombatSystem, DamageOutcome, FireOutcome};
use super::entity::{CombatantKind, Pickup, Team};
use super::physics::{PhysicsSystem, UNIT_RADIUS};
use super::r#match::{MatchState, BOX_SPAWN_INTERVAL_MS, MAX_BOXES};
use super::replication;
use super::rules::{zone_majority, MatchResult, HARDPOINT_RELOCATE_MS, HARDPOINT_TALLY_MS};
use super::snapshot::Cadence;

/// Everything that differs between the authoritative host and a client.
/// The match loop calls these at fixed points and never branches on role itself.
pub trait NetworkRole: Send {
    fn name(&self) -> &'static str;

    /// One-time setup when the match task starts
    fn start(&mut self, state: &mut MatchState);

    /// Advance bots: simulate on the host, interpolate on clients
    fn drive_bots(&mut self, state: &mut MatchState, dt: f32, out: &mut Vec<Outbound>);

    /// A bullet reached a bot in the local simulation
    fn resolve_bot_hit(
        &mut self,
        state: &mut MatchState,
        bot_id: &str,
        attacker_id: &str,
        damage: f32,
        out: &mut Vec<Outbound>,
    );

    /// A combatant this peer is responsible for died
    fn credit_kill(
        &mut self,
        state: &mut MatchState,
        victim_id: &str,
        killer_id: Option<&str>,
        out: &mut Vec<Outbound>,
    );

    /// A `killed` message arrived from `from`
    fn on_killed(
        &mut self,
        state: &mut MatchState,
        from: &str,
        victim_id: &str,
        killer_id: Option<&str>,
        out: &mut Vec<Outbound>,
    );

    /// A weapon box was collected by someone
    fn open_weapon_box(&mut self, state: &mut MatchState, opened: &Pickup, out: &mut Vec<Outbound>);

    /// Per-tick authority work (syncs, spawners, objective, win checks)
    fn periodic(&mut self, state: &mut MatchState, out: &mut Vec<Outbound>);

    /// Whether a message from a peer may be applied at all
    fn accepts(&self, msg: &PeerMsg) -> bool;

    /// Whether `from` may speak for the player or shooter `owner_id`
    fn trusts(&self, from: &str, owner_id: &str) -> bool;

    /// Forward a peer's message to the rest of the room
    fn relay(&self, from: &str, msg: &PeerMsg, out: &mut Vec<Outbound>);

    /// First message for a newly connected peer
    fn welcome(&self, state: &MatchState, peer_id: &str) -> Option<Outbound>;

    /// A peer link closed; purge whatever that peer owned
    fn on_peer_left(&mut self, state: &mut MatchState, peer_id: &str, out: &mut Vec<Outbound>);

    /// Whether a peer's `destroy_object` may remove `id`
    fn may_destroy(&self, state: &MatchState, id: &str) -> bool;

    fn announce_match_over(&self, result: &MatchResult, out: &mut Vec<Outbound>);
}

/// Authoritative peer: owns bots, boxes, team scores, and match over
#[derive(Debug, Clone)]
pub struct HostRole {
    bot_sync: Cadence,
    box_spawner: Cadence,
    tally: Cadence,
    relocate: Cadence,
}

impl HostRole {
    pub fn new(now: u64) -> Self {
        Self {
            bot_sync: Cadence::new(BOT_SYNC_INTERVAL_MS),
            box_spawner: Cadence::starting_at(BOX_SPAWN_INTERVAL_MS, now),
            tally: Cadence::starting_at(HARDPOINT_TALLY_MS, now),
            relocate: Cadence::starting_at(HARDPOINT_RELOCATE_MS, now),
        }
    }

    /// Zone tally each second, relocation every half minute
    fn tally_objective(&mut self, state: &mut MatchState, out: &mut Vec<Outbound>) {
        let now = state.clock_ms;
        let Some((center, radius)) = state.registry.objective.as_ref().map(|z| (z.center, z.radius))
        else {
            return;
        };

        if self.tally.due(now) {
            let holder = zone_majority(
                state
                    .registry
                    .combatants()
                    .filter(|c| c.is_alive() && c.pos.distance(center) <= radius)
                    .map(|c| c.team),
            );
            if let Some(zone) = state.registry.objective.as_mut() {
                zone.holder = holder;
            }
            let scored = match holder {
                Team::Alpha => {
                    state.alpha_score += 1;
                    true
                }
                Team::Bravo => {
                    state.bravo_score += 1;
                    true
                }
                Team::Neutral => false,
            };
            if scored {
                out.push(Outbound::broadcast(state.score_update()));
            }
        }

        if self.relocate.due(now) {
            let center = state.random_open_point();
            if let Some(zone) = state.registry.objective.as_mut() {
                zone.center = center;
                zone.holder = Team::Neutral;
                info!(x = center.x, y = center.y, "Objective relocated");
                out.push(Outbound::broadcast(PeerMsg::ObjectiveMoved {
                    x: center.x,
                    y: center.y,
                    radius: zone.radius,
                }));
            }
        }
    }
}

impl NetworkRole for HostRole {
    fn name(&self) -> &'static str {
        "host"
    }

    fn start(&mut self, state: &mut MatchState) {
        *self = Self::new(state.clock_ms);
        state.populate();
    }

    fn drive_bots(&mut self, state: &mut MatchState, dt: f32, out: &mut Vec<Outbound>) {
        let now = state.clock_ms;
        let contacts: Vec<Contact> = state
            .registry
            .combatants()
            .map(|c| Contact {
                id: c.id.clone(),
                team: c.team,
                pos: c.pos,
                alive: c.is_alive(),
                protected: c.is_protected(now),
            })
            .collect();
        let threats: Vec<Threat> = state
            .registry
            .bullets
            .active()
            .map(|b| Threat {
                pos: b.pos,
                vel: b.vel,
                team: b.team,
            })
            .collect();
        let objective = state.registry.objective.as_ref().map(|z| z.center);
        let difficulty = state.config.difficulty;

        let MatchState {
            map, registry, rng, ..
        } = &mut *state;
        let ctx = BotContext {
            contacts: &contacts,
            threats: &threats,
            walls: &map.walls,
            objective,
            difficulty,
            now,
        };

        let mut respawns = Vec::new();
        for id in registry.bot_ids() {
            let Some((bot, bullets)) = registry.shooter_mut(&id) else {
                continue;
            };
            if !bot.is_alive() {
                if CombatSystem::respawn_due(bot, now) {
                    respawns.push((id, bot.team));
                }
                continue;
            }

            CombatSystem::tick_weapon(bot, now);
            let intent = BotAi::think(bot, &ctx, rng);
            bot.angle = intent.face;
            bot.vel = intent.move_dir * bot.speed;
            bot.pos =
                PhysicsSystem::move_with_walls(bot.pos, bot.vel * dt, UNIT_RADIUS, &map.walls);

            if let Some((aim, error)) = intent.fire {
                if let FireOutcome::Fired(volley) =
                    CombatSystem::try_fire(bot, aim, error, now, rng, bullets)
                {
                    out.push(Outbound::broadcast(replication::fire_msg(&volley)));
                }
            }
        }

        for (id, team) in respawns {
            let at = state.spawn_point(team);
            if let Some(bot) = state.registry.combatant_mut(&id) {
                CombatSystem::respawn(bot, at, now);
                debug!(bot_id = %id, "Bot respawned");
            }
            self.bot_sync.force_next();
        }
    }

    fn resolve_bot_hit(
        &mut self,
        state: &mut MatchState,
        bot_id: &str,
        attacker_id: &str,
        damage: f32,
        out: &mut Vec<Outbound>,
    ) {
        let now = state.clock_ms;
        let Some(bot) = state.registry.combatant_mut(bot_id) else {
            return;
        };
        let outcome = CombatSystem::apply_damage(bot, damage, Some(attacker_id), now);
        if outcome != DamageOutcome::Killed || !CombatSystem::begin_death(bot, now) {
            return;
        }
        debug!(bot_id = %bot_id, killer = %attacker_id, "Bot down");
        self.bot_sync.force_next();
        self.credit_kill(state, bot_id, Some(attacker_id), out);
    }

    fn credit_kill(
        &mut self,
        state: &mut MatchState,
        victim_id: &str,
        killer_id: Option<&str>,
        out: &mut Vec<Outbound>,
    ) {
        let team_scored = state.credit_kill(victim_id, killer_id);
        info!(
            victim = %victim_id,
            killer = ?killer_id,
            alpha = state.alpha_score,
            bravo = state.bravo_score,
            "Kill credited"
        );
        out.push(Outbound::broadcast(PeerMsg::Killed {
            victim_id: victim_id.to_string(),
            killer_id: killer_id.map(str::to_string),
        }));
        if team_scored {
            out.push(Outbound::broadcast(state.score_update()));
        }
    }

    fn on_killed(
        &mut self,
        state: &mut MatchState,
        from: &str,
        victim_id: &str,
        killer_id: Option<&str>,
        out: &mut Vec<Outbound>,
    ) {
        // A client may only report its own death
        if victim_id != from {
            debug!(from = %from, victim = %victim_id, "Rejected kill report for another player");
            return;
        }
        self.credit_kill(state, victim_id, killer_id, out);
    }

    fn open_weapon_box(
        &mut self,
        state: &mut MatchState,
        opened: &Pickup,
        out: &mut Vec<Outbound>,
    ) {
        if let Some(item) = state.spawn_weapon_item(opened.pos) {
            debug!(
                box_id = %opened.id,
                item_id = %item.id,
                weapon = %item.weapon,
                "Weapon box opened"
            );
            out.push(Outbound::broadcast(PeerMsg::SpawnItem(item)));
        }
    }

    fn periodic(&mut self, state: &mut MatchState, out: &mut Vec<Outbound>) {
        let now = state.clock_ms;

        if self.bot_sync.due(now) && state.registry.bots().next().is_some() {
            out.push(Outbound::broadcast(PeerMsg::BotSync {
                bots: state.registry.bots().map(replication::bot_state).collect(),
            }));
        }

        if self.box_spawner.due(now) && state.box_count() < MAX_BOXES {
            if let Some(info) = state.spawn_box() {
                out.push(Outbound::broadcast(PeerMsg::SpawnBox(info)));
            }
        }

        self.tally_objective(state, out);

        if let Some(result) = state.evaluate() {
            if state.finish(result.clone()) {
                self.announce_match_over(&result, out);
            }
        }
    }

    fn accepts(&self, msg: &PeerMsg) -> bool {
        !msg.is_host_authoritative()
    }

    fn trusts(&self, from: &str, owner_id: &str) -> bool {
        from == owner_id
    }

    fn relay(&self, from: &str, msg: &PeerMsg, out: &mut Vec<Outbound>) {
        if matches!(
            msg,
            PeerMsg::Sync { .. } | PeerMsg::Fire { .. } | PeerMsg::DestroyObject { .. }
        ) {
            out.push(Outbound::all_except(from, msg.clone()));
        }
    }

    fn welcome(&self, state: &MatchState, peer_id: &str) -> Option<Outbound> {
        Some(Outbound::to(peer_id, PeerMsg::InitialSync(state.world_snapshot())))
    }

    fn on_peer_left(&mut self, state: &mut MatchState, peer_id: &str, out: &mut Vec<Outbound>) {
        state.drop_peer(peer_id);
        // Remaining clients only learn about the leaver through us
        out.push(Outbound::broadcast(PeerMsg::DestroyObject {
            id: peer_id.to_string(),
        }));
    }

    /// Clients may only consume pickups; bots and avatars stay ours
    fn may_destroy(&self, state: &MatchState, id: &str) -> bool {
        state.registry.pickup(id).is_some()
    }

    fn announce_match_over(&self, result: &MatchResult, out: &mut Vec<Outbound>) {
        out.push(Outbound::broadcast(PeerMsg::GameOver(result.clone())));
    }
}

/// Non-authoritative peer: mirrors the host's world
#[derive(Debug, Clone, Default)]
pub struct ClientRole;

impl ClientRole {
    pub fn new() -> Self {
        Self
    }
}

impl NetworkRole for ClientRole {
    fn name(&self) -> &'static str {
        "client"
    }

    fn start(&mut self, _state: &mut MatchState) {}

    fn drive_bots(&mut self, state: &mut MatchState, _dt: f32, _out: &mut Vec<Outbound>) {
        state.interpolate(CombatantKind::Bot);
    }

    fn resolve_bot_hit(
        &mut self,
        _state: &mut MatchState,
        bot_id: &str,
        _attacker_id: &str,
        _damage: f32,
        _out: &mut Vec<Outbound>,
    ) {
        // Bot damage is the host's call; the bullet is just spent here
        debug!(bot_id = %bot_id, "Bot hit left to host");
    }

    fn credit_kill(
        &mut self,
        _state: &mut MatchState,
        victim_id: &str,
        killer_id: Option<&str>,
        out: &mut Vec<Outbound>,
    ) {
        out.push(Outbound::broadcast(PeerMsg::Killed {
            victim_id: victim_id.to_string(),
            killer_id: killer_id.map(str::to_string),
        }));
    }

    fn on_killed(
        &mut self,
        state: &mut MatchState,
        _from: &str,
        victim_id: &str,
        killer_id: Option<&str>,
        _out: &mut Vec<Outbound>,
    ) {
        if killer_id == Some(state.registry.local_id()) && victim_id != state.registry.local_id() {
            state.credit_local_kill();
            debug!(victim = %victim_id, "Kill confirmed by host");
        }
    }

    fn open_weapon_box(
        &mut self,
        _state: &mut MatchState,
        _opened: &Pickup,
        _out: &mut Vec<Outbound>,
    ) {
    }

    fn periodic(&mut self, _state: &mut MatchState, _out: &mut Vec<Outbound>) {}

    fn accepts(&self, _msg: &PeerMsg) -> bool {
        true
    }

    /// Everything arrives through the host, which already checked it
    fn trusts(&self, _from: &str, _owner_id: &str) -> bool {
        true
    }

    fn relay(&self, _from: &str, _msg: &PeerMsg, _out: &mut Vec<Outbound>) {}

    fn welcome(&self, _state: &MatchState, _peer_id: &str) -> Option<Outbound> {
        None
    }

    /// The only link is the host's, so every mirrored player goes with it
    fn on_peer_left(&mut self, state: &mut MatchState, peer_id: &str, _out: &mut Vec<Outbound>) {
        let purged = state.registry.remove_remote_players();
        info!(peer_id = %peer_id, purged, "Host link closed, remote players removed");
    }

    fn may_destroy(&self, _state: &MatchState, _id: &str) -> bool {
        true
    }

    fn announce_match_over(&self, _result: &MatchResult, _out: &mut Vec<Outbound>) {}
}
