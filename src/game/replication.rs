//! Applying peer messages to the local world

use tracing::{debug, info, trace};

use crate::ws::protocol::{BotInfo, BotState, BoxInfo, BoxKind, ItemInfo, PeerMsg, WorldSnapshot};
use crate::ws::Outbound;

use super::combat::{CombatSystem, Volley};
use super::entity::{
    Combatant, CombatantKind, Destroyed, LifeState, ObjectiveZone, Pickup, PickupKind, Team,
    WeaponState,
};
use super::physics::Vec2;
use super::r#match::MatchState;
use super::role::NetworkRole;
use super::rules::MatchResult;
use super::weapons::WeaponKind;

pub fn fire_msg(volley: &Volley) -> PeerMsg {
    PeerMsg::Fire {
        owner_id: volley.owner_id.clone(),
        team: volley.team,
        weapon: volley.weapon.key().to_string(),
        x: volley.origin.x,
        y: volley.origin.y,
        angles: volley.angles.clone(),
    }
}

pub fn bot_info(c: &Combatant) -> BotInfo {
    BotInfo {
        id: c.id.clone(),
        name: c.name.clone(),
        team: c.team,
        x: c.pos.x,
        y: c.pos.y,
        angle: c.angle,
        weapon: c.weapon.kind.key().to_string(),
        health: c.health,
        max_health: c.max_health,
    }
}

pub fn bot_state(c: &Combatant) -> BotState {
    BotState {
        id: c.id.clone(),
        x: c.pos.x,
        y: c.pos.y,
        angle: c.angle,
        health: c.health,
        alive: c.is_alive(),
    }
}

pub fn box_info(p: &Pickup) -> Option<BoxInfo> {
    let kind = match p.kind {
        PickupKind::LuckBox => BoxKind::Luck,
        PickupKind::WeaponBox => BoxKind::Weapon,
        PickupKind::WeaponItem(_) => return None,
    };
    Some(BoxInfo {
        id: p.id.clone(),
        kind,
        x: p.pos.x,
        y: p.pos.y,
    })
}

pub fn item_info(p: &Pickup) -> Option<ItemInfo> {
    match p.kind {
        PickupKind::WeaponItem(weapon) => Some(ItemInfo {
            id: p.id.clone(),
            weapon: weapon.key().to_string(),
            x: p.pos.x,
            y: p.pos.y,
        }),
        _ => None,
    }
}

/// Mirror of a host-simulated bot; moves only toward network targets
fn mirrored_bot(info: BotInfo) -> Combatant {
    let pos = Vec2::new(info.x, info.y);
    let mut bot = Combatant::remote(info.id, info.name, info.team, pos, info.angle);
    bot.kind = CombatantKind::Bot;
    bot.health = info.health;
    bot.max_health = info.max_health;
    bot.weapon = WeaponState::new(WeaponKind::resolve_or_fallback(&info.weapon));
    if info.health <= 0.0 {
        bot.life = LifeState::Respawning { respawn_at: u64::MAX };
        bot.visible = false;
    }
    bot
}

/// Applies inbound peer messages, then hands them to the role for relay
pub struct Replicator;

impl Replicator {
    pub fn apply(
        state: &mut MatchState,
        role: &mut dyn NetworkRole,
        from: &str,
        msg: PeerMsg,
        out: &mut Vec<Outbound>,
    ) {
        if state.latch.is_over() {
            trace!(from = %from, kind = msg.kind(), "Match over, message ignored");
            return;
        }
        if !role.accepts(&msg) {
            debug!(from = %from, kind = msg.kind(), "Rejected authority message from non-host");
            return;
        }

        let relayed = msg.clone();
        match msg {
            PeerMsg::Sync {
                id,
                name,
                team,
                x,
                y,
                angle,
                weapon,
                alive,
            } => {
                if id == state.registry.local_id() {
                    return;
                }
                if !role.trusts(from, &id) {
                    debug!(from = %from, id = %id, "Sync for a foreign id dropped");
                    return;
                }
                Self::apply_sync(state, id, name, team, Vec2::new(x, y), angle, &weapon, alive);
            }

            PeerMsg::Fire {
                owner_id,
                team,
                weapon,
                x,
                y,
                angles,
            } => {
                if !role.trusts(from, &owner_id) {
                    debug!(from = %from, owner_id = %owner_id, "Fire for a foreign owner dropped");
                    return;
                }
                let weapon = WeaponKind::resolve_or_fallback(&weapon);
                CombatSystem::spawn_volley(
                    &mut state.registry.bullets,
                    &owner_id,
                    team,
                    weapon,
                    Vec2::new(x, y),
                    &angles,
                    state.clock_ms,
                );
            }

            PeerMsg::ScoreUpdate { alpha, bravo } => {
                state.alpha_score = alpha;
                state.bravo_score = bravo;
                // Peers reach match over on the same score the host did
                if let Some(team) = state.team_limit_reached() {
                    state.finish(MatchResult::team_win(team));
                }
            }

            PeerMsg::SpawnBot(info) => Self::spawn_bot(state, info),

            PeerMsg::SpawnBox(info) => Self::spawn_box(state, info),

            PeerMsg::SpawnItem(info) => Self::spawn_item(state, info),

            PeerMsg::DestroyObject { id } if !role.may_destroy(state, &id) => {
                debug!(from = %from, id = %id, "Destroy for a non-pickup refused");
                return;
            }

            PeerMsg::DestroyObject { id } => match state.registry.destroy(&id) {
                Destroyed::Pickup(pickup) if pickup.kind == PickupKind::WeaponBox => {
                    role.open_weapon_box(state, &pickup, out);
                }
                Destroyed::Nothing => trace!(id = %id, "Destroy for unknown object ignored"),
                _ => {}
            },

            PeerMsg::BotSync { bots } => {
                for entry in bots {
                    Self::apply_bot_state(state, entry);
                }
            }

            PeerMsg::GameOver(result) => {
                state.finish(result);
            }

            PeerMsg::InitialSync(world) => Self::apply_world(state, world),

            PeerMsg::Killed {
                victim_id,
                killer_id,
            } => role.on_killed(state, from, &victim_id, killer_id.as_deref(), out),

            PeerMsg::ObjectiveMoved { x, y, radius } => {
                let center = Vec2::new(x, y);
                match state.registry.objective.as_mut() {
                    Some(zone) => {
                        zone.center = center;
                        zone.radius = radius;
                    }
                    None => {
                        let id = state.new_object_id("zone");
                        state.registry.objective = Some(ObjectiveZone {
                            id,
                            center,
                            radius,
                            holder: Team::Neutral,
                        });
                    }
                }
            }
        }

        role.relay(from, &relayed, out);
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_sync(
        state: &mut MatchState,
        id: String,
        name: String,
        team: Team,
        pos: Vec2,
        angle: f32,
        weapon: &str,
        alive: bool,
    ) {
        if state.registry.combatant(&id).is_none() {
            info!(player_id = %id, name = %name, "Remote player appeared");
            state
                .registry
                .spawn_combatant(Combatant::remote(id.clone(), name, team, pos, angle));
        }
        let Some(remote) = state.registry.combatant_mut(&id) else {
            return;
        };
        remote.team = team;
        remote.net_target = Some((pos, angle));
        remote.visible = alive;
        remote.weapon.kind = WeaponKind::resolve_or_fallback(weapon);
        remote.life = if alive {
            LifeState::Alive
        } else {
            LifeState::Respawning { respawn_at: u64::MAX }
        };
    }

    fn spawn_bot(state: &mut MatchState, info: BotInfo) {
        let id = info.id.clone();
        if !state.registry.spawn_combatant(mirrored_bot(info)) {
            trace!(bot_id = %id, "Duplicate bot spawn ignored");
        }
    }

    fn spawn_box(state: &mut MatchState, info: BoxInfo) {
        let kind = match info.kind {
            BoxKind::Luck => PickupKind::LuckBox,
            BoxKind::Weapon => PickupKind::WeaponBox,
        };
        state.registry.spawn_pickup(Pickup {
            id: info.id,
            kind,
            pos: Vec2::new(info.x, info.y),
        });
    }

    fn spawn_item(state: &mut MatchState, info: ItemInfo) {
        state.registry.spawn_pickup(Pickup {
            id: info.id,
            kind: PickupKind::WeaponItem(WeaponKind::resolve_or_fallback(&info.weapon)),
            pos: Vec2::new(info.x, info.y),
        });
    }

    fn apply_bot_state(state: &mut MatchState, entry: BotState) {
        let Some(bot) = state.registry.combatant_mut(&entry.id) else {
            trace!(bot_id = %entry.id, "Bot sync for unknown bot");
            return;
        };
        bot.net_target = Some((Vec2::new(entry.x, entry.y), entry.angle));
        bot.health = entry.health;
        if entry.alive {
            if !bot.is_alive() {
                // Respawned: snap instead of sliding across the map
                bot.pos = Vec2::new(entry.x, entry.y);
            }
            bot.life = LifeState::Alive;
            bot.visible = true;
        } else {
            bot.life = LifeState::Respawning { respawn_at: u64::MAX };
            bot.visible = false;
        }
    }

    fn apply_world(state: &mut MatchState, world: WorldSnapshot) {
        info!(
            bots = world.bots.len(),
            boxes = world.boxes.len(),
            items = world.items.len(),
            "Initial world received"
        );
        for bot in world.bots {
            Self::spawn_bot(state, bot);
        }
        for info in world.boxes {
            Self::spawn_box(state, info);
        }
        for info in world.items {
            Self::spawn_item(state, info);
        }
        state.alpha_score = world.alpha;
        state.bravo_score = world.bravo;
        if let Some(objective) = world.objective {
            let id = state.new_object_id("zone");
            state.registry.objective = Some(ObjectiveZone {
                id,
                center: Vec2::new(objective.x, objective.y),
                radius: objective.radius,
                holder: Team::Neutral,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::entity::PlayerClass;
    use crate::game::r#match::PlayerSetup;
    use crate::game::role::{ClientRole, HostRole};
    use crate::game::rules::{GameMode, MatchConfig};

    fn state(mode: GameMode) -> MatchState {
        let config = MatchConfig {
            mode,
            map_id: "open".into(),
            score_limit: 10,
            alpha_bots: 0,
            bravo_bots: 0,
            ..MatchConfig::default()
        };
        MatchState::new(
            config,
            PlayerSetup {
                id: "me".into(),
                name: "Me".into(),
                team: Team::Bravo,
                class: PlayerClass::Scout,
            },
            21,
        )
    }

    fn bot(id: &str) -> BotInfo {
        BotInfo {
            id: id.into(),
            name: "Bot".into(),
            team: Team::Alpha,
            x: 500.0,
            y: 500.0,
            angle: 0.0,
            weapon: "smg".into(),
            health: 80.0,
            max_health: 100.0,
        }
    }

    fn apply(
        state: &mut MatchState,
        role: &mut dyn NetworkRole,
        from: &str,
        msg: PeerMsg,
    ) -> Vec<Outbound> {
        let mut out = Vec::new();
        Replicator::apply(state, role, from, msg, &mut out);
        out
    }

    #[test]
    fn destroying_twice_is_harmless() {
        let mut s = state(GameMode::TeamDeathmatch);
        let mut role = ClientRole::new();
        apply(
            &mut s,
            &mut role,
            "host",
            PeerMsg::SpawnBox(BoxInfo {
                id: "box-1".into(),
                kind: BoxKind::Luck,
                x: 10.0,
                y: 10.0,
            }),
        );
        assert!(s.registry.pickup("box-1").is_some());

        for _ in 0..2 {
            apply(&mut s, &mut role, "host", PeerMsg::DestroyObject { id: "box-1".into() });
        }
        assert!(s.registry.pickup("box-1").is_none());
        assert!(s.registry.local().is_some());
    }

    #[test]
    fn repeated_bot_spawn_keeps_one_bot() {
        let mut s = state(GameMode::TeamDeathmatch);
        let mut role = ClientRole::new();
        apply(&mut s, &mut role, "host", PeerMsg::SpawnBot(bot("bot-1")));
        apply(&mut s, &mut role, "host", PeerMsg::SpawnBot(bot("bot-1")));
        assert_eq!(s.registry.bots().count(), 1);
        let mirrored = s.registry.combatant("bot-1").unwrap();
        assert!(mirrored.mind.is_none());
        assert_eq!(mirrored.weapon.kind, WeaponKind::Smg);
    }

    #[test]
    fn score_update_at_limit_ends_match_on_client() {
        let mut s = state(GameMode::TeamDeathmatch);
        let mut role = ClientRole::new();
        apply(&mut s, &mut role, "host", PeerMsg::ScoreUpdate { alpha: 10, bravo: 3 });

        assert!(s.latch.is_over());
        let result = s.latch.result().unwrap();
        assert_eq!(result.winner.as_deref(), Some("ALPHA"));
        // The local player is on Bravo
        assert!(!result.success);

        // Nothing applies after match over
        apply(
            &mut s,
            &mut role,
            "host",
            PeerMsg::Killed {
                victim_id: "bot-1".into(),
                killer_id: Some("me".into()),
            },
        );
        assert_eq!(s.registry.local().unwrap().kills, 0);
    }

    #[test]
    fn host_drops_authority_messages_from_clients() {
        let mut s = state(GameMode::TeamDeathmatch);
        let mut role = HostRole::new(0);
        let out = apply(&mut s, &mut role, "peer-a", PeerMsg::ScoreUpdate { alpha: 10, bravo: 0 });
        assert!(out.is_empty());
        assert_eq!(s.alpha_score, 0);
        assert!(!s.latch.is_over());
    }

    #[test]
    fn host_accepts_and_relays_sync_from_its_owner() {
        let mut s = state(GameMode::TeamDeathmatch);
        let mut role = HostRole::new(0);
        let sync = PeerMsg::Sync {
            id: "peer-a".into(),
            name: "A".into(),
            team: Team::Alpha,
            x: 300.0,
            y: 300.0,
            angle: 1.0,
            weapon: "rifle".into(),
            alive: true,
        };
        let out = apply(&mut s, &mut role, "peer-a", sync.clone());
        assert!(s.registry.combatant("peer-a").is_some());
        assert_eq!(out, vec![Outbound::all_except("peer-a", sync.clone())]);

        // Spoofed id
        let out = apply(&mut s, &mut role, "peer-b", sync);
        assert!(out.is_empty());
        assert!(s.registry.combatant("peer-b").is_none());
    }

    #[test]
    fn unknown_weapon_in_fire_falls_back() {
        let mut s = state(GameMode::TeamDeathmatch);
        let mut role = ClientRole::new();
        apply(
            &mut s,
            &mut role,
            "host",
            PeerMsg::Fire {
                owner_id: "bot-1".into(),
                team: Team::Alpha,
                weapon: "plasma_cannon".into(),
                x: 100.0,
                y: 100.0,
                angles: vec![0.0, 0.1],
            },
        );
        assert_eq!(s.registry.bullets.active_count(), 2);
        assert!(s
            .registry
            .bullets
            .active()
            .all(|b| b.weapon == WeaponKind::FALLBACK));
    }

    #[test]
    fn initial_sync_rebuilds_the_world() {
        let mut s = state(GameMode::Hardpoint);
        let mut role = ClientRole::new();
        let world = WorldSnapshot {
            bots: vec![bot("bot-1"), bot("bot-2")],
            boxes: vec![BoxInfo {
                id: "box-1".into(),
                kind: BoxKind::Weapon,
                x: 50.0,
                y: 50.0,
            }],
            items: vec![ItemInfo {
                id: "item-1".into(),
                weapon: "railgun".into(),
                x: 70.0,
                y: 70.0,
            }],
            alpha: 4,
            bravo: 2,
            objective: Some(crate::ws::protocol::ObjectiveInfo {
                x: 1000.0,
                y: 1000.0,
                radius: 150.0,
            }),
        };
        apply(&mut s, &mut role, "host", PeerMsg::InitialSync(world));

        assert_eq!(s.registry.bots().count(), 2);
        assert_eq!(s.registry.pickups().count(), 2);
        assert_eq!((s.alpha_score, s.bravo_score), (4, 2));
        assert!(s.registry.objective.is_some());
    }

    #[test]
    fn bot_sync_marks_dead_bots_invisible() {
        let mut s = state(GameMode::TeamDeathmatch);
        let mut role = ClientRole::new();
        apply(&mut s, &mut role, "host", PeerMsg::SpawnBot(bot("bot-1")));
        apply(
            &mut s,
            &mut role,
            "host",
            PeerMsg::BotSync {
                bots: vec![BotState {
                    id: "bot-1".into(),
                    x: 600.0,
                    y: 600.0,
                    angle: 0.5,
                    health: 0.0,
                    alive: false,
                }],
            },
        );
        let b = s.registry.combatant("bot-1").unwrap();
        assert!(!b.is_alive());
        assert!(!b.visible);
        assert_eq!(b.net_target.map(|(p, _)| p), Some(Vec2::new(600.0, 600.0)));
    }

    #[test]
    fn host_turns_remote_box_pickup_into_item() {
        let mut s = state(GameMode::TeamDeathmatch);
        let mut role = HostRole::new(0);
        s.registry.spawn_pickup(Pickup {
            id: "box-1".into(),
            kind: PickupKind::WeaponBox,
            pos: Vec2::new(800.0, 800.0),
        });
        let out = apply(&mut s, &mut role, "peer-a", PeerMsg::DestroyObject { id: "box-1".into() });
        assert!(out.iter().any(|o| matches!(o.msg, PeerMsg::SpawnItem(_))));
        assert!(out.contains(&Outbound::all_except(
            "peer-a",
            PeerMsg::DestroyObject { id: "box-1".into() }
        )));
    }

    #[test]
    fn free_for_all_client_latches_on_the_score_limit() {
        let mut s = state(GameMode::FreeForAll);
        let mut role = ClientRole::new();
        apply(&mut s, &mut role, "host", PeerMsg::ScoreUpdate { alpha: 3, bravo: 10 });
        let result = s.latch.result().unwrap();
        assert_eq!(result.winner.as_deref(), Some("BRAVO"));
        assert!(result.success);
    }

    #[test]
    fn game_over_is_judged_from_the_local_team() {
        let mut s = state(GameMode::TeamDeathmatch);
        let mut role = ClientRole::new();
        apply(&mut s, &mut role, "host", PeerMsg::GameOver(MatchResult::team_win(Team::Alpha)));
        assert_eq!(s.latch.result().map(|r| r.success), Some(false));
    }

    #[test]
    fn clients_cannot_destroy_bots_or_other_players() {
        let mut s = state(GameMode::TeamDeathmatch);
        let mut role = HostRole::new(0);
        s.registry.spawn_combatant(mirrored_bot(bot("bot-1")));
        s.registry.spawn_combatant(Combatant::remote(
            "peer-b".into(),
            "B".into(),
            Team::Alpha,
            Vec2::new(400.0, 400.0),
            0.0,
        ));

        for id in ["bot-1", "peer-b", "me"] {
            let out = apply(&mut s, &mut role, "peer-a", PeerMsg::DestroyObject { id: id.into() });
            assert!(out.is_empty(), "{id} destroy was relayed");
        }
        assert!(s.registry.combatant("bot-1").is_some());
        assert!(s.registry.combatant("peer-b").is_some());
        assert!(s.registry.local().is_some());
    }

    #[test]
    fn client_applies_host_destroy_of_a_departed_player() {
        let mut s = state(GameMode::TeamDeathmatch);
        let mut role = ClientRole::new();
        s.registry.spawn_combatant(Combatant::remote(
            "peer-b".into(),
            "B".into(),
            Team::Alpha,
            Vec2::new(400.0, 400.0),
            0.0,
        ));
        apply(&mut s, &mut role, "arena-xk42", PeerMsg::DestroyObject { id: "peer-b".into() });
        assert!(s.registry.combatant("peer-b").is_none());
    }
}
