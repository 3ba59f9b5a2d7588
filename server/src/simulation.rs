//! The fixed-rate room tick.
//!
//! Steps run in `TICK_ORDER` every cycle. The order matters: respawns run
//! before enemy AI so a fresh enemy can pick a target on the tick it appears,
//! and coins are settled before any combat can kill a would-be collector.

use crate::entity::{PendingRespawn, SpawnOrigin};
use crate::game::{HitTarget, RoomState};
use log::{debug, warn};
use shared::combat::weapon_orbit_position;
use shared::Packet;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickStep {
    Coins,
    WeaponHits,
    Regeneration,
    PotionDrain,
    PartySync,
    Respawns,
    EnemyAi,
}

pub const TICK_ORDER: [TickStep; 7] = [
    TickStep::Coins,
    TickStep::WeaponHits,
    TickStep::Regeneration,
    TickStep::PotionDrain,
    TickStep::PartySync,
    TickStep::Respawns,
    TickStep::EnemyAi,
];

impl RoomState {
    /// Advances the room to `now` and queues any periodic broadcasts.
    pub fn tick(&mut self, now: u64) {
        let tick_ms = self.config.tick_ms.max(1);
        let elapsed = self
            .last_tick_at
            .map_or(tick_ms, |last| now.saturating_sub(last))
            .min(tick_ms * 4);
        let dt = elapsed as f32 / 1000.0;
        self.last_tick_at = Some(now);
        self.tick += 1;

        for step in TICK_ORDER {
            self.run_step(step, now, dt);
        }

        self.push_profiles(now);
        self.flush_snapshot(now);
    }

    /// Runs a single tick step. `dt` is the elapsed time in seconds.
    pub fn run_step(&mut self, step: TickStep, now: u64, dt: f32) {
        match step {
            TickStep::Coins => self.step_coins(now),
            TickStep::WeaponHits => self.step_weapon_hits(now),
            TickStep::Regeneration => self.step_regeneration(now),
            TickStep::PotionDrain => self.step_potion_drain(),
            TickStep::PartySync => self.step_party_sync(now),
            TickStep::Respawns => self.step_respawns(now),
            TickStep::EnemyAi => self.step_enemy_ai(now, dt),
        }
    }

    /// Ends finished swings and resolves the blade position of active ones.
    fn step_weapon_hits(&mut self, now: u64) {
        let duration = self.config.attack_duration_ms;
        let mut swings = Vec::new();
        for player in self.players.values_mut().filter(|p| p.is_attacking) {
            let elapsed = now.saturating_sub(player.attack_started_at);
            if elapsed >= duration || player.dead {
                player.is_attacking = false;
            } else {
                swings.push((player.identity.clone(), elapsed));
            }
        }
        for (attacker, elapsed) in swings {
            self.resolve_swing(&attacker, elapsed, now);
        }
    }

    /// Damages every enemy and non-party player under the blade.
    ///
    /// Neutral zones shield both sides: an attacker standing in one deals no
    /// damage, and targets inside one cannot be hit from outside. Each
    /// attacker/target pair is limited by the weapon hit cooldown.
    fn resolve_swing(&mut self, attacker_id: &str, elapsed: u64, now: u64) {
        let Some(attacker) = self.players.get(attacker_id) else {
            return;
        };
        if attacker.dead || self.in_neutral_zone(attacker.position) {
            return;
        }
        let Some(weapon) = attacker.weapon.as_deref().and_then(|k| self.registry.weapon(k)) else {
            warn!("{} is swinging without a known weapon", attacker_id);
            return;
        };
        let damage = weapon.damage + attacker.combat_bonus;
        let blade = weapon_orbit_position(
            attacker.position,
            self.config.weapon_orbit_radius,
            elapsed,
            self.config.attack_duration_ms,
        );
        let radius = self.config.weapon_hit_radius;
        let cooldown = self.config.weapon_hit_cooldown_ms;
        let ready = |target: HitTarget| {
            self.weapon_hits
                .get(&(attacker_id.to_string(), target))
                .map_or(true, |last| now.saturating_sub(*last) >= cooldown)
        };

        let enemies: Vec<u32> = self
            .enemies
            .values()
            .filter(|e| !e.dead && e.position.distance(&blade) <= radius)
            .filter(|e| !self.in_neutral_zone(e.position))
            .map(|e| e.id)
            .filter(|id| ready(HitTarget::Enemy(*id)))
            .collect();
        let players: Vec<String> = self
            .players
            .values()
            .filter(|p| p.identity != attacker_id && p.is_alive() && !p.disconnected)
            .filter(|p| !attacker.same_party(p))
            .filter(|p| p.position.distance(&blade) <= radius)
            .filter(|p| !self.in_neutral_zone(p.position))
            .map(|p| p.identity.clone())
            .filter(|id| ready(HitTarget::Player(id.clone())))
            .collect();

        for id in enemies {
            self.weapon_hits
                .insert((attacker_id.to_string(), HitTarget::Enemy(id)), now);
            let killed = self
                .enemies
                .get_mut(&id)
                .map_or(false, |e| e.take_damage(damage));
            if killed {
                self.on_enemy_killed(id, attacker_id, now);
            }
        }
        for target in players {
            self.weapon_hits.insert(
                (attacker_id.to_string(), HitTarget::Player(target.clone())),
                now,
            );
            let lethal = self
                .players
                .get_mut(&target)
                .map_or(false, |p| p.take_damage(damage, now));
            if lethal {
                self.kill_player(&target, now);
            }
        }
    }

    /// Passive regeneration once a player has gone `regen_delay_ms` without
    /// taking damage.
    fn step_regeneration(&mut self, now: u64) {
        let delay = self.config.regen_delay_ms;
        let interval = self.config.regen_interval_ms;
        let fraction = self.config.regen_fraction;
        for player in self.players.values_mut() {
            if player.dead || player.hp >= player.max_hp {
                continue;
            }
            let quiet = player
                .last_damage_at
                .map_or(true, |last| now.saturating_sub(last) >= delay);
            if !quiet || now.saturating_sub(player.last_regen_at) < interval {
                continue;
            }
            let amount = ((player.max_hp as f32 * fraction).round() as i32).max(1);
            player.heal(amount);
            player.last_regen_at = now;
        }
    }

    /// Moves a capped share of each heal pool into hp. A full player's
    /// remaining pool is discarded.
    fn step_potion_drain(&mut self) {
        let fraction = self.config.potion_drain_fraction;
        for player in self.players.values_mut() {
            if player.heal_pool <= 0 || player.dead {
                continue;
            }
            let deficit = player.max_hp - player.hp;
            if deficit > 0 {
                let cap = ((player.max_hp as f32 * fraction).round() as i32).max(1);
                let amount = player.heal_pool.min(cap).min(deficit);
                player.hp += amount;
                player.heal_pool -= amount;
            }
            if player.hp >= player.max_hp {
                player.heal_pool = 0;
            }
        }
    }

    /// Publishes member vitals and refreshes every party with a member here.
    fn step_party_sync(&mut self, now: u64) {
        if now.saturating_sub(self.last_party_sync_at) < self.config.party_sync_interval_ms {
            return;
        }
        self.last_party_sync_at = now;

        let mut parties = BTreeSet::new();
        for player in self.players.values() {
            if let Some(party) = &player.party_id {
                self.bus
                    .update_vitals(&player.identity, player.hp, player.max_hp);
                parties.insert(party.clone());
            }
        }
        for party in parties {
            self.bus.refresh_party(&party);
        }
    }

    /// Clears lingering corpses, spawns due enemies and revives dead players.
    ///
    /// An enemy's respawn delay starts when its corpse is removed. Defined
    /// spawns return to their point, random ones to a fresh random point.
    fn step_respawns(&mut self, now: u64) {
        let corpses: Vec<u32> = self
            .enemies
            .values()
            .filter(|e| e.dead && e.despawn_at.map_or(false, |at| now >= at))
            .map(|e| e.id)
            .collect();
        for id in corpses {
            if let Some(enemy) = self.enemies.remove(&id) {
                self.weapon_hits
                    .retain(|(_, target), _| *target != HitTarget::Enemy(id));
                self.respawns.push(PendingRespawn {
                    at: now + enemy.respawn_ms,
                    enemy_type: enemy.enemy_type,
                    origin: enemy.origin,
                    respawn_ms: enemy.respawn_ms,
                });
            }
        }

        let (due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.respawns)
            .into_iter()
            .partition(|r| now >= r.at);
        self.respawns = pending;
        for respawn in due {
            let position = match &respawn.origin {
                SpawnOrigin::Defined { point, .. } => *point,
                SpawnOrigin::Random => self.random_point(),
            };
            if let Some(id) = self.spawn_enemy(
                &respawn.enemy_type,
                position,
                respawn.origin,
                respawn.respawn_ms,
            ) {
                debug!("Room {}: {} respawned as #{}", self.id, respawn.enemy_type, id);
            }
        }

        let revived: Vec<String> = self
            .players
            .values()
            .filter(|p| p.dead && p.respawn_at.map_or(false, |at| now >= at))
            .map(|p| p.identity.clone())
            .collect();
        for identity in revived {
            self.respawn_player(&identity, now);
        }
    }

    /// Saves every profile to the bus once per `profile_push_interval_ms`.
    fn push_profiles(&mut self, now: u64) {
        if now.saturating_sub(self.last_profile_push_at) < self.config.profile_push_interval_ms {
            return;
        }
        self.last_profile_push_at = now;
        for player in self.players.values() {
            self.bus.save_profile(&player.identity, player.to_profile());
        }
    }

    fn flush_snapshot(&mut self, now: u64) {
        if now.saturating_sub(self.last_snapshot_at) < self.config.snapshot_interval_ms {
            return;
        }
        self.last_snapshot_at = now;
        let snapshot = self.snapshot(now);
        self.broadcast(Packet::Snapshot(snapshot));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Bus;
    use crate::config::GameConfig;
    use crate::game::testing::*;
    use shared::geometry::Vector2;
    use shared::Direction;
    use std::sync::Arc;

    #[test]
    fn test_tick_order_is_fixed() {
        assert_eq!(
            TICK_ORDER,
            [
                TickStep::Coins,
                TickStep::WeaponHits,
                TickStep::Regeneration,
                TickStep::PotionDrain,
                TickStep::PartySync,
                TickStep::Respawns,
                TickStep::EnemyAi,
            ]
        );
    }

    #[test]
    fn test_respawned_enemy_acts_on_same_tick() {
        let (mut room, _rx) = room();
        room.join(1, &request("a", 540.0, 500.0), 0).unwrap();
        let point = Vector2::new(500.0, 500.0);
        let id = room
            .spawn_enemy(
                "goblin",
                point,
                SpawnOrigin::Defined { spawn_id: 1, point },
                0,
            )
            .unwrap();
        let enemy = room.enemies.get_mut(&id).unwrap();
        enemy.dead = true;
        enemy.despawn_at = Some(1_000);

        room.tick(1_000);
        assert!(!room.enemies.contains_key(&id));
        assert_eq!(room.enemies.len(), 1);
        assert_eq!(room.player("a").unwrap().hp, 90);
    }

    #[test]
    fn test_weapon_hit_respects_cooldown() {
        let (mut room, _rx) = room();
        room.join(1, &request("a", 500.0, 500.0), 0).unwrap();
        let id = room
            .spawn_enemy("slime", Vector2::new(500.0, 460.0), SpawnOrigin::Random, 1_000)
            .unwrap();

        room.attack("a", Direction::Up, 0);
        room.tick(0);
        assert_eq!(room.enemies[&id].hp, 20);

        room.tick(10);
        assert_eq!(room.enemies[&id].hp, 20);

        room.tick(400);
        assert!(!room.player("a").unwrap().is_attacking);
    }

    #[test]
    fn test_bonus_adds_to_weapon_damage() {
        let (mut room, _rx) = room();
        room.join(1, &request("a", 500.0, 500.0), 0).unwrap();
        room.player_mut("a").unwrap().grant_xp(100);
        let id = room
            .spawn_enemy("orc", Vector2::new(500.0, 460.0), SpawnOrigin::Random, 1_000)
            .unwrap();
        room.attack("a", Direction::Up, 0);
        room.tick(0);
        assert_eq!(room.enemies[&id].hp, 150 - 12);
    }

    #[test]
    fn test_neutral_zone_blocks_swings() {
        let (mut room, _rx) = room();
        room.join(1, &request("a", 50.0, 50.0), 0).unwrap();
        let id = room
            .spawn_enemy("slime", Vector2::new(50.0, 10.0), SpawnOrigin::Random, 1_000)
            .unwrap();
        room.attack("a", Direction::Up, 0);
        room.tick(0);
        assert_eq!(room.enemies[&id].hp, 30);
    }

    #[test]
    fn test_neutral_zone_shields_targets_from_outside_swings() {
        let (mut room, _rx) = room();
        room.join(1, &request("a", 50.0, 130.0), 0).unwrap();
        room.join(2, &request("b", 50.0, 90.0), 0).unwrap();
        let id = room
            .spawn_enemy("slime", Vector2::new(50.0, 90.0), SpawnOrigin::Random, 1_000)
            .unwrap();
        assert!(!room.in_neutral_zone(room.player("a").unwrap().position));

        // The blade starts straight above the attacker, on top of both targets.
        room.attack("a", Direction::Up, 0);
        room.tick(0);
        assert!(room.player("a").unwrap().is_attacking);
        assert_eq!(room.enemies[&id].hp, 30);
        assert_eq!(room.player("b").unwrap().hp, 100);
    }

    #[test]
    fn test_party_members_cannot_hit_each_other() {
        let (mut room, mut rx) = room();
        room.join(1, &request("a", 500.0, 500.0), 0).unwrap();
        room.join(2, &request("b", 500.0, 460.0), 0).unwrap();
        room.join(3, &request("c", 460.0, 500.0), 0).unwrap();
        room.bus.invite("a", "b").unwrap();
        room.bus.respond("b", "a", true).unwrap();
        pump(&mut room, &mut rx);

        room.attack("a", Direction::Up, 0);
        room.tick(0);
        assert_eq!(room.player("b").unwrap().hp, 100);

        // Three quarters into the swing the blade sits on the left, over c.
        room.tick(300);
        assert_eq!(room.player("c").unwrap().hp, 90);
    }

    #[test]
    fn test_killing_blow_pays_out() {
        let (mut room, _rx) = room();
        room.join(1, &request("a", 500.0, 500.0), 0).unwrap();
        let id = room
            .spawn_enemy("slime", Vector2::new(500.0, 460.0), SpawnOrigin::Random, 1_000)
            .unwrap();
        room.enemies.get_mut(&id).unwrap().hp = 5;
        room.attack("a", Direction::Up, 0);
        room.tick(0);

        assert!(room.enemies[&id].dead);
        let player = room.player("a").unwrap();
        assert_eq!(player.progress.xp, 20);
        assert_eq!(player.gold, 5);
    }

    #[test]
    fn test_regeneration_waits_for_quiet_period() {
        let (mut room, _rx) = room();
        room.join(1, &request("a", 500.0, 500.0), 0).unwrap();
        room.player_mut("a").unwrap().take_damage(50, 0);

        room.tick(4_000);
        assert_eq!(room.player("a").unwrap().hp, 50);
        room.tick(5_000);
        assert_eq!(room.player("a").unwrap().hp, 55);
        room.tick(5_500);
        assert_eq!(room.player("a").unwrap().hp, 55);
        room.tick(6_000);
        assert_eq!(room.player("a").unwrap().hp, 60);
    }

    #[test]
    fn test_potion_pool_drains_gradually() {
        let (mut room, _rx) = room();
        room.join(1, &request("a", 500.0, 500.0), 0).unwrap();
        {
            let player = room.player_mut("a").unwrap();
            player.hp = 40;
            player.heal_pool = 50;
            player.last_damage_at = Some(0);
        }
        room.tick(100);
        let player = room.player("a").unwrap();
        assert_eq!(player.hp, 42);
        assert_eq!(player.heal_pool, 48);

        room.player_mut("a").unwrap().hp = 99;
        room.tick(150);
        let player = room.player("a").unwrap();
        assert_eq!(player.hp, 100);
        assert_eq!(player.heal_pool, 0);
    }

    #[test]
    fn test_player_respawns_at_spawn_point() {
        let (mut room, _rx) = room();
        room.join(1, &request("a", 200.0, 200.0), 0).unwrap();
        room.player_mut("a").unwrap().heal_pool = 30;
        room.kill_player("a", 0);
        room.move_player("a", 210.0, 200.0, Direction::Right, 10, 10);
        assert_eq!(room.player("a").unwrap().position, Vector2::new(200.0, 200.0));

        let respawn = room.config.player_respawn_ms;
        room.tick(respawn);
        let player = room.player("a").unwrap();
        assert!(!player.dead);
        assert_eq!(player.hp, player.max_hp);
        assert_eq!(player.heal_pool, 0);
        assert_eq!(player.position, room.map.spawn_point);
        assert_eq!(player.anchor, room.map.spawn_point);
    }

    #[test]
    fn test_snapshots_follow_interval() {
        let (mut room, _rx) = room();
        room.join(1, &request("a", 200.0, 200.0), 0).unwrap();
        room.outbox.take();

        room.tick(50);
        assert!(!room
            .outbox
            .for_client(1)
            .any(|p| matches!(p, Packet::Snapshot(_))));
        room.tick(100);
        assert!(room
            .outbox
            .for_client(1)
            .any(|p| matches!(p, Packet::Snapshot(s) if s.players.len() == 1)));
    }

    #[test]
    fn test_party_sync_pushes_vitals() {
        let (mut room, mut rx) = room_with(Arc::new(Bus::new(5, 24)), GameConfig::default());
        room.join(1, &request("a", 200.0, 200.0), 0).unwrap();
        room.join(2, &request("b", 220.0, 200.0), 0).unwrap();
        room.bus.invite("a", "b").unwrap();
        room.bus.respond("b", "a", true).unwrap();
        pump(&mut room, &mut rx);

        room.player_mut("b").unwrap().take_damage(30, 0);
        room.tick(1_000);
        pump(&mut room, &mut rx);

        let roster = &room.player("a").unwrap().party_roster;
        let b = roster.iter().find(|m| m.identity == "b").unwrap();
        assert_eq!(b.hp, 70);
    }
}
