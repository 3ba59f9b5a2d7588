//! Kill rewards, coin drops and coin pickup.

use crate::entity::PendingCoin;
use crate::game::RoomState;
use log::{debug, info, warn};
use rand::Rng;
use shared::geometry::Vector2;
use shared::reward::{self, Allocation, Candidate};
use shared::Packet;

impl RoomState {
    /// Living, connected players as reward candidates.
    pub(crate) fn reward_candidates(&self) -> Vec<Candidate<String>> {
        self.players
            .values()
            .filter(|p| p.is_alive() && !p.disconnected)
            .map(|p| Candidate {
                id: p.identity.clone(),
                position: p.position,
                party_id: p.party_id.clone(),
            })
            .collect()
    }

    /// Marks the corpse for removal and pays out experience, gold and a
    /// possible coin drop.
    pub(crate) fn on_enemy_killed(&mut self, enemy_id: u32, killer: &str, now: u64) {
        let linger = self.config.enemy_linger_ms;
        let Some(enemy) = self.enemies.get_mut(&enemy_id) else {
            return;
        };
        enemy.despawn_at = Some(now + linger);
        let origin = enemy.position;
        let enemy_type = enemy.enemy_type.clone();
        self.enemy_hits.retain(|(id, _), _| *id != enemy_id);

        let Some(template) = self.registry.enemy(&enemy_type).cloned() else {
            warn!("No template for killed enemy type `{}`", enemy_type);
            return;
        };
        info!(
            "Room {}: {} killed {} #{}",
            self.id, killer, enemy_type, enemy_id
        );

        let candidates = self.reward_candidates();
        let Some(killer_candidate) = candidates.iter().find(|c| c.id == killer).cloned() else {
            return;
        };

        let xp = reward::plan_xp(
            &killer_candidate,
            &candidates,
            origin,
            template.xp_reward,
            self.config.share_radius,
        );
        for allocation in xp {
            self.award_xp(&allocation.id, allocation.amount);
        }

        let mut gold = reward::plan_gold(
            &candidates,
            origin,
            template.gold_reward,
            self.config.kill_gold_range,
            self.config.reward_rules(),
        );
        if gold.is_empty() && template.gold_reward > 0 {
            gold.push(Allocation {
                id: killer.to_string(),
                amount: template.gold_reward,
                shared: false,
            });
        }
        self.award_gold(gold);

        if self.rng.gen_bool(template.coin_drop_chance.clamp(0.0, 1.0)) {
            self.drop_coin(origin, (template.gold_reward / 2).max(1), now);
        }
    }

    /// Places a coin and announces it with `CoinDrop`.
    pub(crate) fn drop_coin(&mut self, position: Vector2, amount: u64, now: u64) {
        let id = self.next_coin_id();
        self.coins.push(PendingCoin {
            id,
            position,
            amount,
            expires_at: now + self.config.coin_lifetime_ms,
        });
        debug!("Room {}: coin {} worth {} dropped", self.id, id, amount);
        self.broadcast(Packet::CoinDrop {
            id,
            x: position.x,
            y: position.y,
        });
    }

    fn award_xp(&mut self, identity: &str, amount: u64) {
        let Some(player) = self.players.get_mut(identity) else {
            return;
        };
        let gained = player.grant_xp(amount);
        if gained > 0 {
            let level = player.progress.level;
            info!("{} reached level {}", identity, level);
            self.notice(identity, format!("You reached level {}", level));
        }
    }

    /// Credits planned gold. Shared allocations notify the recipient.
    fn award_gold(&mut self, allocations: Vec<Allocation<String>>) {
        for allocation in allocations {
            let Some(player) = self.players.get_mut(&allocation.id) else {
                continue;
            };
            player.gold += allocation.amount;
            if allocation.shared {
                self.notice(
                    &allocation.id,
                    format!("You received {} gold from a party share", allocation.amount),
                );
            }
        }
    }

    /// Removes expired coins and hands collected ones to the nearest players.
    /// Expiry wins over collection when both happen on the same tick and is
    /// silent.
    pub(crate) fn step_coins(&mut self, now: u64) {
        if self.coins.is_empty() {
            return;
        }
        let candidates = self.reward_candidates();
        let radius = self.config.coin_pickup_radius;
        let rules = self.config.reward_rules();

        let mut kept = Vec::with_capacity(self.coins.len());
        let mut removed = Vec::new();
        let mut payouts = Vec::new();
        for coin in std::mem::take(&mut self.coins) {
            if now >= coin.expires_at {
                debug!("Room {}: coin {} expired", self.id, coin.id);
                continue;
            }
            let plan = reward::plan_gold(&candidates, coin.position, coin.amount, radius, rules);
            if plan.is_empty() {
                kept.push(coin);
            } else {
                removed.push(coin.id);
                payouts.extend(plan);
            }
        }
        self.coins = kept;

        self.award_gold(payouts);
        for id in removed {
            self.broadcast(Packet::CoinCollected { id });
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::bus::Bus;
    use crate::config::GameConfig;
    use crate::entity::SpawnOrigin;
    use crate::game::testing::*;
    use shared::geometry::Vector2;
    use shared::Packet;
    use std::sync::Arc;

    #[test]
    fn test_scenario_party_xp_split() {
        let (mut room, mut rx) = room();
        room.join(1, &request("a", 500.0, 500.0), 0).unwrap();
        room.join(2, &request("b", 800.0, 500.0), 0).unwrap();
        room.join(3, &request("c", 500.0, 1000.0), 0).unwrap();
        room.player_mut("c").unwrap().position = Vector2::new(1000.0, 1000.0);
        room.bus.invite("a", "b").unwrap();
        room.bus.respond("b", "a", true).unwrap();
        room.bus.invite("a", "c").unwrap();
        room.bus.respond("c", "a", true).unwrap();
        pump(&mut room, &mut rx);

        // c is ~707 units away from the kill, outside the share radius.
        let id = room
            .spawn_enemy("goblin", Vector2::new(500.0, 500.0), SpawnOrigin::Random, 1_000)
            .unwrap();
        room.enemies.get_mut(&id).unwrap().dead = true;
        room.on_enemy_killed(id, "a", 100);

        assert_eq!(room.player("a").unwrap().progress.xp, 25);
        assert_eq!(room.player("b").unwrap().progress.xp, 25);
        assert_eq!(room.player("c").unwrap().progress.xp, 0);
        assert_eq!(room.enemies[&id].despawn_at, Some(1_100));
    }

    #[test]
    fn test_kill_gold_goes_to_nearest() {
        let (mut room, _rx) = room();
        room.join(1, &request("a", 500.0, 500.0), 0).unwrap();
        room.join(2, &request("b", 540.0, 500.0), 0).unwrap();

        let id = room
            .spawn_enemy("slime", Vector2::new(480.0, 500.0), SpawnOrigin::Random, 1_000)
            .unwrap();
        room.on_enemy_killed(id, "b", 0);

        assert_eq!(room.player("a").unwrap().gold, 5);
        assert_eq!(room.player("b").unwrap().gold, 0);
        assert_eq!(room.player("b").unwrap().progress.xp, 20);
    }

    #[test]
    fn test_kill_gold_falls_back_to_killer() {
        let config = GameConfig {
            kill_gold_range: 10.0,
            ..GameConfig::default()
        };
        let (mut room, _rx) = room_with(Arc::new(Bus::new(5, 24)), config);
        room.join(1, &request("a", 500.0, 500.0), 0).unwrap();
        let id = room
            .spawn_enemy("orc", Vector2::new(560.0, 500.0), SpawnOrigin::Random, 1_000)
            .unwrap();
        room.on_enemy_killed(id, "a", 0);
        assert_eq!(room.player("a").unwrap().gold, 30);
    }

    #[test]
    fn test_coin_collected_by_nearby_player() {
        let (mut room, _rx) = room();
        room.join(1, &request("a", 500.0, 500.0), 0).unwrap();
        room.drop_coin(Vector2::new(510.0, 500.0), 7, 0);
        room.drop_coin(Vector2::new(900.0, 900.0), 3, 0);
        let far_coin = room.coins[1].id;
        room.outbox.take();

        room.step_coins(50);
        assert_eq!(room.player("a").unwrap().gold, 7);
        assert_eq!(room.coins.len(), 1);
        assert_eq!(room.coins[0].id, far_coin);
        assert!(room
            .outbox
            .for_client(1)
            .any(|p| matches!(p, Packet::CoinCollected { .. })));
    }

    #[test]
    fn test_expired_coin_pays_nothing() {
        let (mut room, _rx) = room();
        room.join(1, &request("a", 500.0, 500.0), 0).unwrap();
        room.drop_coin(Vector2::new(500.0, 500.0), 7, 0);

        room.outbox.take();

        room.step_coins(room.config.coin_lifetime_ms);
        assert!(room.coins.is_empty());
        assert_eq!(room.player("a").unwrap().gold, 0);
        assert!(!room
            .outbox
            .for_client(1)
            .any(|p| matches!(p, Packet::CoinCollected { .. })));
    }

    #[test]
    fn test_dead_player_cannot_collect() {
        let (mut room, _rx) = room();
        room.join(1, &request("a", 500.0, 500.0), 0).unwrap();
        room.player_mut("a").unwrap().dead = true;
        room.drop_coin(Vector2::new(500.0, 500.0), 7, 0);
        room.step_coins(10);
        assert_eq!(room.coins.len(), 1);
    }
}
