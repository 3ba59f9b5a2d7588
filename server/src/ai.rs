//! Enemy behaviour: pick the nearest visible player, chase it, then strike.

use crate::game::RoomState;
use shared::combat::{facing_for, hitbox, point_in_hitbox};
use shared::geometry::Vector2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiDecision {
    Idle,
    Chase,
    Attack,
}

/// What an enemy does given the distance to its nearest visible player.
pub fn decide(distance: Option<f32>, aggro_range: f32, attack_range: f32) -> AiDecision {
    match distance {
        Some(d) if d > aggro_range => AiDecision::Idle,
        Some(d) if d > attack_range => AiDecision::Chase,
        Some(_) => AiDecision::Attack,
        None => AiDecision::Idle,
    }
}

struct Target {
    identity: String,
    position: Vector2,
    distance: f32,
}

impl RoomState {
    pub(crate) fn step_enemy_ai(&mut self, now: u64, dt: f32) {
        let ids: Vec<u32> = self
            .enemies
            .values()
            .filter(|e| !e.dead)
            .map(|e| e.id)
            .collect();
        for id in ids {
            self.update_enemy(id, now, dt);
        }
    }

    /// Nearest living, connected player outside every neutral zone.
    fn nearest_target(&self, from: Vector2) -> Option<Target> {
        self.players
            .values()
            .filter(|p| p.is_alive() && !p.disconnected && !self.in_neutral_zone(p.position))
            .map(|p| (p, p.position.distance(&from)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(p, distance)| Target {
                identity: p.identity.clone(),
                position: p.position,
                distance,
            })
    }

    fn update_enemy(&mut self, id: u32, now: u64, dt: f32) {
        let Some(enemy) = self.enemies.get(&id) else {
            return;
        };
        let Some(template) = self.registry.enemy(&enemy.enemy_type).cloned() else {
            return;
        };
        let position = enemy.position;
        let facing = enemy.direction;

        let target = self.nearest_target(position);
        let decision = decide(
            target.as_ref().map(|t| t.distance),
            template.aggro_range,
            template.attack_range,
        );

        match (decision, target) {
            (AiDecision::Chase, Some(target)) => {
                let heading = target.position.sub(&position).normalize();
                let step = (template.speed * dt).min(target.distance);
                let next = self.step_outside_neutral(position, heading.scale(step));
                if let Some(enemy) = self.enemies.get_mut(&id) {
                    enemy.direction = facing_for(next.sub(&position))
                        .or_else(|| facing_for(heading))
                        .unwrap_or(facing);
                    enemy.position = next;
                    enemy.is_attacking = false;
                }
            }
            (AiDecision::Attack, Some(target)) => {
                let direction = facing_for(target.position.sub(&position)).unwrap_or(facing);
                if let Some(enemy) = self.enemies.get_mut(&id) {
                    enemy.direction = direction;
                    enemy.attack_direction = direction;
                    enemy.is_attacking = true;
                }

                let key = (id, target.identity);
                let ready = self
                    .enemy_hits
                    .get(&key)
                    .map_or(true, |last| now.saturating_sub(*last) >= template.attack_cooldown_ms);
                let reach = hitbox(position.x, position.y, direction, self.config.enemy_reach_expand);
                if !ready || !point_in_hitbox(target.position.x, target.position.y, &reach) {
                    return;
                }

                let (_, identity) = &key;
                let lethal = self
                    .players
                    .get_mut(identity)
                    .map_or(false, |p| p.take_damage(template.damage, now));
                let identity = identity.clone();
                self.enemy_hits.insert(key, now);
                if lethal {
                    self.kill_player(&identity, now);
                }
            }
            _ => {
                if let Some(enemy) = self.enemies.get_mut(&id) {
                    enemy.is_attacking = false;
                }
            }
        }
    }

    /// Applies `delta` unless it ends inside a neutral zone, in which case the
    /// enemy slides along whichever single axis stays outside.
    fn step_outside_neutral(&self, from: Vector2, delta: Vector2) -> Vector2 {
        let bounds = self.map.bounds;
        let attempts = [delta, Vector2::new(delta.x, 0.0), Vector2::new(0.0, delta.y)];
        attempts
            .iter()
            .map(|d| bounds.clamp(from.add(d)))
            .find(|next| !self.in_neutral_zone(*next))
            .unwrap_or(from)
    }
}
