//! Replicated entity state owned by a room.

use crate::bus::Profile;
use crate::content::EnemyTemplate;
use shared::geometry::Vector2;
use shared::leveling::{self, Progress};
use shared::{
    Direction, EnemySnapshot, PartyView, PlayerSnapshot, RosterEntry, DEFAULT_MAX_HEALTH,
};

#[derive(Debug, Clone)]
pub struct Player {
    pub session_id: u32,
    pub identity: String,
    pub nickname: String,
    pub skin: String,
    pub privileged: bool,

    pub position: Vector2,
    pub direction: Direction,
    pub hp: i32,
    pub max_hp: i32,
    pub progress: Progress,
    pub combat_bonus: i32,

    pub weapon: Option<String>,
    pub weapon_visible: bool,
    pub gold: u64,
    pub potions: u32,
    pub heal_pool: i32,

    pub dead: bool,
    pub respawn_at: Option<u64>,

    pub is_attacking: bool,
    pub attack_direction: Direction,
    pub attack_started_at: u64,

    /// Anti-cheat anchor: last accepted position and the client timestamp of that move.
    pub anchor: Vector2,
    pub anchor_timestamp: Option<u64>,
    pub anchor_server_time: u64,

    pub last_damage_at: Option<u64>,
    pub last_regen_at: u64,

    pub party_id: Option<String>,
    pub party_owner: bool,
    pub party_name: Option<String>,
    pub party_roster: Vec<RosterEntry>,

    pub disconnected: bool,
    /// Bumped on every disconnect so a stale grace timer can be recognised.
    pub grace_epoch: u64,
}

impl Player {
    pub fn new(
        session_id: u32,
        identity: &str,
        nickname: &str,
        skin: &str,
        position: Vector2,
    ) -> Self {
        Self {
            session_id,
            identity: identity.to_string(),
            nickname: nickname.to_string(),
            skin: skin.to_string(),
            privileged: false,
            position,
            direction: Direction::Down,
            hp: DEFAULT_MAX_HEALTH,
            max_hp: DEFAULT_MAX_HEALTH,
            progress: Progress::new(),
            combat_bonus: 0,
            weapon: None,
            weapon_visible: true,
            gold: 0,
            potions: 0,
            heal_pool: 0,
            dead: false,
            respawn_at: None,
            is_attacking: false,
            attack_direction: Direction::Down,
            attack_started_at: 0,
            anchor: position,
            anchor_timestamp: None,
            anchor_server_time: 0,
            last_damage_at: None,
            last_regen_at: 0,
            party_id: None,
            party_owner: false,
            party_name: None,
            party_roster: Vec::new(),
            disconnected: false,
            grace_epoch: 0,
        }
    }

    /// Restores persistent fields from a saved profile. Nickname and skin come
    /// from the join request, not the profile.
    pub fn restore(&mut self, profile: &Profile) {
        self.progress = Progress {
            level: profile.level.max(1),
            xp: profile.xp,
        };
        self.combat_bonus = leveling::combat_bonus_for(self.progress.level);
        self.gold = profile.gold;
        self.max_hp = profile.max_hp.max(1);
        self.hp = profile.hp.clamp(0, self.max_hp);
        if self.hp == 0 {
            self.hp = self.max_hp;
        }
        self.weapon = profile.weapon.clone();
        self.potions = profile.potions;
        self.heal_pool = profile.heal_pool.max(0);
        self.party_id = profile.party_id.clone();
        self.party_owner = profile.party_owner;
        self.party_name = profile.party_name.clone();
    }

    pub fn to_profile(&self) -> Profile {
        Profile {
            nickname: self.nickname.clone(),
            skin: self.skin.clone(),
            level: self.progress.level,
            xp: self.progress.xp,
            gold: self.gold,
            hp: self.hp,
            max_hp: self.max_hp,
            weapon: self.weapon.clone(),
            potions: self.potions,
            heal_pool: self.heal_pool,
            party_id: self.party_id.clone(),
            party_owner: self.party_owner,
            party_name: self.party_name.clone(),
        }
    }

    pub fn is_alive(&self) -> bool {
        !self.dead
    }

    /// Applies damage and returns true if it was lethal.
    pub fn take_damage(&mut self, amount: i32, now: u64) -> bool {
        if self.dead || amount <= 0 {
            return false;
        }
        self.hp = (self.hp - amount).max(0);
        self.last_damage_at = Some(now);
        self.last_regen_at = now;
        self.hp == 0
    }

    pub fn heal(&mut self, amount: i32) -> i32 {
        let healed = amount.clamp(0, self.max_hp - self.hp);
        self.hp += healed;
        healed
    }

    /// Grants experience; every level gained raises max health, restores
    /// health fully and increases the combat bonus.
    pub fn grant_xp(&mut self, amount: u64) -> u32 {
        let gained = self.progress.grant(amount);
        for _ in 0..gained {
            self.max_hp += leveling::HP_PER_LEVEL;
            self.combat_bonus += leveling::BONUS_PER_LEVEL;
            self.hp = self.max_hp;
        }
        gained
    }

    /// Mirrors the bus's view of this player's party.
    pub fn set_party(&mut self, view: Option<&PartyView>) {
        match view {
            Some(view) => {
                self.party_id = Some(view.id.clone());
                self.party_owner = view.owner == self.identity;
                self.party_name = Some(view.name.clone());
                self.party_roster = view.members.clone();
            }
            None => {
                self.party_id = None;
                self.party_owner = false;
                self.party_name = None;
                self.party_roster.clear();
            }
        }
    }

    pub fn same_party(&self, other: &Player) -> bool {
        matches!((&self.party_id, &other.party_id), (Some(a), Some(b)) if a == b)
    }

    pub fn reset_anchor(&mut self, now: u64) {
        self.anchor = self.position;
        self.anchor_timestamp = None;
        self.anchor_server_time = now;
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            session_id: self.session_id,
            identity: self.identity.clone(),
            nickname: self.nickname.clone(),
            skin: self.skin.clone(),
            x: self.position.x,
            y: self.position.y,
            direction: self.direction,
            hp: self.hp,
            max_hp: self.max_hp,
            level: self.progress.level,
            xp: self.progress.xp,
            combat_bonus: self.combat_bonus,
            weapon: self.weapon.clone(),
            weapon_visible: self.weapon_visible,
            gold: self.gold,
            potions: self.potions,
            heal_pool: self.heal_pool,
            dead: self.dead,
            is_attacking: self.is_attacking,
            attack_direction: self.attack_direction,
            party_id: self.party_id.clone(),
            party_owner: self.party_owner,
            party_name: self.party_name.clone(),
            party_roster: self.party_roster.clone(),
            disconnected: self.disconnected,
        }
    }
}

/// Where an enemy came from, which decides where it comes back.
#[derive(Debug, Clone, PartialEq)]
pub enum SpawnOrigin {
    Defined { spawn_id: u32, point: Vector2 },
    Random,
}

#[derive(Debug, Clone)]
pub struct Enemy {
    pub id: u32,
    pub enemy_type: String,
    pub origin: SpawnOrigin,
    pub respawn_ms: u64,
    pub position: Vector2,
    pub direction: Direction,
    pub hp: i32,
    pub max_hp: i32,
    pub is_attacking: bool,
    pub attack_direction: Direction,
    pub dead: bool,
    /// Set on death; the corpse is removed once this passes.
    pub despawn_at: Option<u64>,
}

impl Enemy {
    pub fn spawn(
        id: u32,
        enemy_type: &str,
        template: &EnemyTemplate,
        origin: SpawnOrigin,
        position: Vector2,
        respawn_ms: u64,
    ) -> Self {
        Self {
            id,
            enemy_type: enemy_type.to_string(),
            origin,
            respawn_ms,
            position,
            direction: Direction::Down,
            hp: template.max_health,
            max_hp: template.max_health,
            is_attacking: false,
            attack_direction: Direction::Down,
            dead: false,
            despawn_at: None,
        }
    }

    /// Applies damage and returns true if it killed the enemy.
    pub fn take_damage(&mut self, amount: i32) -> bool {
        if self.dead || amount <= 0 {
            return false;
        }
        self.hp = (self.hp - amount).max(0);
        if self.hp == 0 {
            self.dead = true;
            self.is_attacking = false;
        }
        self.dead
    }

    pub fn snapshot(&self) -> EnemySnapshot {
        EnemySnapshot {
            id: self.id,
            enemy_type: self.enemy_type.clone(),
            x: self.position.x,
            y: self.position.y,
            direction: self.direction,
            hp: self.hp,
            max_hp: self.max_hp,
            is_attacking: self.is_attacking,
            attack_direction: self.attack_direction,
            dead: self.dead,
        }
    }
}

/// A queued enemy respawn.
#[derive(Debug, Clone)]
pub struct PendingRespawn {
    pub at: u64,
    pub enemy_type: String,
    pub origin: SpawnOrigin,
    pub respawn_ms: u64,
}

#[derive(Debug, Clone)]
pub struct PendingCoin {
    pub id: u32,
    pub position: Vector2,
    pub amount: u64,
    pub expires_at: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player() -> Player {
        Player::new(1, "id-1", "Ayla", "knight", Vector2::new(10.0, 10.0))
    }

    #[test]
    fn test_damage_clamps_to_zero() {
        let mut p = player();
        assert!(!p.take_damage(30, 100));
        assert_eq!(p.hp, 70);
        assert!(p.take_damage(500, 200));
        assert_eq!(p.hp, 0);
        assert_eq!(p.last_damage_at, Some(200));
    }

    #[test]
    fn test_heal_never_exceeds_max() {
        let mut p = player();
        p.hp = 90;
        assert_eq!(p.heal(50), 10);
        assert_eq!(p.hp, p.max_hp);
        assert_eq!(p.heal(-5), 0);
    }

    #[test]
    fn test_grant_xp_levels_twice() {
        let mut p = player();
        p.hp = 40;
        let gained = p.grant_xp(250);
        assert_eq!(gained, 2);
        assert_eq!(p.progress.level, 3);
        assert_eq!(p.max_hp, DEFAULT_MAX_HEALTH + 2 * leveling::HP_PER_LEVEL);
        assert_eq!(p.hp, p.max_hp);
        assert_eq!(p.combat_bonus, 2 * leveling::BONUS_PER_LEVEL);
    }

    #[test]
    fn test_profile_roundtrip_keeps_progress() {
        let mut p = player();
        p.grant_xp(150);
        p.gold = 77;
        p.weapon = Some("iron_sword".to_string());
        let profile = p.to_profile();

        let mut restored = Player::new(9, "id-1", "Ayla", "knight", Vector2::default());
        restored.restore(&profile);
        assert_eq!(restored.progress, p.progress);
        assert_eq!(restored.gold, 77);
        assert_eq!(restored.combat_bonus, p.combat_bonus);
        assert_eq!(restored.weapon.as_deref(), Some("iron_sword"));
    }

    #[test]
    fn test_party_view_sets_owner_flag() {
        let mut p = player();
        let view = PartyView {
            id: "id-1".to_string(),
            name: "Ayla's party".to_string(),
            owner: "id-1".to_string(),
            members: Vec::new(),
        };
        p.set_party(Some(&view));
        assert!(p.party_owner);
        assert_eq!(p.party_id.as_deref(), Some("id-1"));

        let mut other = Player::new(2, "id-2", "Bo", "knight", Vector2::default());
        other.set_party(Some(&view));
        assert!(!other.party_owner);
        assert!(p.same_party(&other));

        p.set_party(None);
        assert!(!p.party_owner);
        assert!(!p.same_party(&other));
    }

    #[test]
    fn test_enemy_death_flag() {
        let template = crate::content::Registry::builtin()
            .enemy("slime")
            .cloned()
            .unwrap();
        let mut enemy = Enemy::spawn(
            1,
            "slime",
            &template,
            SpawnOrigin::Random,
            Vector2::default(),
            0,
        );
        assert!(!enemy.take_damage(10));
        assert!(enemy.take_damage(100));
        assert!(enemy.dead);
        assert_eq!(enemy.hp, 0);
        assert!(!enemy.take_damage(5));
    }
}
