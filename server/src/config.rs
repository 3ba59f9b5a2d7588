//! Tunable simulation constants.
//!
//! Every field has a default, so a JSON override file only needs to name the
//! values it changes.

use serde::Deserialize;
use shared::reward::{RewardRules, DEFAULT_SHARE_RADIUS, DEFAULT_TIE_TOLERANCE};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub tick_ms: u64,
    pub snapshot_interval_ms: u64,

    // Movement
    pub player_speed: f32,
    pub move_tolerance: f32,
    /// How far a client's move timestamps may run ahead of server time.
    pub move_clock_slack_ms: u64,
    /// Upper bound on the time window a single move may cover.
    pub max_move_window_ms: u64,

    // Player melee
    pub attack_duration_ms: u64,
    pub weapon_orbit_radius: f32,
    pub weapon_hit_radius: f32,
    pub weapon_hit_cooldown_ms: u64,
    pub starting_weapon: String,

    // Enemy melee
    pub enemy_reach_expand: f32,

    // Recovery
    pub regen_delay_ms: u64,
    pub regen_interval_ms: u64,
    pub regen_fraction: f32,
    pub potion_price: u64,
    pub potion_heal_fraction: f32,
    pub potion_drain_fraction: f32,

    // Lifecycle
    pub player_respawn_ms: u64,
    pub enemy_linger_ms: u64,
    pub fallback_respawn_ms: u64,
    pub grace_period_ms: u64,
    pub heartbeat_timeout_ms: u64,

    // Economy
    pub coin_pickup_radius: f32,
    pub coin_lifetime_ms: u64,
    pub kill_gold_range: f32,
    pub tie_tolerance: f32,
    pub share_radius: f32,

    // Parties and social
    pub max_party_size: usize,
    pub party_sync_interval_ms: u64,
    pub party_name_max_len: usize,
    pub chat_max_len: usize,
    pub profile_push_interval_ms: u64,
    pub leaderboard_size: usize,
    pub leaderboard_interval_ms: u64,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            tick_ms: 50,
            snapshot_interval_ms: 100,
            player_speed: shared::PLAYER_SPEED,
            move_tolerance: 1.6,
            move_clock_slack_ms: 250,
            max_move_window_ms: 1_000,
            attack_duration_ms: 400,
            weapon_orbit_radius: 40.0,
            weapon_hit_radius: 28.0,
            weapon_hit_cooldown_ms: 250,
            starting_weapon: "wooden_sword".to_string(),
            enemy_reach_expand: 16.0,
            regen_delay_ms: 5_000,
            regen_interval_ms: 1_000,
            regen_fraction: 0.05,
            potion_price: 20,
            potion_heal_fraction: 0.5,
            potion_drain_fraction: 0.02,
            player_respawn_ms: 3_000,
            enemy_linger_ms: 1_000,
            fallback_respawn_ms: 10_000,
            grace_period_ms: 60_000,
            heartbeat_timeout_ms: 5_000,
            coin_pickup_radius: 24.0,
            coin_lifetime_ms: 30_000,
            kill_gold_range: 96.0,
            tie_tolerance: DEFAULT_TIE_TOLERANCE,
            share_radius: DEFAULT_SHARE_RADIUS,
            max_party_size: 5,
            party_sync_interval_ms: 1_000,
            party_name_max_len: 24,
            chat_max_len: 200,
            profile_push_interval_ms: 2_000,
            leaderboard_size: 10,
            leaderboard_interval_ms: 5_000,
        }
    }
}

impl GameConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn reward_rules(&self) -> RewardRules {
        RewardRules {
            tie_tolerance: self.tie_tolerance,
            share_radius: self.share_radius,
        }
    }
}
