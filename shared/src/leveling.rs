//! Experience curve and level-up bookkeeping.

use serde::{Deserialize, Serialize};

pub const XP_BASE: f64 = 100.0;
pub const XP_GROWTH: f64 = 1.1;
pub const HP_PER_LEVEL: i32 = 10;
pub const BONUS_PER_LEVEL: i32 = 2;

/// XP required to advance from `level` to `level + 1`.
pub fn xp_to_next(level: u32) -> u64 {
    let exponent = level.max(1) - 1;
    (XP_BASE * XP_GROWTH.powi(exponent as i32)).floor() as u64
}

/// Additive damage bonus earned by reaching `level`.
pub fn combat_bonus_for(level: u32) -> i32 {
    (level.max(1) as i32 - 1) * BONUS_PER_LEVEL
}

/// Level and in-level experience of one character.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Progress {
    pub level: u32,
    pub xp: u64,
}

impl Progress {
    pub fn new() -> Self {
        Self { level: 1, xp: 0 }
    }

    /// Adds `amount` experience and returns how many levels were gained.
    ///
    /// Leftover experience after each level-up is carried into the next level,
    /// so a single large grant can cross several thresholds.
    pub fn grant(&mut self, amount: u64) -> u32 {
        self.xp += amount;
        let mut gained = 0;
        loop {
            let needed = xp_to_next(self.level);
            if self.xp < needed {
                break;
            }
            self.xp -= needed;
            self.level += 1;
            gained += 1;
        }
        gained
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}
