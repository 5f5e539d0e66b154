//! Level derivation. Levels are uncapped and purely a function of total XP.

use serde::{Deserialize, Serialize};

/// XP needed to advance one level.
pub const XP_PER_LEVEL: u64 = 100;

/// `floor(total_xp / 100) + 1`, saturating at `u32::MAX`.
#[must_use]
pub fn level_for_xp(total_xp: u64) -> u32 {
    u32::try_from(total_xp / XP_PER_LEVEL)
        .unwrap_or(u32::MAX - 1)
        .saturating_add(1)
}

/// XP still missing before the next level.
#[must_use]
pub fn xp_to_next_level(total_xp: u64) -> u64 {
    XP_PER_LEVEL - total_xp % XP_PER_LEVEL
}

/// Level before and after a credit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelChange {
    pub previous: u32,
    pub current: u32,
}

impl LevelChange {
    #[must_use]
    pub fn between(previous_xp: u64, current_xp: u64) -> Self {
        Self {
            previous: level_for_xp(previous_xp),
            current: level_for_xp(current_xp),
        }
    }

    #[must_use]
    pub fn leveled_up(&self) -> bool {
        self.current > self.previous
    }

    /// Number of levels gained; one credit can cross several boundaries.
    #[must_use]
    pub fn levels_gained(&self) -> u32 {
        self.current.saturating_sub(self.previous)
    }
}
