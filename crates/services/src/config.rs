use chrono::{FixedOffset, Offset, Utc};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("UTC offset of {0} minutes is out of range")]
    InvalidOffset(i32),
}

/// Tunables shared by the reward and ranking services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardsConfig {
    /// Offset whose local midnight separates calendar days.
    pub day_offset: FixedOffset,
    pub snapshot_retention_days: u32,
    pub rank_history_limit: u32,
    /// When set, the ranking trigger must present this value.
    pub ranking_secret: Option<String>,
    pub max_commit_attempts: u32,
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl Default for RewardsConfig {
    fn default() -> Self {
        Self {
            day_offset: Utc.fix(),
            snapshot_retention_days: 30,
            rank_history_limit: 30,
            ranking_secret: None,
            max_commit_attempts: 5,
            default_page_size: 20,
            max_page_size: 100,
        }
    }
}

impl RewardsConfig {
    /// Use a day boundary `minutes` east of UTC (negative = west).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidOffset` outside of ±24h.
    pub fn with_offset_minutes(mut self, minutes: i32) -> Result<Self, ConfigError> {
        self.day_offset = minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or(ConfigError::InvalidOffset(minutes))?;
        Ok(self)
    }

    /// Require `secret` on the ranking trigger. Blank values disable the check.
    #[must_use]
    pub fn with_ranking_secret(mut self, secret: Option<String>) -> Self {
        self.ranking_secret = secret.filter(|s| !s.trim().is_empty());
        self
    }
}
