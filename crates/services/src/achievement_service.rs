use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use rewards_core::achievements::{Achievement, UserStats, cascade};
use rewards_core::model::UserId;
use storage::repository::{CreditReceipt, ProgressRepository, StorageError, UserRepository};

/// An achievement unlocked by this call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnlockedAchievement {
    pub id: &'static str,
    pub title: &'static str,
    pub xp_reward: u64,
}

impl From<&Achievement> for UnlockedAchievement {
    fn from(a: &Achievement) -> Self {
        Self {
            id: a.id,
            title: a.title,
            xp_reward: a.xp_reward,
        }
    }
}

/// Achievements unlocked in one evaluation plus the last resulting credit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AchievementUnlocks {
    pub unlocked: Vec<UnlockedAchievement>,
    pub last_credit: Option<CreditReceipt>,
}

impl AchievementUnlocks {
    #[must_use]
    pub fn xp(&self) -> u64 {
        self.unlocked.iter().map(|a| a.xp_reward).sum()
    }
}

/// Evaluates the achievement catalog and credits unlocks through the ledger.
#[derive(Clone)]
pub struct AchievementService {
    users: Arc<dyn UserRepository>,
    progress: Arc<dyn ProgressRepository>,
}

impl AchievementService {
    #[must_use]
    pub fn new(users: Arc<dyn UserRepository>, progress: Arc<dyn ProgressRepository>) -> Self {
        Self { users, progress }
    }

    /// Current statistics for a user.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` for unknown users, or other storage errors.
    pub async fn stats(&self, user_id: &UserId) -> Result<UserStats, StorageError> {
        let user = self
            .users
            .get_user(user_id)
            .await?
            .ok_or(StorageError::NotFound)?;
        let records = self.progress.progress_for_user(user_id).await?;
        let bonuses = self.progress.count_bonus_claims(user_id).await?;
        Ok(UserStats::from_records(&user, &records, bonuses))
    }

    /// Unlocks every achievement the user now qualifies for, including those
    /// reached only through the XP of other unlocks in the same pass.
    ///
    /// An achievement already recorded (e.g. by a concurrent request) is
    /// skipped without credit.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if reading statistics or recording an unlock fails.
    pub async fn unlock_earned(
        &self,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<AchievementUnlocks, StorageError> {
        let stats = self.stats(user_id).await?;
        let already = self.users.unlocked_achievements(user_id).await?;

        let mut out = AchievementUnlocks::default();
        for achievement in cascade(&stats, &already) {
            let receipt = self
                .users
                .unlock_achievement(user_id, achievement.id, achievement.xp_reward, now)
                .await?;
            if let Some(credit) = receipt {
                info!(
                    user = %user_id,
                    achievement = achievement.id,
                    xp = achievement.xp_reward,
                    "achievement unlocked"
                );
                out.unlocked.push(achievement.into());
                out.last_credit = Some(credit);
            }
        }

        Ok(out)
    }
}
