use std::sync::Arc;

use storage::repository::Storage;

use crate::Clock;
use crate::achievement_service::AchievementService;
use crate::bonus_detector::BonusDetector;
use crate::config::RewardsConfig;
use crate::error::AppServicesError;
use crate::leaderboard::LeaderboardService;
use crate::progress_service::ProgressService;
use crate::ranking_job::RankingJob;
use crate::registration::RegistrationService;

/// Assembles the app-facing services over one storage backend.
#[derive(Clone)]
pub struct AppServices {
    config: Arc<RewardsConfig>,
    progress: Arc<ProgressService>,
    achievements: Arc<AchievementService>,
    ranking: Arc<RankingJob>,
    leaderboard: Arc<LeaderboardService>,
    registration: Arc<RegistrationService>,
}

impl AppServices {
    /// Build services backed by `SQLite` storage.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if storage initialization fails.
    pub async fn new_sqlite(
        db_url: &str,
        clock: Clock,
        config: RewardsConfig,
    ) -> Result<Self, AppServicesError> {
        let storage = Storage::sqlite(db_url).await?;
        Ok(Self::from_storage(&storage, clock, config))
    }

    /// Build services over an in-memory store.
    #[must_use]
    pub fn in_memory(clock: Clock, config: RewardsConfig) -> Self {
        Self::from_storage(&Storage::in_memory(), clock, config)
    }

    #[must_use]
    pub fn from_storage(storage: &Storage, clock: Clock, config: RewardsConfig) -> Self {
        let config = Arc::new(config);

        let achievements = AchievementService::new(
            Arc::clone(&storage.users),
            Arc::clone(&storage.progress),
        );
        let bonuses = BonusDetector::new(Arc::clone(&storage.progress), Arc::clone(&storage.content));
        let progress = Arc::new(ProgressService::new(
            clock,
            Arc::clone(&config),
            Arc::clone(&storage.progress),
            bonuses,
            achievements.clone(),
        ));
        let ranking = Arc::new(RankingJob::new(
            clock,
            Arc::clone(&config),
            Arc::clone(&storage.standings),
            Arc::clone(&storage.snapshots),
        ));
        let leaderboard = Arc::new(LeaderboardService::new(
            clock,
            Arc::clone(&config),
            Arc::clone(&storage.standings),
            Arc::clone(&storage.users),
            Arc::clone(&storage.snapshots),
        ));
        let registration = Arc::new(RegistrationService::new(
            clock,
            Arc::clone(&storage.users),
            Arc::clone(&storage.content),
        ));

        Self {
            config,
            progress,
            achievements: Arc::new(achievements),
            ranking,
            leaderboard,
            registration,
        }
    }

    #[must_use]
    pub fn config(&self) -> &RewardsConfig {
        &self.config
    }

    #[must_use]
    pub fn progress(&self) -> Arc<ProgressService> {
        Arc::clone(&self.progress)
    }

    #[must_use]
    pub fn achievements(&self) -> Arc<AchievementService> {
        Arc::clone(&self.achievements)
    }

    #[must_use]
    pub fn ranking(&self) -> Arc<RankingJob> {
        Arc::clone(&self.ranking)
    }

    #[must_use]
    pub fn leaderboard(&self) -> Arc<LeaderboardService> {
        Arc::clone(&self.leaderboard)
    }

    #[must_use]
    pub fn registration(&self) -> Arc<RegistrationService> {
        Arc::clone(&self.registration)
    }
}
