#![forbid(unsafe_code)]

pub mod achievement_service;
pub mod app_services;
pub mod bonus_detector;
pub mod config;
pub mod error;
pub mod leaderboard;
pub mod progress_service;
pub mod ranking_job;
pub mod registration;

pub use rewards_core::Clock;

pub use achievement_service::{AchievementService, AchievementUnlocks, UnlockedAchievement};
pub use app_services::AppServices;
pub use bonus_detector::{BonusAward, BonusDetector};
pub use config::{ConfigError, RewardsConfig};
pub use error::{
    AppServicesError, LeaderboardError, ProgressServiceError, RankingJobError, RegistrationError,
};
pub use leaderboard::{LeaderboardEntry, LeaderboardPage, LeaderboardService};
pub use progress_service::{CompletionRequest, ProgressOutcome, ProgressService, XpBreakdown};
pub use ranking_job::{RankingJob, SnapshotRun};
pub use registration::{NewContent, NewUser, RegistrationService};
