use std::sync::Arc;

use chrono::{Days, NaiveDate};
use serde::Serialize;
use tracing::{info, warn};

use rewards_core::ranking::build_snapshot;
use storage::repository::{SnapshotRepository, StandingsRepository};

use crate::Clock;
use crate::config::RewardsConfig;
use crate::error::RankingJobError;

/// What a trigger of the daily snapshot job did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SnapshotRun {
    /// A snapshot for the date already existed; nothing was written.
    AlreadyTaken { date: NaiveDate },
    Created {
        date: NaiveDate,
        ranked_users: u32,
        history_entries: u32,
        pruned_snapshots: u32,
    },
}

/// Once-a-day ranking of every learner, externally triggered.
#[derive(Clone)]
pub struct RankingJob {
    clock: Clock,
    config: Arc<RewardsConfig>,
    standings: Arc<dyn StandingsRepository>,
    snapshots: Arc<dyn SnapshotRepository>,
}

impl RankingJob {
    #[must_use]
    pub fn new(
        clock: Clock,
        config: Arc<RewardsConfig>,
        standings: Arc<dyn StandingsRepository>,
        snapshots: Arc<dyn SnapshotRepository>,
    ) -> Self {
        Self {
            clock,
            config,
            standings,
            snapshots,
        }
    }

    /// Override the clock (usually for deterministic testing).
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Takes today's snapshot unless one exists.
    ///
    /// Safe to re-trigger: a second run for the same day is a no-op, and a
    /// failed run leaves nothing behind, so the next trigger recomputes.
    ///
    /// # Errors
    ///
    /// Returns `RankingJobError::Unauthorized` when a secret is configured and
    /// `secret` does not match, or `RankingJobError::Storage` on backend failures.
    pub async fn run(&self, secret: Option<&str>) -> Result<SnapshotRun, RankingJobError> {
        if let Some(expected) = self.config.ranking_secret.as_deref() {
            if secret != Some(expected) {
                warn!("ranking trigger rejected");
                return Err(RankingJobError::Unauthorized);
            }
        }

        let now = self.clock.now();
        let today = self.clock.today(self.config.day_offset);

        if self.snapshots.snapshot_exists(today).await? {
            info!(%today, "snapshot already taken");
            return Ok(SnapshotRun::AlreadyTaken { date: today });
        }

        info!(%today, "ranking snapshot started");
        let candidates = self.standings.all_standings().await?;
        let previous = match today.pred_opt() {
            Some(yesterday) => self.snapshots.get_snapshot(yesterday).await?,
            None => None,
        };
        let snapshot = build_snapshot(today, now, candidates, previous.as_ref());
        let ranked_users = u32::try_from(snapshot.rankings.len()).unwrap_or(u32::MAX);

        // Keeps exactly `retention` days, today included.
        let retention = self.config.snapshot_retention_days.max(1);
        let prune_through = today
            .checked_sub_days(Days::new(u64::from(retention)))
            .unwrap_or(NaiveDate::MIN);
        let commit = self
            .snapshots
            .commit_snapshot(&snapshot, self.config.rank_history_limit, prune_through)
            .await?;

        if !commit.inserted {
            // Another trigger committed first.
            info!(%today, "snapshot already taken");
            return Ok(SnapshotRun::AlreadyTaken { date: today });
        }

        info!(
            %today,
            ranked_users,
            history_entries = commit.history_entries,
            pruned = commit.pruned_snapshots,
            "ranking snapshot finished"
        );
        Ok(SnapshotRun::Created {
            date: today,
            ranked_users,
            history_entries: commit.history_entries,
            pruned_snapshots: commit.pruned_snapshots,
        })
    }
}
