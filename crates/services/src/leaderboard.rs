use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use rewards_core::model::{RankChange, RankChangeType, UserId, display_name};
use storage::repository::{SnapshotRepository, StandingsRepository, UserRepository};

use crate::Clock;
use crate::config::RewardsConfig;
use crate::error::LeaderboardError;

/// One ranked learner as shown on the leaderboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub user_id: UserId,
    pub display_name: String,
    pub total_xp: u64,
    pub level: u32,
    pub streak: u32,
    pub previous_rank: Option<u32>,
    pub rank_change: i64,
    pub rank_change_type: RankChangeType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardPage {
    pub entries: Vec<LeaderboardEntry>,
    /// The requesting learner, when they are not on this page.
    pub requester: Option<LeaderboardEntry>,
    pub page: u32,
    pub page_size: u32,
    pub total_users: u64,
    pub total_pages: u64,
}

/// Live standings, ordered exactly like the daily snapshot.
#[derive(Clone)]
pub struct LeaderboardService {
    clock: Clock,
    config: Arc<RewardsConfig>,
    standings: Arc<dyn StandingsRepository>,
    users: Arc<dyn UserRepository>,
    snapshots: Arc<dyn SnapshotRepository>,
}

impl LeaderboardService {
    #[must_use]
    pub fn new(
        clock: Clock,
        config: Arc<RewardsConfig>,
        standings: Arc<dyn StandingsRepository>,
        users: Arc<dyn UserRepository>,
        snapshots: Arc<dyn SnapshotRepository>,
    ) -> Self {
        Self {
            clock,
            config,
            standings,
            users,
            snapshots,
        }
    }

    /// Override the clock (usually for deterministic testing).
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Returns one page of the live ranking.
    ///
    /// `page` is 1-based; `page_size` defaults to the configured size. Rank
    /// changes are relative to yesterday's snapshot. When `requester` is a
    /// learner who is not on the page, their own entry is resolved as one plus
    /// the number of learners ahead of them.
    ///
    /// # Errors
    ///
    /// Returns `LeaderboardError::InvalidPage` for a zero page or an out-of-range
    /// page size, and `LeaderboardError::Unavailable` if any read fails; no
    /// partial page is returned.
    pub async fn page(
        &self,
        requester: Option<&UserId>,
        page: u32,
        page_size: Option<u32>,
    ) -> Result<LeaderboardPage, LeaderboardError> {
        let page_size = page_size.unwrap_or(self.config.default_page_size);
        if page == 0 || page_size == 0 || page_size > self.config.max_page_size {
            return Err(LeaderboardError::InvalidPage {
                page,
                page_size,
                max_page_size: self.config.max_page_size,
            });
        }

        let total_users = self.standings.count_standings().await?;
        let offset = u64::from(page - 1) * u64::from(page_size);
        let rows = self.standings.standings_page(offset, page_size).await?;
        let previous = self.previous_ranks().await?;

        let mut entries = Vec::with_capacity(rows.len());
        for (rank, row) in (offset + 1..).zip(rows) {
            let rank = u32::try_from(rank).unwrap_or(u32::MAX);
            let change = RankChange::between(previous.get(&row.candidate.user_id).copied(), rank);
            entries.push(LeaderboardEntry {
                rank,
                display_name: display_name(&row.given_name, row.family_name.as_deref()),
                user_id: row.candidate.user_id,
                total_xp: row.candidate.total_xp,
                level: row.candidate.level,
                streak: row.candidate.streak,
                previous_rank: change.previous_rank,
                rank_change: change.delta,
                rank_change_type: change.kind,
            });
        }

        let requester = match requester {
            Some(id) if !entries.iter().any(|e| &e.user_id == id) => {
                self.requester_entry(id, &previous).await?
            }
            _ => None,
        };

        Ok(LeaderboardPage {
            entries,
            requester,
            page,
            page_size,
            total_users,
            total_pages: total_users.div_ceil(u64::from(page_size)),
        })
    }

    async fn requester_entry(
        &self,
        user_id: &UserId,
        previous: &HashMap<UserId, u32>,
    ) -> Result<Option<LeaderboardEntry>, LeaderboardError> {
        let Some(user) = self.users.get_user(user_id).await? else {
            return Ok(None);
        };
        if !user.role.is_ranked() {
            return Ok(None);
        }

        let ahead = self.standings.count_ahead(user.total_xp, &user.id).await?;
        let rank = u32::try_from(ahead.saturating_add(1)).unwrap_or(u32::MAX);
        let change = RankChange::between(previous.get(&user.id).copied(), rank);

        Ok(Some(LeaderboardEntry {
            rank,
            display_name: user.display_name(),
            user_id: user.id,
            total_xp: user.total_xp,
            level: user.level,
            streak: user.current_streak,
            previous_rank: change.previous_rank,
            rank_change: change.delta,
            rank_change_type: change.kind,
        }))
    }

    async fn previous_ranks(&self) -> Result<HashMap<UserId, u32>, LeaderboardError> {
        let today = self.clock.today(self.config.day_offset);
        let Some(yesterday) = today.pred_opt() else {
            return Ok(HashMap::new());
        };
        Ok(self
            .snapshots
            .get_snapshot(yesterday)
            .await?
            .map(|s| s.rank_lookup())
            .unwrap_or_default())
    }
}
