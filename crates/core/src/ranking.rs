//! Standings order shared by the daily snapshot and the live leaderboard.
//!
//! Users are ordered by total XP descending, ties broken by user id ascending,
//! so every population has exactly one ranking.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{DailyRankSnapshot, RankChange, SnapshotEntry, UserId};

/// A rankable user as read from storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankCandidate {
    pub user_id: UserId,
    pub total_xp: u64,
    pub level: u32,
    pub streak: u32,
}

/// Total order on standings: higher XP first, then smaller user id.
#[must_use]
pub fn standings_order(a_xp: u64, a_id: &UserId, b_xp: u64, b_id: &UserId) -> Ordering {
    b_xp.cmp(&a_xp).then_with(|| a_id.cmp(b_id))
}

/// True when `(xp, id)` ranks strictly ahead of `(other_xp, other_id)`.
#[must_use]
pub fn is_ahead(xp: u64, id: &UserId, other_xp: u64, other_id: &UserId) -> bool {
    standings_order(xp, id, other_xp, other_id) == Ordering::Less
}

/// Sorts candidates into standings order and pairs each with its 1-based rank.
#[must_use]
pub fn rank(mut candidates: Vec<RankCandidate>) -> Vec<(u32, RankCandidate)> {
    candidates.sort_by(|a, b| standings_order(a.total_xp, &a.user_id, b.total_xp, &b.user_id));
    candidates
        .into_iter()
        .enumerate()
        .map(|(i, c)| (u32::try_from(i + 1).unwrap_or(u32::MAX), c))
        .collect()
}

/// Rank of one user computed without sorting the population:
/// one plus the number of users strictly ahead of them.
///
/// Agrees with [`rank`] for any population containing the user.
pub fn rank_of<'a>(
    total_xp: u64,
    user_id: &UserId,
    population: impl IntoIterator<Item = (u64, &'a UserId)>,
) -> u32 {
    let ahead = population
        .into_iter()
        .filter(|(xp, id)| is_ahead(*xp, id, total_xp, user_id))
        .count();
    u32::try_from(ahead).unwrap_or(u32::MAX - 1).saturating_add(1)
}

/// Builds the snapshot for `date`, annotating deltas from `previous` (normally
/// yesterday's snapshot).
#[must_use]
pub fn build_snapshot(
    date: NaiveDate,
    created_at: DateTime<Utc>,
    candidates: Vec<RankCandidate>,
    previous: Option<&DailyRankSnapshot>,
) -> DailyRankSnapshot {
    let previous_ranks: HashMap<UserId, u32> =
        previous.map(DailyRankSnapshot::rank_lookup).unwrap_or_default();

    let rankings = rank(candidates)
        .into_iter()
        .map(|(rank, c)| SnapshotEntry {
            change: RankChange::between(previous_ranks.get(&c.user_id).copied(), rank),
            user_id: c.user_id,
            rank,
            total_xp: c.total_xp,
            level: c.level,
            streak: c.streak,
        })
        .collect();

    DailyRankSnapshot {
        date,
        created_at,
        rankings,
    }
}
