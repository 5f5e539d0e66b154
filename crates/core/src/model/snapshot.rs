use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::model::ids::UserId;

/// Direction of a rank delta relative to the previous snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankChangeType {
    Up,
    Down,
    None,
    New,
}

impl RankChangeType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RankChangeType::Up => "up",
            RankChangeType::Down => "down",
            RankChangeType::None => "none",
            RankChangeType::New => "new",
        }
    }
}

impl fmt::Display for RankChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RankChangeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(Self::Up),
            "down" => Ok(Self::Down),
            "none" => Ok(Self::None),
            "new" => Ok(Self::New),
            other => Err(format!("invalid rank change type: {other}")),
        }
    }
}

/// Rank delta: `previous - current`, positive when the user climbed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankChange {
    pub previous_rank: Option<u32>,
    pub delta: i64,
    pub kind: RankChangeType,
}

impl RankChange {
    #[must_use]
    pub fn between(previous_rank: Option<u32>, current_rank: u32) -> Self {
        match previous_rank {
            None => Self {
                previous_rank,
                delta: 0,
                kind: RankChangeType::New,
            },
            Some(prev) => {
                let delta = i64::from(prev) - i64::from(current_rank);
                let kind = match delta {
                    d if d > 0 => RankChangeType::Up,
                    d if d < 0 => RankChangeType::Down,
                    _ => RankChangeType::None,
                };
                Self {
                    previous_rank,
                    delta,
                    kind,
                }
            }
        }
    }
}

/// One user's row in a daily snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub user_id: UserId,
    pub rank: u32,
    pub total_xp: u64,
    pub level: u32,
    pub streak: u32,
    pub change: RankChange,
}

/// Global standings frozen once per calendar day. Never modified after insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyRankSnapshot {
    pub date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub rankings: Vec<SnapshotEntry>,
}

impl DailyRankSnapshot {
    /// `user -> rank` lookup used to annotate the next day's deltas.
    #[must_use]
    pub fn rank_lookup(&self) -> HashMap<UserId, u32> {
        self.rankings
            .iter()
            .map(|e| (e.user_id.clone(), e.rank))
            .collect()
    }
}
