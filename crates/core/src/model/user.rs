use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::leveling::level_for_xp;
use crate::model::ids::UserId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum UserError {
    #[error("given name must not be empty")]
    EmptyName,
    #[error("unknown role: {0}")]
    UnknownRole(String),
}

/// Account role. Only learners take part in ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Learner,
    Instructor,
    Admin,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Learner => "learner",
            Role::Instructor => "instructor",
            Role::Admin => "admin",
        }
    }

    #[must_use]
    pub fn is_ranked(self) -> bool {
        matches!(self, Role::Learner)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = UserError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "learner" => Ok(Self::Learner),
            "instructor" => Ok(Self::Instructor),
            "admin" => Ok(Self::Admin),
            other => Err(UserError::UnknownRole(other.to_owned())),
        }
    }
}

/// One day's standing, kept on the user for the profile chart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankHistoryEntry {
    pub date: NaiveDate,
    pub rank: u32,
    pub total_xp: u64,
}

/// Appends `entry` to a date-ordered history, keeping only the newest `limit`.
///
/// An entry for a date already present replaces it, so replaying a day never
/// duplicates history.
pub fn push_rank_history(history: &mut Vec<RankHistoryEntry>, entry: RankHistoryEntry, limit: usize) {
    history.retain(|e| e.date != entry.date);
    history.push(entry);
    history.sort_by_key(|e| e.date);
    if history.len() > limit {
        let excess = history.len() - limit;
        history.drain(..excess);
    }
}

/// Streak length after activity on `today`.
///
/// Same day keeps the streak, the following day extends it, any gap restarts at 1.
#[must_use]
pub fn next_streak(last_active_on: Option<NaiveDate>, current: u32, today: NaiveDate) -> u32 {
    match last_active_on {
        Some(last) if last == today => current.max(1),
        Some(last) if last.succ_opt() == Some(today) => current.saturating_add(1),
        _ => 1,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub given_name: String,
    pub family_name: Option<String>,
    pub role: Role,
    pub total_xp: u64,
    pub level: u32,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub last_active_on: Option<NaiveDate>,
    pub rank_history: Vec<RankHistoryEntry>,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// A brand-new account with no XP.
    ///
    /// # Errors
    ///
    /// Returns `UserError::EmptyName` if the given name is blank.
    pub fn new(
        id: UserId,
        given_name: impl Into<String>,
        family_name: Option<String>,
        role: Role,
        created_at: DateTime<Utc>,
    ) -> Result<Self, UserError> {
        let given_name = given_name.into().trim().to_owned();
        if given_name.is_empty() {
            return Err(UserError::EmptyName);
        }
        let family_name = family_name
            .map(|f| f.trim().to_owned())
            .filter(|f| !f.is_empty());

        Ok(Self {
            id,
            given_name,
            family_name,
            role,
            total_xp: 0,
            level: level_for_xp(0),
            current_streak: 0,
            longest_streak: 0,
            last_active_on: None,
            rank_history: Vec::new(),
            created_at,
        })
    }

    /// Public name with the family name cut to an initial, e.g. `Ada L.`.
    #[must_use]
    pub fn display_name(&self) -> String {
        display_name(&self.given_name, self.family_name.as_deref())
    }
}

#[must_use]
pub fn display_name(given_name: &str, family_name: Option<&str>) -> String {
    match family_name.and_then(|f| f.trim().chars().next()) {
        Some(initial) => format!("{} {}.", given_name.trim(), initial.to_uppercase()),
        None => given_name.trim().to_owned(),
    }
}
