use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::content::{CompletionData, ContentType};
use crate::model::ids::{ContentId, SectionId, SubjectId, TopicId, UserId};
use crate::xp::{RewardClass, XpAward};

//
// ─── ERRORS ───────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum ProgressError {
    #[error("score must be a finite number, got {0}")]
    InvalidScore(f64),

    #[error("persisted reward state is inconsistent: {0}")]
    InvalidPersistedState(String),
}

//
// ─── KEYS ─────────────────────────────────────────────────────────────────────
//

/// Identity of a progress record: one per (user, content, content type).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProgressKey {
    pub user_id: UserId,
    pub content_id: ContentId,
    pub content_type: ContentType,
}

impl ProgressKey {
    #[must_use]
    pub fn new(user_id: UserId, content_id: ContentId, content_type: ContentType) -> Self {
        Self {
            user_id,
            content_id,
            content_type,
        }
    }
}

/// Denormalized grouping keys copied onto each record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Grouping {
    pub topic_id: TopicId,
    pub subject_id: SubjectId,
    pub section_id: Option<SectionId>,
}

//
// ─── REWARD STATE ─────────────────────────────────────────────────────────────
//

/// Where a record stands in the reward lifecycle.
///
/// The first-completion timestamp is carried forward by every later state and
/// is never cleared. The first completion also counts as that day's reward, so
/// a repeat on the same local day earns nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RewardState {
    NeverCompleted,
    FirstCompleted {
        first_completed_at: DateTime<Utc>,
        first_completed_on: NaiveDate,
    },
    DailyRewarded {
        first_completed_at: DateTime<Utc>,
        first_completed_on: NaiveDate,
        last_daily_on: NaiveDate,
    },
}

impl RewardState {
    /// Rebuilds the state from the nullable columns it is stored as.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::InvalidPersistedState` when the columns disagree,
    /// e.g. a daily reward date without a first completion.
    pub fn from_persisted(
        first_completed_at: Option<DateTime<Utc>>,
        first_completed_on: Option<NaiveDate>,
        last_daily_on: Option<NaiveDate>,
    ) -> Result<Self, ProgressError> {
        match (first_completed_at, first_completed_on, last_daily_on) {
            (None, None, None) => Ok(Self::NeverCompleted),
            (Some(first_completed_at), Some(first_completed_on), None) => {
                Ok(Self::FirstCompleted {
                    first_completed_at,
                    first_completed_on,
                })
            }
            (Some(first_completed_at), Some(first_completed_on), Some(last_daily_on)) => {
                Ok(Self::DailyRewarded {
                    first_completed_at,
                    first_completed_on,
                    last_daily_on,
                })
            }
            (at, on, daily) => Err(ProgressError::InvalidPersistedState(format!(
                "first_completed_at={at:?} first_completed_on={on:?} last_daily_on={daily:?}"
            ))),
        }
    }

    #[must_use]
    pub fn first_completed_at(&self) -> Option<DateTime<Utc>> {
        match self {
            RewardState::NeverCompleted => None,
            RewardState::FirstCompleted {
                first_completed_at, ..
            }
            | RewardState::DailyRewarded {
                first_completed_at, ..
            } => Some(*first_completed_at),
        }
    }

    #[must_use]
    pub fn first_completed_on(&self) -> Option<NaiveDate> {
        match self {
            RewardState::NeverCompleted => None,
            RewardState::FirstCompleted {
                first_completed_on, ..
            }
            | RewardState::DailyRewarded {
                first_completed_on, ..
            } => Some(*first_completed_on),
        }
    }

    #[must_use]
    pub fn last_daily_on(&self) -> Option<NaiveDate> {
        match self {
            RewardState::DailyRewarded { last_daily_on, .. } => Some(*last_daily_on),
            _ => None,
        }
    }

    /// Most recent local date on which this record paid any reward.
    #[must_use]
    pub fn last_rewarded_on(&self) -> Option<NaiveDate> {
        self.last_daily_on().or_else(|| self.first_completed_on())
    }

    /// State after a reward of the given class was paid.
    #[must_use]
    pub fn after(self, class: RewardClass, now: DateTime<Utc>, today: NaiveDate) -> Self {
        match (class, self) {
            (RewardClass::FirstTime, RewardState::NeverCompleted) => Self::FirstCompleted {
                first_completed_at: now,
                first_completed_on: today,
            },
            (
                RewardClass::DailyRepeat,
                RewardState::FirstCompleted {
                    first_completed_at,
                    first_completed_on,
                }
                | RewardState::DailyRewarded {
                    first_completed_at,
                    first_completed_on,
                    ..
                },
            ) => Self::DailyRewarded {
                first_completed_at,
                first_completed_on,
                last_daily_on: today,
            },
            _ => self,
        }
    }
}

//
// ─── COMPLETION EVENT ─────────────────────────────────────────────────────────
//

/// A learner finished (or attempted) a content item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionEvent {
    pub completed: bool,
    pub score: f64,
    pub time_spent_secs: u32,
    pub data: CompletionData,
}

impl CompletionEvent {
    /// # Errors
    ///
    /// Returns `ProgressError::InvalidScore` for NaN or infinite scores.
    pub fn new(
        completed: bool,
        score: f64,
        time_spent_secs: u32,
        data: CompletionData,
    ) -> Result<Self, ProgressError> {
        if !score.is_finite() {
            return Err(ProgressError::InvalidScore(score));
        }
        Ok(Self {
            completed,
            score,
            time_spent_secs,
            data,
        })
    }

    #[must_use]
    pub fn content_type(&self) -> ContentType {
        self.data.content_type()
    }

    /// True when the event is eligible for any reward at all.
    #[must_use]
    pub fn is_successful(&self) -> bool {
        self.completed && self.score > 0.0
    }
}

//
// ─── PROGRESS RECORD ──────────────────────────────────────────────────────────
//

/// Completion state of one content item for one user.
///
/// `revision` is bumped on every write and used as the compare-and-swap token;
/// a record that was never stored has revision 0.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressRecord {
    pub key: ProgressKey,
    pub grouping: Grouping,
    pub completed: bool,
    pub score: f64,
    pub attempts: u32,
    pub reward: RewardState,
    pub daily_xp_count: u32,
    pub total_xp_earned: u64,
    pub time_spent_secs: u64,
    pub last_accessed: DateTime<Utc>,
    pub data: Option<CompletionData>,
    pub revision: u64,
}

impl ProgressRecord {
    /// A record that has not seen any event yet.
    #[must_use]
    pub fn fresh(key: ProgressKey, grouping: Grouping, now: DateTime<Utc>) -> Self {
        Self {
            key,
            grouping,
            completed: false,
            score: 0.0,
            attempts: 0,
            reward: RewardState::NeverCompleted,
            daily_xp_count: 0,
            total_xp_earned: 0,
            time_spent_secs: 0,
            last_accessed: now,
            data: None,
            revision: 0,
        }
    }

    /// Folds an event and the XP decided for it into the record.
    ///
    /// `completed` is sticky: a failed retry never un-completes an item.
    pub fn apply(
        &mut self,
        event: &CompletionEvent,
        award: &XpAward,
        now: DateTime<Utc>,
        today: NaiveDate,
    ) {
        self.attempts = self.attempts.saturating_add(1);
        self.completed = self.completed || event.completed;
        self.score = event.score;
        self.time_spent_secs = self
            .time_spent_secs
            .saturating_add(u64::from(event.time_spent_secs));
        self.last_accessed = now;
        self.data = Some(event.data.clone());

        self.reward = self.reward.after(award.class, now, today);
        if award.class == RewardClass::DailyRepeat {
            self.daily_xp_count = self.daily_xp_count.saturating_add(1);
        }
        self.total_xp_earned = self.total_xp_earned.saturating_add(award.amount);
    }
}
