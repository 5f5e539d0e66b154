//! XP rules: how much a single completion is worth and why.
//!
//! Classification is driven by the record's [`RewardState`] and the local
//! calendar date only. Callers must evaluate and persist in one
//! compare-and-swap so a race on the same record cannot pay twice.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::model::{CompletionEvent, ContentType, Difficulty, RewardState};

/// Why an event did or did not earn XP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardClass {
    FirstTime,
    DailyRepeat,
    None,
}

impl RewardClass {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RewardClass::FirstTime => "first_time",
            RewardClass::DailyRepeat => "daily_repeat",
            RewardClass::None => "none",
        }
    }
}

/// XP decided for one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct XpAward {
    pub amount: u64,
    pub class: RewardClass,
}

impl XpAward {
    #[must_use]
    pub fn none() -> Self {
        Self {
            amount: 0,
            class: RewardClass::None,
        }
    }
}

/// Base XP for completing one item with a perfect score.
#[must_use]
pub fn base_xp(content_type: ContentType, difficulty: Difficulty) -> u64 {
    use Difficulty::{Advanced, Beginner, Expert, Intermediate};

    match (content_type, difficulty) {
        (ContentType::Question, Beginner) => 5,
        (ContentType::Question, Intermediate) => 10,
        (ContentType::Question, Advanced) => 15,
        (ContentType::Question, Expert) => 20,
        (ContentType::Flashcard, Beginner) => 2,
        (ContentType::Flashcard, Intermediate) => 4,
        (ContentType::Flashcard, Advanced) => 6,
        (ContentType::Flashcard, Expert) => 8,
        (ContentType::Media, Beginner) => 10,
        (ContentType::Media, Intermediate) => 15,
        (ContentType::Media, Advanced) => 20,
        (ContentType::Media, Expert) => 25,
        // Sections are only rewarded through their completion bonus.
        (ContentType::Section, _) => 0,
    }
}

/// Fraction of base XP earned for a score on the 0–100 scale.
#[must_use]
pub fn score_factor(score: f64) -> f64 {
    if score.is_finite() {
        score.clamp(0.0, 100.0) / 100.0
    } else {
        0.0
    }
}

/// Full first-time value: `base × factor`, rounded, never below 1 for a positive score.
#[must_use]
pub fn full_value(content_type: ContentType, difficulty: Difficulty, score: f64) -> u64 {
    let base = base_xp(content_type, difficulty);
    if base == 0 || score <= 0.0 {
        return 0;
    }

    // Base values are tiny, so the f64 round trip is exact.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    let scaled = (base as f64 * score_factor(score)).round() as u64;
    scaled.max(1)
}

/// Daily-repeat value: half of the full value, never below 1 when the full value is positive.
#[must_use]
pub fn daily_value(full: u64) -> u64 {
    if full == 0 { 0 } else { (full / 2).max(1) }
}

/// Decides the reward for `event` given the record's prior state.
///
/// `today` is the local calendar date of the event.
#[must_use]
pub fn evaluate(prior: Option<&RewardState>, event: &CompletionEvent, today: NaiveDate) -> XpAward {
    if !event.is_successful() {
        return XpAward::none();
    }

    let full = full_value(event.content_type(), event.data.difficulty(), event.score);
    let state = prior.copied().unwrap_or(RewardState::NeverCompleted);

    match state.last_rewarded_on() {
        None => XpAward {
            amount: full,
            class: RewardClass::FirstTime,
        },
        Some(day) if day != today => XpAward {
            amount: daily_value(full),
            class: RewardClass::DailyRepeat,
        },
        Some(_) => XpAward::none(),
    }
}
