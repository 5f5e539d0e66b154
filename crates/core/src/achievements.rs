//! Static achievement catalog and unlock predicates.

use std::collections::HashSet;

use serde::Serialize;

use crate::leveling::level_for_xp;
use crate::model::{ContentType, ProgressRecord, User};

/// Cumulative statistics achievements are evaluated against.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UserStats {
    pub total_xp: u64,
    pub level: u32,
    pub current_streak: u32,
    pub questions_completed: u32,
    pub flashcards_completed: u32,
    pub media_completed: u32,
    /// Mean score over completed items, `None` when nothing is completed.
    pub average_score: Option<f64>,
    pub bonuses_claimed: u32,
}

impl UserStats {
    /// Aggregates a user's account totals, progress records and bonus claims.
    ///
    /// Only first-completed items count as completions.
    #[must_use]
    pub fn from_records(user: &User, records: &[ProgressRecord], bonuses_claimed: u32) -> Self {
        let mut stats = Self {
            total_xp: user.total_xp,
            level: user.level,
            current_streak: user.current_streak,
            bonuses_claimed,
            ..Self::default()
        };
        let mut score_sum = 0.0;
        let mut scored = 0_u32;

        for record in records {
            if record.reward.first_completed_at().is_none() {
                continue;
            }
            match record.key.content_type {
                ContentType::Question => stats.questions_completed += 1,
                ContentType::Flashcard => stats.flashcards_completed += 1,
                ContentType::Media => stats.media_completed += 1,
                ContentType::Section => continue,
            }
            score_sum += record.score.clamp(0.0, 100.0);
            scored += 1;
        }

        if scored > 0 {
            stats.average_score = Some(score_sum / f64::from(scored));
        }
        stats
    }

    #[must_use]
    pub fn total_completions(&self) -> u32 {
        self.questions_completed
            .saturating_add(self.flashcards_completed)
            .saturating_add(self.media_completed)
    }

    #[must_use]
    pub fn completions_of(&self, content_type: ContentType) -> u32 {
        match content_type {
            ContentType::Question => self.questions_completed,
            ContentType::Flashcard => self.flashcards_completed,
            ContentType::Media => self.media_completed,
            ContentType::Section => self.bonuses_claimed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Condition {
    TotalCompletions(u32),
    Completions { content_type: ContentType, count: u32 },
    Streak(u32),
    AverageScore { min: f64, min_completions: u32 },
    BonusesClaimed(u32),
    Level(u32),
}

impl Condition {
    #[must_use]
    pub fn is_met(&self, stats: &UserStats) -> bool {
        match *self {
            Condition::TotalCompletions(n) => stats.total_completions() >= n,
            Condition::Completions {
                content_type,
                count,
            } => stats.completions_of(content_type) >= count,
            Condition::Streak(days) => stats.current_streak >= days,
            Condition::AverageScore {
                min,
                min_completions,
            } => {
                stats.total_completions() >= min_completions
                    && stats.average_score.is_some_and(|avg| avg >= min)
            }
            Condition::BonusesClaimed(n) => stats.bonuses_claimed >= n,
            Condition::Level(level) => stats.level >= level,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Achievement {
    pub id: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub xp_reward: u64,
    pub condition: Condition,
}

pub static CATALOG: &[Achievement] = &[
    Achievement {
        id: "first-steps",
        title: "First Steps",
        description: "Complete your first piece of content",
        xp_reward: 10,
        condition: Condition::TotalCompletions(1),
    },
    Achievement {
        id: "quiz-apprentice",
        title: "Quiz Apprentice",
        description: "Complete 10 questions",
        xp_reward: 25,
        condition: Condition::Completions {
            content_type: ContentType::Question,
            count: 10,
        },
    },
    Achievement {
        id: "quiz-master",
        title: "Quiz Master",
        description: "Complete 50 questions",
        xp_reward: 100,
        condition: Condition::Completions {
            content_type: ContentType::Question,
            count: 50,
        },
    },
    Achievement {
        id: "card-collector",
        title: "Card Collector",
        description: "Complete 25 flashcards",
        xp_reward: 25,
        condition: Condition::Completions {
            content_type: ContentType::Flashcard,
            count: 25,
        },
    },
    Achievement {
        id: "media-buff",
        title: "Media Buff",
        description: "Finish 10 media items",
        xp_reward: 25,
        condition: Condition::Completions {
            content_type: ContentType::Media,
            count: 10,
        },
    },
    Achievement {
        id: "on-a-roll",
        title: "On a Roll",
        description: "Learn three days in a row",
        xp_reward: 20,
        condition: Condition::Streak(3),
    },
    Achievement {
        id: "unstoppable",
        title: "Unstoppable",
        description: "Learn seven days in a row",
        xp_reward: 50,
        condition: Condition::Streak(7),
    },
    Achievement {
        id: "sharpshooter",
        title: "Sharpshooter",
        description: "Average at least 90 over 10 or more completions",
        xp_reward: 50,
        condition: Condition::AverageScore {
            min: 90.0,
            min_completions: 10,
        },
    },
    Achievement {
        id: "completionist",
        title: "Completionist",
        description: "Finish every item in a section or topic",
        xp_reward: 30,
        condition: Condition::BonusesClaimed(1),
    },
    Achievement {
        id: "rising-star",
        title: "Rising Star",
        description: "Reach level 5",
        xp_reward: 50,
        condition: Condition::Level(5),
    },
];

/// Catalog entries whose condition holds and which are not yet unlocked.
#[must_use]
pub fn newly_met(stats: &UserStats, unlocked: &HashSet<String>) -> Vec<&'static Achievement> {
    CATALOG
        .iter()
        .filter(|a| !unlocked.contains(a.id) && a.condition.is_met(stats))
        .collect()
}

/// Every achievement a credit would unlock, including those only reachable
/// through the XP of earlier unlocks (e.g. an achievement pushing the user to
/// level 5). Returned in unlock order.
#[must_use]
pub fn cascade(stats: &UserStats, unlocked: &HashSet<String>) -> Vec<&'static Achievement> {
    let mut stats = stats.clone();
    let mut unlocked = unlocked.clone();
    let mut out = Vec::new();

    loop {
        let batch = newly_met(&stats, &unlocked);
        if batch.is_empty() {
            break;
        }
        for achievement in batch {
            stats.total_xp = stats.total_xp.saturating_add(achievement.xp_reward);
            stats.level = level_for_xp(stats.total_xp);
            unlocked.insert(achievement.id.to_owned());
            out.push(achievement);
        }
    }

    out
}
