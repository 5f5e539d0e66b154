//! Progress update orchestration: one completion event in, one reward summary out.
//!
//! The record write and its XP credit form a single compare-and-swap against
//! the stored revision. Bonus claims and achievement unlocks are separate
//! create-if-absent writes, so a loser in any race simply credits nothing.
//! Once the record is committed the call succeeds; a failed settlement is
//! reported as pending and picked up by the next successful completion.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use rewards_core::bonus::BonusScope;
use rewards_core::leveling::{LevelChange, xp_to_next_level};
use rewards_core::model::{
    CompletionData, CompletionEvent, ContentId, ContentType, Grouping, ProgressKey,
    ProgressRecord, SectionId, SubjectId, TopicId, UserId,
};
use rewards_core::xp::{self, RewardClass, XpAward};
use storage::repository::{CompletionCommit, ProgressRepository, StorageError};

use crate::Clock;
use crate::achievement_service::{AchievementService, UnlockedAchievement};
use crate::bonus_detector::BonusDetector;
use crate::config::RewardsConfig;
use crate::error::ProgressServiceError;

//
// ─── REQUEST ───────────────────────────────────────────────────────────────────
//

/// A completion event as received from a caller, identifiers not yet validated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub user_id: String,
    pub content_id: String,
    pub topic_id: String,
    pub subject_id: String,
    #[serde(default)]
    pub section_id: Option<String>,
    pub completed: bool,
    pub score: f64,
    #[serde(default)]
    pub time_spent_secs: u32,
    pub data: CompletionData,
}

/// Validated form of a `CompletionRequest`.
struct ValidCompletion {
    key: ProgressKey,
    grouping: Grouping,
    event: CompletionEvent,
}

impl CompletionRequest {
    fn validate(&self) -> Result<ValidCompletion, ProgressServiceError> {
        let user_id = UserId::new(self.user_id.as_str())?;
        let content_id = ContentId::new(self.content_id.as_str())?;
        let grouping = Grouping {
            topic_id: TopicId::new(self.topic_id.as_str())?,
            subject_id: SubjectId::new(self.subject_id.as_str())?,
            section_id: self
                .section_id
                .as_deref()
                .map(SectionId::new)
                .transpose()?,
        };
        let event = CompletionEvent::new(
            self.completed,
            self.score,
            self.time_spent_secs,
            self.data.clone(),
        )?;

        Ok(ValidCompletion {
            key: ProgressKey::new(user_id, content_id, event.content_type()),
            grouping,
            event,
        })
    }
}

//
// ─── OUTCOME ───────────────────────────────────────────────────────────────────
//

/// XP credited by one call, by source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct XpBreakdown {
    pub base: u64,
    pub bonus: u64,
    pub achievements: u64,
}

impl XpBreakdown {
    #[must_use]
    pub fn total(&self) -> u64 {
        self.base + self.bonus + self.achievements
    }
}

/// Summary returned to the caller of `record_completion`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressOutcome {
    pub user_id: UserId,
    pub content_id: ContentId,
    pub content_type: ContentType,
    pub classification: RewardClass,
    pub xp: XpBreakdown,
    pub total_xp: u64,
    pub level: u32,
    pub xp_to_next_level: u64,
    pub leveled_up: bool,
    pub current_streak: u32,
    pub bonus: Option<BonusScope>,
    pub achievements: Vec<UnlockedAchievement>,
    /// A bonus or achievement check failed after the record was committed.
    pub rewards_pending: bool,
    pub attempts: u32,
    pub message: String,
}

fn status_message(
    event: &CompletionEvent,
    classification: RewardClass,
    xp: &XpBreakdown,
    level: &LevelChange,
    achievements: &[UnlockedAchievement],
    rewards_pending: bool,
) -> String {
    let mut message = match classification {
        RewardClass::FirstTime => {
            format!("Earned {} XP for completing this for the first time.", xp.total())
        }
        RewardClass::DailyRepeat => format!("Earned {} XP for today's review.", xp.total()),
        RewardClass::None if event.is_successful() => {
            "Progress saved. You already earned XP for this item today.".to_owned()
        }
        RewardClass::None => {
            "Progress saved. Complete it with a positive score to earn XP.".to_owned()
        }
    };

    if xp.bonus > 0 {
        message.push_str(&format!(" Group completed: +{} bonus XP.", xp.bonus));
    }
    if !achievements.is_empty() {
        let titles: Vec<&str> = achievements.iter().map(|a| a.title).collect();
        message.push_str(&format!(" Unlocked: {}.", titles.join(", ")));
    }
    if level.leveled_up() {
        message.push_str(&format!(" Level up! You reached level {}.", level.current));
    }
    if rewards_pending {
        message.push_str(" Some rewards are still being settled and will follow.");
    }
    message
}

//
// ─── SERVICE ───────────────────────────────────────────────────────────────────
//

/// Entry point for completion events.
#[derive(Clone)]
pub struct ProgressService {
    clock: Clock,
    config: Arc<RewardsConfig>,
    progress: Arc<dyn ProgressRepository>,
    bonuses: BonusDetector,
    achievements: AchievementService,
}

impl ProgressService {
    #[must_use]
    pub fn new(
        clock: Clock,
        config: Arc<RewardsConfig>,
        progress: Arc<dyn ProgressRepository>,
        bonuses: BonusDetector,
        achievements: AchievementService,
    ) -> Self {
        Self {
            clock,
            config,
            progress,
            bonuses,
            achievements,
        }
    }

    /// Override the clock (usually for deterministic testing).
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Records one completion event and pays whatever it earns.
    ///
    /// - Validates every identifier and the score before touching storage.
    /// - Classifies and writes the record in one compare-and-swap, retrying the
    ///   read-classify-write on conflict; committed credits are never retried.
    /// - On a successful completion of a first-completed item, claims the group
    ///   bonus if the group is complete and still unpaid.
    /// - Unlocks any achievements the new totals qualify for.
    ///
    /// Failures in the last two steps do not fail the call: the committed
    /// outcome comes back with `rewards_pending` set.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError::Validation` for malformed input (nothing written),
    /// `UnknownUser` if the user does not exist, `Contention` if every attempt lost
    /// its compare-and-swap, or `Storage` if the record write itself failed.
    pub async fn record_completion(
        &self,
        request: &CompletionRequest,
    ) -> Result<ProgressOutcome, ProgressServiceError> {
        let ValidCompletion {
            key,
            grouping,
            event,
        } = request.validate()?;
        let now = self.clock.now();
        let today = self.clock.today(self.config.day_offset);

        let (commit, award) = self.commit_event(key, grouping, &event, now, today).await?;
        let mut xp = XpBreakdown {
            base: award.amount,
            ..XpBreakdown::default()
        };
        let mut latest = commit.credit;

        let user_id = &commit.record.key.user_id;
        let mut rewards_pending = false;

        let mut bonus = None;
        if event.is_successful() && commit.record.reward.first_completed_at().is_some() {
            match self
                .bonuses
                .detect(&commit.record, event.data.difficulty(), now)
                .await
            {
                Ok(Some(paid)) => {
                    xp.bonus = paid.xp;
                    latest = paid.credit;
                    bonus = Some(paid.scope);
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(user = %user_id, error = %err, "bonus check failed; left pending");
                    rewards_pending = true;
                }
            }
        }

        let unlocked = match self.achievements.unlock_earned(user_id, now).await {
            Ok(unlocks) => {
                xp.achievements = unlocks.xp();
                if let Some(credit) = unlocks.last_credit {
                    latest = credit;
                }
                unlocks.unlocked
            }
            Err(err) => {
                warn!(user = %user_id, error = %err, "achievement check failed; left pending");
                rewards_pending = true;
                Vec::new()
            }
        };

        let level = LevelChange::between(commit.credit.previous_total, latest.new_total);
        if level.leveled_up() {
            info!(
                user = %user_id,
                from = level.previous,
                to = level.current,
                gained = level.levels_gained(),
                "level up"
            );
        }

        let message = status_message(
            &event,
            award.class,
            &xp,
            &level,
            &unlocked,
            rewards_pending,
        );
        Ok(ProgressOutcome {
            user_id: user_id.clone(),
            content_id: commit.record.key.content_id.clone(),
            content_type: commit.record.key.content_type,
            classification: award.class,
            xp,
            total_xp: latest.new_total,
            level: level.current,
            xp_to_next_level: xp_to_next_level(latest.new_total),
            leveled_up: level.leveled_up(),
            current_streak: latest.current_streak,
            bonus,
            achievements: unlocked,
            rewards_pending,
            attempts: commit.record.attempts,
            message,
        })
    }

    /// Read-classify-write loop on one record.
    async fn commit_event(
        &self,
        key: ProgressKey,
        grouping: Grouping,
        event: &CompletionEvent,
        now: DateTime<Utc>,
        today: NaiveDate,
    ) -> Result<(CompletionCommit, XpAward), ProgressServiceError> {
        let attempts = self.config.max_commit_attempts.max(1);
        let activity_on = event.is_successful().then_some(today);

        for attempt in 1..=attempts {
            let stored = self.progress.get_progress(&key).await?;

            // Grouping is fixed by the first event for a record.
            let mut record = stored
                .unwrap_or_else(|| ProgressRecord::fresh(key.clone(), grouping.clone(), now));
            let expected_revision = record.revision;

            let award = xp::evaluate(Some(&record.reward), event, today);
            record.apply(event, &award, now, today);

            match self
                .progress
                .commit_completion(&record, expected_revision, award.amount, activity_on)
                .await
            {
                Ok(commit) => {
                    debug!(
                        user = %key.user_id,
                        content = %key.content_id,
                        class = award.class.as_str(),
                        xp = award.amount,
                        revision = commit.record.revision,
                        "completion recorded"
                    );
                    return Ok((commit, award));
                }
                Err(StorageError::Conflict) => {
                    debug!(
                        user = %key.user_id,
                        content = %key.content_id,
                        attempt,
                        "progress record changed concurrently; re-evaluating"
                    );
                }
                Err(StorageError::NotFound) => {
                    return Err(ProgressServiceError::UnknownUser(key.user_id));
                }
                Err(err) => return Err(err.into()),
            }
        }

        warn!(
            user = %key.user_id,
            content = %key.content_id,
            attempts,
            "giving up on contended progress record"
        );
        Err(ProgressServiceError::Contention { attempts })
    }
}
