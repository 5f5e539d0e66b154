use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use rewards_core::bonus::{BonusScope, bonus_xp, is_group_complete};
use rewards_core::model::{Difficulty, ProgressRecord};
use storage::repository::{ContentCatalog, CreditReceipt, ProgressRepository, StorageError};

/// A group bonus paid by this call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BonusAward {
    pub scope: BonusScope,
    pub xp: u64,
    #[serde(skip)]
    pub credit: CreditReceipt,
}

/// Pays group-completion bonuses exactly once per user and group.
#[derive(Clone)]
pub struct BonusDetector {
    progress: Arc<dyn ProgressRepository>,
    content: Arc<dyn ContentCatalog>,
}

impl BonusDetector {
    #[must_use]
    pub fn new(progress: Arc<dyn ProgressRepository>, content: Arc<dyn ContentCatalog>) -> Self {
        Self { progress, content }
    }

    /// Checks the group of a first-completed `record` and claims its bonus when
    /// every member is first-completed.
    ///
    /// Runs on every successful completion of a first-completed item, so a
    /// bonus missed by an earlier failed check is settled by the next one.
    /// Returns `None` when the item belongs to no group, the group is not yet
    /// complete, or the bonus was already paid (possibly by a concurrent call).
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the catalog, progress, or claim access fails.
    pub async fn detect(
        &self,
        record: &ProgressRecord,
        difficulty: Difficulty,
        now: DateTime<Utc>,
    ) -> Result<Option<BonusAward>, StorageError> {
        let Some(scope) = BonusScope::for_item(record.key.content_type, &record.grouping) else {
            return Ok(None);
        };
        let user_id = &record.key.user_id;
        if self.progress.bonus_claimed(user_id, &scope).await? {
            return Ok(None);
        }

        let members = self.content.group_members(&scope).await?;
        let completed = self.progress.completed_in_scope(user_id, &scope).await?;
        if !is_group_complete(&members, &completed) {
            debug!(
                group = %scope,
                members = members.len(),
                completed = completed.len(),
                "group not complete"
            );
            return Ok(None);
        }

        let xp = bonus_xp(&scope, difficulty);
        match self.progress.claim_bonus(user_id, &scope, xp, now).await? {
            Some(credit) => {
                info!(user = %user_id, group = %scope, xp, "completion bonus paid");
                Ok(Some(BonusAward { scope, xp, credit }))
            }
            None => {
                debug!(user = %user_id, group = %scope, "completion bonus already paid");
                Ok(None)
            }
        }
    }
}
