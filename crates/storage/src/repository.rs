use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rewards_core::bonus::BonusScope;
use rewards_core::leveling::LevelChange;
use rewards_core::model::{
    ContentId, ContentItem, DailyRankSnapshot, ProgressKey, ProgressRecord, User, UserId,
};
use rewards_core::ranking::RankCandidate;
use thiserror::Error;

pub use crate::memory::InMemoryRepository;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    /// A compare-and-swap write lost against a concurrent writer.
    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

//
// ─── WRITE RESULTS ─────────────────────────────────────────────────────────────
//

/// Effect of crediting XP to a user inside a storage transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreditReceipt {
    pub previous_total: u64,
    pub new_total: u64,
    pub level: LevelChange,
    pub current_streak: u32,
}

impl CreditReceipt {
    #[must_use]
    pub fn credited(&self) -> u64 {
        self.new_total - self.previous_total
    }
}

/// A progress write plus the matching user credit, committed together.
#[derive(Debug, Clone)]
pub struct CompletionCommit {
    /// Stored record, carrying its new revision.
    pub record: ProgressRecord,
    pub credit: CreditReceipt,
}

/// Outcome of writing a daily snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SnapshotCommit {
    /// False when a snapshot for the date already existed; nothing was written.
    pub inserted: bool,
    pub history_entries: u32,
    pub pruned_snapshots: u32,
}

/// One row of the live standings, with the name fields needed for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandingRow {
    pub candidate: RankCandidate,
    pub given_name: String,
    pub family_name: Option<String>,
}

//
// ─── CONTRACTS ─────────────────────────────────────────────────────────────────
//

#[async_trait]
pub trait ProgressRepository: Send + Sync {
    /// Fetch a single record.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn get_progress(&self, key: &ProgressKey) -> Result<Option<ProgressRecord>, StorageError>;

    /// Write `record` if the stored revision still equals `expected_revision`
    /// (0 = must not exist yet) and credit `xp` to the record's user, all or nothing.
    ///
    /// `activity_on` updates the user's streak when present.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the revision moved, `StorageError::NotFound`
    /// if the user does not exist, or other storage errors.
    async fn commit_completion(
        &self,
        record: &ProgressRecord,
        expected_revision: u64,
        xp: u64,
        activity_on: Option<NaiveDate>,
    ) -> Result<CompletionCommit, StorageError>;

    /// Record the user's claim on the group bonus if absent and credit `xp`.
    ///
    /// Claims live in their own keyspace, keyed by `(user, kind, group id, member
    /// type)`. Returns `None` when the claim already existed; nothing is credited then.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the user does not exist, or other storage errors.
    async fn claim_bonus(
        &self,
        user_id: &UserId,
        scope: &BonusScope,
        xp: u64,
        claimed_at: DateTime<Utc>,
    ) -> Result<Option<CreditReceipt>, StorageError>;

    /// Whether the user already holds a claim on the group bonus.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn bonus_claimed(&self, user_id: &UserId, scope: &BonusScope)
    -> Result<bool, StorageError>;

    /// Number of group bonuses the user has claimed.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn count_bonus_claims(&self, user_id: &UserId) -> Result<u32, StorageError>;

    /// Ids of the user's first-completed items of the scope's member type inside
    /// the scope.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn completed_in_scope(
        &self,
        user_id: &UserId,
        scope: &BonusScope,
    ) -> Result<HashSet<ContentId>, StorageError>;

    /// All records of a user.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn progress_for_user(&self, user_id: &UserId)
    -> Result<Vec<ProgressRecord>, StorageError>;
}

#[async_trait]
pub trait ContentCatalog: Send + Sync {
    /// Insert or replace a catalog entry.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the entry cannot be stored.
    async fn upsert_content(&self, item: &ContentItem) -> Result<(), StorageError>;

    /// Ids of every item that belongs to the group. Unknown groups are empty.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn group_members(&self, scope: &BonusScope) -> Result<HashSet<ContentId>, StorageError>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert a new user.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the id is taken.
    async fn insert_user(&self, user: &User) -> Result<(), StorageError>;

    /// Fetch a user with their rank history.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn get_user(&self, id: &UserId) -> Result<Option<User>, StorageError>;

    /// Delete a user and everything that belongs to them.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the user does not exist.
    async fn delete_user(&self, id: &UserId) -> Result<(), StorageError>;

    /// Ids of achievements the user has unlocked.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn unlocked_achievements(&self, id: &UserId) -> Result<HashSet<String>, StorageError>;

    /// Record the unlock if absent and credit its XP.
    ///
    /// Returns `None` when the achievement was already unlocked.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the user does not exist, or other storage errors.
    async fn unlock_achievement(
        &self,
        id: &UserId,
        achievement_id: &str,
        xp: u64,
        unlocked_at: DateTime<Utc>,
    ) -> Result<Option<CreditReceipt>, StorageError>;
}

/// Read side of the learner standings.
#[async_trait]
pub trait StandingsRepository: Send + Sync {
    /// Every learner, unordered.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn all_standings(&self) -> Result<Vec<RankCandidate>, StorageError>;

    /// Number of learners.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn count_standings(&self) -> Result<u64, StorageError>;

    /// Learners in standings order (XP desc, id asc), skipping `offset`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn standings_page(&self, offset: u64, limit: u32)
    -> Result<Vec<StandingRow>, StorageError>;

    /// Number of learners strictly ahead of `(total_xp, user_id)` in standings order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn count_ahead(&self, total_xp: u64, user_id: &UserId) -> Result<u64, StorageError>;
}

#[async_trait]
pub trait SnapshotRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn snapshot_exists(&self, date: NaiveDate) -> Result<bool, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn get_snapshot(&self, date: NaiveDate)
    -> Result<Option<DailyRankSnapshot>, StorageError>;

    /// Store a snapshot, append rank history, and prune old snapshots in one transaction.
    ///
    /// Snapshots dated on or before `prune_through` are deleted. Users that no
    /// longer exist get no history entry. If a snapshot for the date exists,
    /// nothing changes and `inserted` is false.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures; nothing is committed then.
    async fn commit_snapshot(
        &self,
        snapshot: &DailyRankSnapshot,
        history_limit: u32,
        prune_through: NaiveDate,
    ) -> Result<SnapshotCommit, StorageError>;
}

/// Aggregates repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub progress: Arc<dyn ProgressRepository>,
    pub content: Arc<dyn ContentCatalog>,
    pub users: Arc<dyn UserRepository>,
    pub standings: Arc<dyn StandingsRepository>,
    pub snapshots: Arc<dyn SnapshotRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        Self::from_repo(InMemoryRepository::new())
    }

    /// Use one repository value for every concern.
    pub fn from_repo<R>(repo: R) -> Self
    where
        R: ProgressRepository
            + ContentCatalog
            + UserRepository
            + StandingsRepository
            + SnapshotRepository
            + Clone
            + 'static,
    {
        Self {
            progress: Arc::new(repo.clone()),
            content: Arc::new(repo.clone()),
            users: Arc::new(repo.clone()),
            standings: Arc::new(repo.clone()),
            snapshots: Arc::new(repo),
        }
    }
}
