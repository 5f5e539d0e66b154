use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rewards_core::bonus::BonusScope;
use rewards_core::leveling::{LevelChange, level_for_xp};
use rewards_core::model::{
    ContentId, ContentItem, ContentType, DailyRankSnapshot, ProgressKey, ProgressRecord,
    RankHistoryEntry, User, UserId, next_streak, push_rank_history,
};
use rewards_core::ranking::{RankCandidate, rank, rank_of};

use crate::repository::{
    CompletionCommit, ContentCatalog, CreditReceipt, ProgressRepository, SnapshotCommit,
    SnapshotRepository, StandingRow, StandingsRepository, StorageError, UserRepository,
};

#[derive(Default)]
struct State {
    users: HashMap<UserId, User>,
    progress: HashMap<ProgressKey, ProgressRecord>,
    content: HashMap<(ContentType, ContentId), ContentItem>,
    achievements: HashMap<UserId, HashMap<String, DateTime<Utc>>>,
    bonus_claims: HashMap<UserId, HashMap<BonusScope, DateTime<Utc>>>,
    snapshots: BTreeMap<NaiveDate, DailyRankSnapshot>,
}

impl State {
    fn credit(
        &mut self,
        user_id: &UserId,
        xp: u64,
        activity_on: Option<NaiveDate>,
    ) -> Result<CreditReceipt, StorageError> {
        let user = self.users.get_mut(user_id).ok_or(StorageError::NotFound)?;
        let previous_total = user.total_xp;
        user.total_xp = user.total_xp.saturating_add(xp);
        user.level = level_for_xp(user.total_xp);

        if let Some(day) = activity_on {
            user.current_streak = next_streak(user.last_active_on, user.current_streak, day);
            user.longest_streak = user.longest_streak.max(user.current_streak);
            user.last_active_on = Some(day);
        }

        Ok(CreditReceipt {
            previous_total,
            new_total: user.total_xp,
            level: LevelChange::between(previous_total, user.total_xp),
            current_streak: user.current_streak,
        })
    }

    fn learners(&self) -> impl Iterator<Item = &User> {
        self.users.values().filter(|u| u.role.is_ranked())
    }
}

fn candidate(user: &User) -> RankCandidate {
    RankCandidate {
        user_id: user.id.clone(),
        total_xp: user.total_xp,
        level: user.level,
        streak: user.current_streak,
    }
}

/// Simple in-memory repository implementation for testing and prototyping.
///
/// Every operation runs under one lock, which makes the multi-entity writes
/// (record + credit, claim + credit) atomic.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    state: Arc<Mutex<State>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StorageError> {
        self.state
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }
}

#[async_trait]
impl ProgressRepository for InMemoryRepository {
    async fn get_progress(&self, key: &ProgressKey) -> Result<Option<ProgressRecord>, StorageError> {
        Ok(self.lock()?.progress.get(key).cloned())
    }

    async fn commit_completion(
        &self,
        record: &ProgressRecord,
        expected_revision: u64,
        xp: u64,
        activity_on: Option<NaiveDate>,
    ) -> Result<CompletionCommit, StorageError> {
        let mut guard = self.lock()?;
        let stored_revision = guard.progress.get(&record.key).map_or(0, |r| r.revision);
        if stored_revision != expected_revision {
            return Err(StorageError::Conflict);
        }
        if !guard.users.contains_key(&record.key.user_id) {
            return Err(StorageError::NotFound);
        }

        let credit = guard.credit(&record.key.user_id, xp, activity_on)?;
        let mut stored = record.clone();
        stored.revision = expected_revision + 1;
        guard.progress.insert(stored.key.clone(), stored.clone());

        Ok(CompletionCommit {
            record: stored,
            credit,
        })
    }

    async fn claim_bonus(
        &self,
        user_id: &UserId,
        scope: &BonusScope,
        xp: u64,
        claimed_at: DateTime<Utc>,
    ) -> Result<Option<CreditReceipt>, StorageError> {
        let mut guard = self.lock()?;
        let already = guard
            .bonus_claims
            .get(user_id)
            .is_some_and(|claims| claims.contains_key(scope));
        if already {
            return Ok(None);
        }
        let credit = guard.credit(user_id, xp, None)?;
        guard
            .bonus_claims
            .entry(user_id.clone())
            .or_default()
            .insert(scope.clone(), claimed_at);
        Ok(Some(credit))
    }

    async fn bonus_claimed(
        &self,
        user_id: &UserId,
        scope: &BonusScope,
    ) -> Result<bool, StorageError> {
        Ok(self
            .lock()?
            .bonus_claims
            .get(user_id)
            .is_some_and(|claims| claims.contains_key(scope)))
    }

    async fn count_bonus_claims(&self, user_id: &UserId) -> Result<u32, StorageError> {
        let guard = self.lock()?;
        let count = guard.bonus_claims.get(user_id).map_or(0, HashMap::len);
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn completed_in_scope(
        &self,
        user_id: &UserId,
        scope: &BonusScope,
    ) -> Result<HashSet<ContentId>, StorageError> {
        let guard = self.lock()?;
        let member_type = scope.member_type();
        Ok(guard
            .progress
            .values()
            .filter(|r| {
                &r.key.user_id == user_id
                    && r.key.content_type == member_type
                    && r.reward.first_completed_at().is_some()
                    && match scope {
                        BonusScope::Section { section_id } => {
                            r.grouping.section_id.as_ref() == Some(section_id)
                        }
                        BonusScope::Topic { topic_id, .. } => &r.grouping.topic_id == topic_id,
                    }
            })
            .map(|r| r.key.content_id.clone())
            .collect())
    }

    async fn progress_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<ProgressRecord>, StorageError> {
        let guard = self.lock()?;
        Ok(guard
            .progress
            .values()
            .filter(|r| &r.key.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ContentCatalog for InMemoryRepository {
    async fn upsert_content(&self, item: &ContentItem) -> Result<(), StorageError> {
        self.lock()?
            .content
            .insert((item.content_type, item.id.clone()), item.clone());
        Ok(())
    }

    async fn group_members(&self, scope: &BonusScope) -> Result<HashSet<ContentId>, StorageError> {
        let guard = self.lock()?;
        let member_type = scope.member_type();
        Ok(guard
            .content
            .values()
            .filter(|item| {
                item.content_type == member_type
                    && match scope {
                        BonusScope::Section { section_id } => {
                            item.section_id.as_ref() == Some(section_id)
                        }
                        BonusScope::Topic { topic_id, .. } => &item.topic_id == topic_id,
                    }
            })
            .map(|item| item.id.clone())
            .collect())
    }
}

#[async_trait]
impl UserRepository for InMemoryRepository {
    async fn insert_user(&self, user: &User) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        if guard.users.contains_key(&user.id) {
            return Err(StorageError::Conflict);
        }
        guard.users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn get_user(&self, id: &UserId) -> Result<Option<User>, StorageError> {
        Ok(self.lock()?.users.get(id).cloned())
    }

    async fn delete_user(&self, id: &UserId) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        if guard.users.remove(id).is_none() {
            return Err(StorageError::NotFound);
        }
        guard.progress.retain(|key, _| &key.user_id != id);
        guard.achievements.remove(id);
        guard.bonus_claims.remove(id);
        Ok(())
    }

    async fn unlocked_achievements(&self, id: &UserId) -> Result<HashSet<String>, StorageError> {
        let guard = self.lock()?;
        Ok(guard
            .achievements
            .get(id)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn unlock_achievement(
        &self,
        id: &UserId,
        achievement_id: &str,
        xp: u64,
        unlocked_at: DateTime<Utc>,
    ) -> Result<Option<CreditReceipt>, StorageError> {
        let mut guard = self.lock()?;
        let already = guard
            .achievements
            .get(id)
            .is_some_and(|m| m.contains_key(achievement_id));
        if already {
            return Ok(None);
        }
        let credit = guard.credit(id, xp, None)?;
        guard
            .achievements
            .entry(id.clone())
            .or_default()
            .insert(achievement_id.to_owned(), unlocked_at);
        Ok(Some(credit))
    }
}

#[async_trait]
impl StandingsRepository for InMemoryRepository {
    async fn all_standings(&self) -> Result<Vec<RankCandidate>, StorageError> {
        Ok(self.lock()?.learners().map(candidate).collect())
    }

    async fn count_standings(&self) -> Result<u64, StorageError> {
        Ok(self.lock()?.learners().count() as u64)
    }

    async fn standings_page(
        &self,
        offset: u64,
        limit: u32,
    ) -> Result<Vec<StandingRow>, StorageError> {
        let guard = self.lock()?;
        let ranked = rank(guard.learners().map(candidate).collect());
        let skip = usize::try_from(offset).unwrap_or(usize::MAX);
        let take = usize::try_from(limit).unwrap_or(usize::MAX);

        Ok(ranked
            .into_iter()
            .skip(skip)
            .take(take)
            .filter_map(|(_, c)| {
                guard.users.get(&c.user_id).map(|u| StandingRow {
                    given_name: u.given_name.clone(),
                    family_name: u.family_name.clone(),
                    candidate: c,
                })
            })
            .collect())
    }

    async fn count_ahead(&self, total_xp: u64, user_id: &UserId) -> Result<u64, StorageError> {
        let guard = self.lock()?;
        let rank = rank_of(total_xp, user_id, guard.learners().map(|u| (u.total_xp, &u.id)));
        Ok(u64::from(rank - 1))
    }
}

#[async_trait]
impl SnapshotRepository for InMemoryRepository {
    async fn snapshot_exists(&self, date: NaiveDate) -> Result<bool, StorageError> {
        Ok(self.lock()?.snapshots.contains_key(&date))
    }

    async fn get_snapshot(
        &self,
        date: NaiveDate,
    ) -> Result<Option<DailyRankSnapshot>, StorageError> {
        Ok(self.lock()?.snapshots.get(&date).cloned())
    }

    async fn commit_snapshot(
        &self,
        snapshot: &DailyRankSnapshot,
        history_limit: u32,
        prune_through: NaiveDate,
    ) -> Result<SnapshotCommit, StorageError> {
        let mut guard = self.lock()?;
        if guard.snapshots.contains_key(&snapshot.date) {
            return Ok(SnapshotCommit::default());
        }

        let limit = usize::try_from(history_limit).unwrap_or(usize::MAX);
        let mut history_entries = 0_u32;
        for entry in &snapshot.rankings {
            if let Some(user) = guard.users.get_mut(&entry.user_id) {
                push_rank_history(
                    &mut user.rank_history,
                    RankHistoryEntry {
                        date: snapshot.date,
                        rank: entry.rank,
                        total_xp: entry.total_xp,
                    },
                    limit,
                );
                history_entries += 1;
            }
        }

        guard.snapshots.insert(snapshot.date, snapshot.clone());
        let before = guard.snapshots.len();
        guard.snapshots.retain(|date, _| *date > prune_through);
        let pruned = u32::try_from(before - guard.snapshots.len()).unwrap_or(u32::MAX);

        Ok(SnapshotCommit {
            inserted: true,
            history_entries,
            pruned_snapshots: pruned,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rewards_core::model::{Grouping, Role, SubjectId, TopicId};
    use rewards_core::time::fixed_now;

    fn user(id: &str, xp: u64) -> User {
        let mut u = User::new(UserId::new(id).unwrap(), "Test", None, Role::Learner, fixed_now())
            .unwrap();
        u.total_xp = xp;
        u.level = level_for_xp(xp);
        u
    }

    fn record(user_id: &str, content: &str) -> ProgressRecord {
        ProgressRecord::fresh(
            ProgressKey::new(
                UserId::new(user_id).unwrap(),
                ContentId::new(content).unwrap(),
                ContentType::Question,
            ),
            Grouping {
                topic_id: TopicId::new("t1").unwrap(),
                subject_id: SubjectId::new("s1").unwrap(),
                section_id: None,
            },
            fixed_now(),
        )
    }

    #[tokio::test]
    async fn stale_revision_is_a_conflict() {
        let repo = InMemoryRepository::new();
        repo.insert_user(&user("u1", 0)).await.unwrap();

        let rec = record("u1", "q1");
        let first = repo.commit_completion(&rec, 0, 5, None).await.unwrap();
        assert_eq!(first.record.revision, 1);
        assert_eq!(first.credit.new_total, 5);

        let err = repo.commit_completion(&rec, 0, 5, None).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict));
        assert_eq!(repo.get_user(&rec.key.user_id).await.unwrap().unwrap().total_xp, 5);
    }

    #[tokio::test]
    async fn commit_for_unknown_user_writes_nothing() {
        let repo = InMemoryRepository::new();
        let rec = record("ghost", "q1");
        let err = repo.commit_completion(&rec, 0, 5, None).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound));
        assert!(repo.get_progress(&rec.key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_user_is_a_conflict() {
        let repo = InMemoryRepository::new();
        repo.insert_user(&user("u1", 0)).await.unwrap();
        assert!(matches!(
            repo.insert_user(&user("u1", 0)).await.unwrap_err(),
            StorageError::Conflict
        ));
    }

    #[tokio::test]
    async fn count_ahead_uses_id_tie_break() {
        let repo = InMemoryRepository::new();
        for (id, xp) in [("a", 10), ("b", 10), ("c", 20)] {
            repo.insert_user(&user(id, xp)).await.unwrap();
        }
        let b = UserId::new("b").unwrap();
        assert_eq!(repo.count_ahead(10, &b).await.unwrap(), 2);

        let page = repo.standings_page(1, 5).await.unwrap();
        let ids: Vec<_> = page.iter().map(|r| r.candidate.user_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn bonus_claims_do_not_touch_progress() {
        let repo = InMemoryRepository::new();
        repo.insert_user(&user("u1", 0)).await.unwrap();
        let user_id = UserId::new("u1").unwrap();
        let scope = BonusScope::Topic {
            topic_id: TopicId::new("t1").unwrap(),
            content_type: ContentType::Flashcard,
        };

        let first = repo.claim_bonus(&user_id, &scope, 10, fixed_now()).await.unwrap();
        assert_eq!(first.map(|c| c.credited()), Some(10));
        assert!(repo.claim_bonus(&user_id, &scope, 10, fixed_now()).await.unwrap().is_none());
        assert!(repo.bonus_claimed(&user_id, &scope).await.unwrap());
        assert_eq!(repo.count_bonus_claims(&user_id).await.unwrap(), 1);
        assert!(repo.progress_for_user(&user_id).await.unwrap().is_empty());
        assert_eq!(repo.get_user(&user_id).await.unwrap().unwrap().total_xp, 10);
    }

    #[tokio::test]
    async fn delete_user_cascades_progress() {
        let repo = InMemoryRepository::new();
        repo.insert_user(&user("u1", 0)).await.unwrap();
        let rec = record("u1", "q1");
        repo.commit_completion(&rec, 0, 0, None).await.unwrap();

        let scope = BonusScope::Section {
            section_id: rewards_core::model::SectionId::new("sec1").unwrap(),
        };
        repo.claim_bonus(&rec.key.user_id, &scope, 25, fixed_now()).await.unwrap();

        repo.delete_user(&rec.key.user_id).await.unwrap();
        assert!(repo.get_progress(&rec.key).await.unwrap().is_none());
        assert_eq!(repo.count_bonus_claims(&rec.key.user_id).await.unwrap(), 0);
        assert!(matches!(
            repo.delete_user(&rec.key.user_id).await.unwrap_err(),
            StorageError::NotFound
        ));
    }
}
