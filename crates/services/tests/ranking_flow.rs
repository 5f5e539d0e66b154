use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use rewards_core::model::{
    ContentId, ContentType, Grouping, ProgressKey, ProgressRecord, RankChangeType, Role,
    SubjectId, TopicId, User, UserId,
};
use rewards_core::ranking::RankCandidate;
use services::{
    AppServices, Clock, LeaderboardError, LeaderboardService, RankingJob, RankingJobError,
    RewardsConfig, SnapshotRun,
};
use storage::StorageError;
use storage::repository::{
    InMemoryRepository, ProgressRepository, SnapshotRepository, StandingRow, StandingsRepository,
    Storage, UserRepository,
};

fn noon(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

async fn add_user(repo: &InMemoryRepository, id: &str, role: Role) {
    let user = User::new(
        UserId::new(id).unwrap(),
        id.to_uppercase(),
        Some("Tester".into()),
        role,
        noon(2024, 1, 1),
    )
    .unwrap();
    repo.insert_user(&user).await.unwrap();
}

/// Credits `xp` to `id` through a one-off progress record.
async fn credit(repo: &InMemoryRepository, id: &str, xp: u64, at: DateTime<Utc>) {
    let n = repo
        .progress_for_user(&UserId::new(id).unwrap())
        .await
        .unwrap()
        .len();
    let key = ProgressKey::new(
        UserId::new(id).unwrap(),
        ContentId::new(format!("grant-{n}")).unwrap(),
        ContentType::Question,
    );
    let grouping = Grouping {
        topic_id: TopicId::new("t").unwrap(),
        subject_id: SubjectId::new("s").unwrap(),
        section_id: None,
    };
    let record = ProgressRecord::fresh(key, grouping, at);
    repo.commit_completion(&record, 0, xp, Some(at.date_naive()))
        .await
        .unwrap();
}

fn services_at(repo: &InMemoryRepository, at: DateTime<Utc>, config: RewardsConfig) -> AppServices {
    AppServices::from_storage(&Storage::from_repo(repo.clone()), Clock::fixed(at), config)
}

#[tokio::test]
async fn overtaking_is_reported_against_yesterday() {
    let repo = InMemoryRepository::new();
    for id in ["a", "b", "c"] {
        add_user(&repo, id, Role::Learner).await;
    }
    credit(&repo, "a", 100, noon(2024, 1, 10)).await;
    credit(&repo, "b", 300, noon(2024, 1, 10)).await;
    credit(&repo, "c", 200, noon(2024, 1, 10)).await;

    let day_one = services_at(&repo, noon(2024, 1, 10), RewardsConfig::default());
    let run = day_one.ranking().run(None).await.unwrap();
    assert_eq!(
        run,
        SnapshotRun::Created {
            date: date(2024, 1, 10),
            ranked_users: 3,
            history_entries: 3,
            pruned_snapshots: 0,
        }
    );

    credit(&repo, "a", 300, noon(2024, 1, 11)).await;
    let day_two = services_at(&repo, noon(2024, 1, 11), RewardsConfig::default());
    day_two.ranking().run(None).await.unwrap();

    let snapshot = repo.get_snapshot(date(2024, 1, 11)).await.unwrap().unwrap();
    let a = &snapshot.rankings[0];
    assert_eq!(a.user_id.as_str(), "a");
    assert_eq!(a.rank, 1);
    assert_eq!(a.total_xp, 400);
    assert_eq!(a.change.previous_rank, Some(3));
    assert_eq!(a.change.delta, 2);
    assert_eq!(a.change.kind, RankChangeType::Up);

    let b = &snapshot.rankings[1];
    assert_eq!(b.user_id.as_str(), "b");
    assert_eq!(b.change.delta, -1);
    assert_eq!(b.change.kind, RankChangeType::Down);

    // The live leaderboard compares against the same baseline.
    let page = day_two.leaderboard().page(None, 1, None).await.unwrap();
    assert_eq!(page.entries[0].user_id.as_str(), "a");
    assert_eq!(page.entries[0].rank_change, 2);
    assert_eq!(page.entries[0].rank_change_type, RankChangeType::Up);

    let user = repo.get_user(&UserId::new("a").unwrap()).await.unwrap().unwrap();
    let ranks: Vec<_> = user.rank_history.iter().map(|h| h.rank).collect();
    assert_eq!(ranks, vec![3, 1]);
}

#[tokio::test]
async fn second_trigger_on_the_same_day_is_a_no_op() {
    let repo = InMemoryRepository::new();
    add_user(&repo, "a", Role::Learner).await;
    credit(&repo, "a", 50, noon(2024, 3, 1)).await;

    let services = services_at(&repo, noon(2024, 3, 1), RewardsConfig::default());
    let first = services.ranking().run(None).await.unwrap();
    assert!(matches!(first, SnapshotRun::Created { .. }));

    credit(&repo, "a", 50, noon(2024, 3, 1)).await;
    let second = services.ranking().run(None).await.unwrap();
    assert_eq!(
        second,
        SnapshotRun::AlreadyTaken {
            date: date(2024, 3, 1)
        }
    );

    let snapshot = repo.get_snapshot(date(2024, 3, 1)).await.unwrap().unwrap();
    assert_eq!(snapshot.rankings[0].total_xp, 50);
    let user = repo.get_user(&UserId::new("a").unwrap()).await.unwrap().unwrap();
    assert_eq!(user.rank_history.len(), 1);
}

#[tokio::test]
async fn first_snapshot_marks_everyone_new() {
    let repo = InMemoryRepository::new();
    add_user(&repo, "a", Role::Learner).await;
    add_user(&repo, "b", Role::Learner).await;

    let services = services_at(&repo, noon(2024, 3, 1), RewardsConfig::default());
    services.ranking().run(None).await.unwrap();

    let snapshot = repo.get_snapshot(date(2024, 3, 1)).await.unwrap().unwrap();
    assert!(
        snapshot
            .rankings
            .iter()
            .all(|e| e.change.kind == RankChangeType::New && e.change.delta == 0)
    );
    // Equal XP falls back to id order.
    let ids: Vec<_> = snapshot.rankings.iter().map(|e| e.user_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);
}

#[tokio::test]
async fn only_learners_are_ranked() {
    let repo = InMemoryRepository::new();
    add_user(&repo, "a", Role::Learner).await;
    add_user(&repo, "boss", Role::Admin).await;
    add_user(&repo, "prof", Role::Instructor).await;
    credit(&repo, "boss", 9000, noon(2024, 3, 1)).await;

    let services = services_at(&repo, noon(2024, 3, 1), RewardsConfig::default());
    let run = services.ranking().run(None).await.unwrap();
    assert!(matches!(run, SnapshotRun::Created { ranked_users: 1, .. }));

    let boss = UserId::new("boss").unwrap();
    let page = services.leaderboard().page(Some(&boss), 1, None).await.unwrap();
    assert_eq!(page.total_users, 1);
    assert!(page.requester.is_none());
}

#[tokio::test]
async fn trigger_requires_the_configured_secret() {
    let repo = InMemoryRepository::new();
    add_user(&repo, "a", Role::Learner).await;
    let config = RewardsConfig::default().with_ranking_secret(Some("s3cret".into()));
    let services = services_at(&repo, noon(2024, 3, 1), config);

    assert!(matches!(
        services.ranking().run(None).await.unwrap_err(),
        RankingJobError::Unauthorized
    ));
    assert!(matches!(
        services.ranking().run(Some("guess")).await.unwrap_err(),
        RankingJobError::Unauthorized
    ));
    assert!(!repo.snapshot_exists(date(2024, 3, 1)).await.unwrap());

    let run = services.ranking().run(Some("s3cret")).await.unwrap();
    assert!(matches!(run, SnapshotRun::Created { .. }));
}

#[tokio::test]
async fn retention_keeps_exactly_that_many_days_and_history_is_bounded() {
    let repo = InMemoryRepository::new();
    add_user(&repo, "a", Role::Learner).await;
    let config = RewardsConfig {
        snapshot_retention_days: 2,
        rank_history_limit: 2,
        ..RewardsConfig::default()
    };

    let start = noon(2024, 5, 1);
    let job = services_at(&repo, start, config).ranking().as_ref().clone();
    let mut pruned = Vec::new();
    for day in 0..5 {
        let run = job
            .clone()
            .with_clock(Clock::fixed(start + Duration::days(day)))
            .run(None)
            .await
            .unwrap();
        if let SnapshotRun::Created {
            pruned_snapshots, ..
        } = run
        {
            pruned.push(pruned_snapshots);
        }
    }
    assert_eq!(pruned, vec![0, 0, 1, 1, 1]);
    assert!(!repo.snapshot_exists(date(2024, 5, 3)).await.unwrap());
    assert!(repo.snapshot_exists(date(2024, 5, 4)).await.unwrap());
    assert!(repo.snapshot_exists(date(2024, 5, 5)).await.unwrap());

    let user = repo.get_user(&UserId::new("a").unwrap()).await.unwrap().unwrap();
    let dates: Vec<_> = user.rank_history.iter().map(|h| h.date).collect();
    assert_eq!(dates, vec![date(2024, 5, 4), date(2024, 5, 5)]);
}

#[tokio::test]
async fn live_ranks_agree_with_the_snapshot() {
    let repo = InMemoryRepository::new();
    let xp = [("d", 40), ("a", 70), ("c", 70), ("b", 10), ("e", 0), ("f", 70)];
    for (id, amount) in xp {
        add_user(&repo, id, Role::Learner).await;
        if amount > 0 {
            credit(&repo, id, amount, noon(2024, 2, 1)).await;
        }
    }

    let services = services_at(&repo, noon(2024, 2, 1), RewardsConfig::default());
    services.ranking().run(None).await.unwrap();
    let snapshot = repo.get_snapshot(date(2024, 2, 1)).await.unwrap().unwrap();

    let page = services.leaderboard().page(None, 1, Some(100)).await.unwrap();
    let live: Vec<_> = page
        .entries
        .iter()
        .map(|e| (e.user_id.clone(), e.rank))
        .collect();
    let taken: Vec<_> = snapshot
        .rankings
        .iter()
        .map(|e| (e.user_id.clone(), e.rank))
        .collect();
    assert_eq!(live, taken);
    let order: Vec<_> = live.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(order, vec!["a", "c", "f", "d", "b", "e"]);

    // A requester off the page gets the same rank through count_ahead.
    for entry in &snapshot.rankings {
        let page = services
            .leaderboard()
            .page(Some(&entry.user_id), 1, Some(1))
            .await
            .unwrap();
        let me = page
            .requester
            .as_ref()
            .or_else(|| page.entries.iter().find(|e| e.user_id == entry.user_id))
            .unwrap();
        assert_eq!(me.rank, entry.rank);
    }
}

#[tokio::test]
async fn pages_are_validated_and_counted() {
    let repo = InMemoryRepository::new();
    for i in 0..5 {
        add_user(&repo, &format!("u{i}"), Role::Learner).await;
    }
    let services = services_at(&repo, noon(2024, 2, 1), RewardsConfig::default());
    let board = services.leaderboard();

    let page = board.page(None, 2, Some(2)).await.unwrap();
    assert_eq!(page.total_users, 5);
    assert_eq!(page.total_pages, 3);
    let ranks: Vec<_> = page.entries.iter().map(|e| e.rank).collect();
    assert_eq!(ranks, vec![3, 4]);
    assert!(page.entries.iter().all(|e| e.rank_change_type == RankChangeType::New));

    let past_end = board.page(None, 9, Some(2)).await.unwrap();
    assert!(past_end.entries.is_empty());

    for (page, size) in [(0, Some(10)), (1, Some(0)), (1, Some(101))] {
        let err = board.page(None, page, size).await.unwrap_err();
        assert!(matches!(err, LeaderboardError::InvalidPage { .. }));
        assert!(!err.is_retryable());
    }
}

#[derive(Clone)]
struct DownStandings;

#[async_trait]
impl StandingsRepository for DownStandings {
    async fn all_standings(&self) -> Result<Vec<RankCandidate>, StorageError> {
        Err(StorageError::Connection("database is locked".into()))
    }

    async fn count_standings(&self) -> Result<u64, StorageError> {
        Err(StorageError::Connection("database is locked".into()))
    }

    async fn standings_page(
        &self,
        _offset: u64,
        _limit: u32,
    ) -> Result<Vec<StandingRow>, StorageError> {
        Err(StorageError::Connection("database is locked".into()))
    }

    async fn count_ahead(&self, _total_xp: u64, _user_id: &UserId) -> Result<u64, StorageError> {
        Err(StorageError::Connection("database is locked".into()))
    }
}

#[tokio::test]
async fn storage_outage_is_retryable_and_writes_nothing() {
    let repo = InMemoryRepository::new();
    add_user(&repo, "a", Role::Learner).await;
    let config = Arc::new(RewardsConfig::default());
    let clock = Clock::fixed(noon(2024, 2, 1));

    let board = LeaderboardService::new(
        clock,
        Arc::clone(&config),
        Arc::new(DownStandings),
        Arc::new(repo.clone()),
        Arc::new(repo.clone()),
    );
    let err = board.page(None, 1, None).await.unwrap_err();
    assert!(matches!(err, LeaderboardError::Unavailable(_)));
    assert!(err.is_retryable());

    let job = RankingJob::new(clock, config, Arc::new(DownStandings), Arc::new(repo.clone()));
    assert!(matches!(
        job.run(None).await.unwrap_err(),
        RankingJobError::Storage(_)
    ));
    assert!(!repo.snapshot_exists(date(2024, 2, 1)).await.unwrap());
}
