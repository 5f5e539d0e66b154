use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Duration;
use rewards_core::bonus::BonusScope;
use rewards_core::model::{
    CompletionData, ContentId, ContentItem, ContentType, Difficulty, MAX_KEY_LEN, Mastery,
    ProgressKey, Role, SectionId, SubjectId, TopicId, User, UserId,
};
use rewards_core::time::{fixed_clock, fixed_now};
use rewards_core::xp::RewardClass;
use services::{
    AchievementService, AppServices, BonusDetector, Clock, CompletionRequest, ProgressService,
    ProgressServiceError, RewardsConfig,
};
use storage::repository::{
    ContentCatalog, InMemoryRepository, ProgressRepository, Storage, StorageError,
    UserRepository,
};

async fn setup(users: &[(&str, u64)]) -> (InMemoryRepository, AppServices) {
    let repo = InMemoryRepository::new();
    for (id, xp) in users {
        let mut user = User::new(
            UserId::new(*id).unwrap(),
            "Test",
            Some("User".into()),
            Role::Learner,
            fixed_now(),
        )
        .unwrap();
        user.total_xp = *xp;
        user.level = rewards_core::leveling::level_for_xp(*xp);
        repo.insert_user(&user).await.unwrap();
    }
    let services = AppServices::from_storage(
        &Storage::from_repo(repo.clone()),
        fixed_clock(),
        RewardsConfig::default(),
    );
    (repo, services)
}

fn question(user: &str, id: &str, difficulty: Difficulty, score: f64) -> CompletionRequest {
    CompletionRequest {
        user_id: user.into(),
        content_id: id.into(),
        topic_id: "topic-1".into(),
        subject_id: "subject-1".into(),
        section_id: None,
        completed: true,
        score,
        time_spent_secs: 20,
        data: CompletionData::Question {
            difficulty,
            correct_answers: 1,
            total_answers: 1,
        },
    }
}

fn flashcard(user: &str, id: &str) -> CompletionRequest {
    CompletionRequest {
        user_id: user.into(),
        content_id: id.into(),
        topic_id: "topic-1".into(),
        subject_id: "subject-1".into(),
        section_id: None,
        completed: true,
        score: 100.0,
        time_spent_secs: 5,
        data: CompletionData::Flashcard {
            difficulty: Difficulty::Beginner,
            mastery: Mastery::Reviewing,
        },
    }
}

async fn register_flashcards(repo: &InMemoryRepository, count: u32) {
    for i in 1..=count {
        repo.upsert_content(&ContentItem {
            id: ContentId::new(format!("card-{i}")).unwrap(),
            content_type: ContentType::Flashcard,
            topic_id: TopicId::new("topic-1").unwrap(),
            subject_id: SubjectId::new("subject-1").unwrap(),
            section_id: None,
            difficulty: Difficulty::Beginner,
        })
        .await
        .unwrap();
    }
}

fn on_day(services: &AppServices, days: i64) -> ProgressService {
    services
        .progress()
        .as_ref()
        .clone()
        .with_clock(Clock::fixed(fixed_now() + Duration::days(days)))
}

#[tokio::test]
async fn beginner_question_pays_five_xp_first_time() {
    let (_repo, services) = setup(&[("u1", 0)]).await;

    let outcome = services
        .progress()
        .record_completion(&question("u1", "q1", Difficulty::Beginner, 100.0))
        .await
        .unwrap();

    assert_eq!(outcome.classification, RewardClass::FirstTime);
    assert_eq!(outcome.xp.base, 5);
    assert_eq!(outcome.level, 1);
    assert!(!outcome.leveled_up);
    assert_eq!(outcome.attempts, 1);
    assert_eq!(outcome.current_streak, 1);
    assert!(!outcome.rewards_pending);
}

#[tokio::test]
async fn crossing_a_hundred_xp_levels_up() {
    let (repo, services) = setup(&[("u1", 85)]).await;
    let user_id = UserId::new("u1").unwrap();
    // Pre-unlock so the only credit below is the 10 XP reward.
    repo.unlock_achievement(&user_id, "first-steps", 10, fixed_now())
        .await
        .unwrap();

    let outcome = services
        .progress()
        .record_completion(&question("u1", "q1", Difficulty::Intermediate, 100.0))
        .await
        .unwrap();

    assert_eq!(outcome.xp.base, 10);
    assert_eq!(outcome.xp.total(), 10);
    assert_eq!(outcome.total_xp, 105);
    assert_eq!(outcome.level, 2);
    assert_eq!(outcome.xp_to_next_level, 95);
    assert!(outcome.leveled_up);
    assert!(outcome.message.contains("level 2"));
}

#[tokio::test]
async fn repeats_pay_once_per_calendar_day() {
    let (repo, services) = setup(&[("u1", 0)]).await;
    let req = question("u1", "q1", Difficulty::Advanced, 100.0);

    let first = services.progress().record_completion(&req).await.unwrap();
    assert_eq!(first.classification, RewardClass::FirstTime);
    assert_eq!(first.xp.base, 15);

    let same_day = services.progress().record_completion(&req).await.unwrap();
    assert_eq!(same_day.classification, RewardClass::None);
    assert_eq!(same_day.xp.total(), 0);

    let next_day = on_day(&services, 1);
    let daily = next_day.record_completion(&req).await.unwrap();
    assert_eq!(daily.classification, RewardClass::DailyRepeat);
    assert_eq!(daily.xp.base, 7);
    assert_eq!(daily.current_streak, 2);

    let again = next_day.record_completion(&req).await.unwrap();
    assert_eq!(again.classification, RewardClass::None);

    let key = ProgressKey::new(
        UserId::new("u1").unwrap(),
        ContentId::new("q1").unwrap(),
        ContentType::Question,
    );
    let record = repo.get_progress(&key).await.unwrap().unwrap();
    assert_eq!(record.attempts, 4);
    assert_eq!(record.daily_xp_count, 1);
    assert_eq!(record.total_xp_earned, 22);
    assert_eq!(
        record.reward.first_completed_at(),
        Some(fixed_now()),
        "first completion is never moved"
    );
}

#[tokio::test]
async fn failed_attempt_counts_but_pays_nothing() {
    let (repo, services) = setup(&[("u1", 0)]).await;

    let mut req = question("u1", "q1", Difficulty::Beginner, 0.0);
    let outcome = services.progress().record_completion(&req).await.unwrap();
    assert_eq!(outcome.classification, RewardClass::None);
    assert_eq!(outcome.total_xp, 0);
    assert!(outcome.achievements.is_empty());

    req.score = 60.0;
    let outcome = services.progress().record_completion(&req).await.unwrap();
    assert_eq!(outcome.classification, RewardClass::FirstTime);
    assert_eq!(outcome.xp.base, 3);
    assert_eq!(outcome.attempts, 2);

    let user = repo.get_user(&UserId::new("u1").unwrap()).await.unwrap().unwrap();
    assert_eq!(user.total_xp, outcome.total_xp);
}

#[tokio::test]
async fn flashcard_topic_bonus_is_paid_once() {
    let (repo, services) = setup(&[("u1", 0)]).await;
    register_flashcards(&repo, 5).await;

    for i in 1..=4 {
        let outcome = services
            .progress()
            .record_completion(&flashcard("u1", &format!("card-{i}")))
            .await
            .unwrap();
        assert!(outcome.bonus.is_none());
    }

    let last = services
        .progress()
        .record_completion(&flashcard("u1", "card-5"))
        .await
        .unwrap();
    assert_eq!(last.xp.bonus, 10);
    assert!(last.bonus.is_some());
    assert!(last.achievements.iter().any(|a| a.id == "completionist"));

    // Repeats on later days never re-credit the group bonus.
    for day in 1..=2 {
        let svc = on_day(&services, day);
        for i in 1..=5 {
            let outcome = svc
                .record_completion(&flashcard("u1", &format!("card-{i}")))
                .await
                .unwrap();
            assert_eq!(outcome.xp.bonus, 0);
            assert!(outcome.bonus.is_none());
        }
    }

    let stats = services
        .achievements()
        .stats(&UserId::new("u1").unwrap())
        .await
        .unwrap();
    assert_eq!(stats.bonuses_claimed, 1);
    assert_eq!(stats.flashcards_completed, 5);
}

#[tokio::test]
async fn empty_group_never_pays_a_bonus() {
    let (_repo, services) = setup(&[("u1", 0)]).await;

    // No catalog entries for the topic.
    let outcome = services
        .progress()
        .record_completion(&flashcard("u1", "card-1"))
        .await
        .unwrap();
    assert_eq!(outcome.classification, RewardClass::FirstTime);
    assert!(outcome.bonus.is_none());
}

#[tokio::test]
async fn section_bonus_needs_every_question() {
    let (repo, services) = setup(&[("u1", 0)]).await;
    for id in ["q1", "q2"] {
        repo.upsert_content(&ContentItem {
            id: ContentId::new(id).unwrap(),
            content_type: ContentType::Question,
            topic_id: TopicId::new("topic-1").unwrap(),
            subject_id: SubjectId::new("subject-1").unwrap(),
            section_id: Some(SectionId::new("sec-1").unwrap()),
            difficulty: Difficulty::Expert,
        })
        .await
        .unwrap();
    }

    let in_section = |id: &str| {
        let mut req = question("u1", id, Difficulty::Expert, 100.0);
        req.section_id = Some("sec-1".into());
        req
    };

    let first = services
        .progress()
        .record_completion(&in_section("q1"))
        .await
        .unwrap();
    assert!(first.bonus.is_none());

    let second = services
        .progress()
        .record_completion(&in_section("q2"))
        .await
        .unwrap();
    assert_eq!(second.xp.bonus, 100);

    let user_id = UserId::new("u1").unwrap();
    let scope = BonusScope::Section {
        section_id: SectionId::new("sec-1").unwrap(),
    };
    assert!(repo.bonus_claimed(&user_id, &scope).await.unwrap());
    // The claim is not a progress record.
    assert_eq!(repo.progress_for_user(&user_id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn achievements_cascade_into_level_ups() {
    let (repo, services) = setup(&[("u1", 390)]).await;
    let user_id = UserId::new("u1").unwrap();

    let outcome = services
        .progress()
        .record_completion(&question("u1", "q1", Difficulty::Beginner, 100.0))
        .await
        .unwrap();

    // 390 + 5 base + 10 first-steps = 405, which unlocks rising-star (+50).
    let ids: Vec<_> = outcome.achievements.iter().map(|a| a.id).collect();
    assert_eq!(ids, vec!["first-steps", "rising-star"]);
    assert_eq!(outcome.xp.achievements, 60);
    assert_eq!(outcome.total_xp, 455);
    assert_eq!(outcome.level, 5);
    assert!(outcome.leveled_up);

    let user = repo.get_user(&user_id).await.unwrap().unwrap();
    assert_eq!(user.total_xp, 455);
    assert_eq!(repo.unlocked_achievements(&user_id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn malformed_identifiers_write_nothing() {
    let (repo, services) = setup(&[("u1", 0)]).await;

    let bad = question("u1", "q 1", Difficulty::Beginner, 100.0);
    let err = services.progress().record_completion(&bad).await.unwrap_err();
    assert!(matches!(err, ProgressServiceError::Validation(_)));
    assert!(!err.is_retryable());

    let records = repo
        .progress_for_user(&UserId::new("u1").unwrap())
        .await
        .unwrap();
    assert!(records.is_empty());
}

#[tokio::test]
async fn unknown_user_is_rejected() {
    let (_repo, services) = setup(&[]).await;
    let err = services
        .progress()
        .record_completion(&question("ghost", "q1", Difficulty::Beginner, 100.0))
        .await
        .unwrap_err();
    assert!(matches!(err, ProgressServiceError::UnknownUser(_)));
}

#[tokio::test]
async fn ids_shaped_like_group_names_are_ordinary_items() {
    let (repo, services) = setup(&[("u1", 0)]).await;
    for id in ["card-a", "flashcard-topic-topic-1"] {
        repo.upsert_content(&ContentItem {
            id: ContentId::new(id).unwrap(),
            content_type: ContentType::Flashcard,
            topic_id: TopicId::new("topic-1").unwrap(),
            subject_id: SubjectId::new("subject-1").unwrap(),
            section_id: None,
            difficulty: Difficulty::Beginner,
        })
        .await
        .unwrap();
    }

    let first = services
        .progress()
        .record_completion(&flashcard("u1", "flashcard-topic-topic-1"))
        .await
        .unwrap();
    assert_eq!(first.classification, RewardClass::FirstTime);
    assert!(first.bonus.is_none());

    let second = services
        .progress()
        .record_completion(&flashcard("u1", "card-a"))
        .await
        .unwrap();
    assert_eq!(second.xp.bonus, 10);
    assert!(second.bonus.is_some());
}

#[tokio::test]
async fn longest_group_ids_still_pay_bonuses() {
    let (repo, services) = setup(&[("u1", 0)]).await;
    let long = "x".repeat(MAX_KEY_LEN);
    repo.upsert_content(&ContentItem {
        id: ContentId::new("card-1").unwrap(),
        content_type: ContentType::Flashcard,
        topic_id: TopicId::new(long.clone()).unwrap(),
        subject_id: SubjectId::new("subject-1").unwrap(),
        section_id: None,
        difficulty: Difficulty::Beginner,
    })
    .await
    .unwrap();
    repo.upsert_content(&ContentItem {
        id: ContentId::new("q1").unwrap(),
        content_type: ContentType::Question,
        topic_id: TopicId::new("topic-1").unwrap(),
        subject_id: SubjectId::new("subject-1").unwrap(),
        section_id: Some(SectionId::new(long.clone()).unwrap()),
        difficulty: Difficulty::Beginner,
    })
    .await
    .unwrap();

    let mut card = flashcard("u1", "card-1");
    card.topic_id.clone_from(&long);
    let outcome = services.progress().record_completion(&card).await.unwrap();
    assert_eq!(outcome.xp.bonus, 10);

    let mut q = question("u1", "q1", Difficulty::Beginner, 100.0);
    q.section_id = Some(long);
    let outcome = services.progress().record_completion(&q).await.unwrap();
    assert_eq!(outcome.xp.bonus, 25);
}

/// Catalog whose group lookup fails until `healthy` is set.
struct FlakyCatalog {
    inner: InMemoryRepository,
    healthy: AtomicBool,
}

#[async_trait]
impl ContentCatalog for FlakyCatalog {
    async fn upsert_content(&self, item: &ContentItem) -> Result<(), StorageError> {
        self.inner.upsert_content(item).await
    }

    async fn group_members(&self, scope: &BonusScope) -> Result<HashSet<ContentId>, StorageError> {
        if !self.healthy.swap(true, Ordering::SeqCst) {
            return Err(StorageError::Connection("catalog unavailable".into()));
        }
        self.inner.group_members(scope).await
    }
}

#[tokio::test]
async fn bonus_missed_after_commit_is_paid_on_retry() {
    let (repo, _services) = setup(&[("u1", 0)]).await;
    register_flashcards(&repo, 1).await;

    let progress: Arc<dyn ProgressRepository> = Arc::new(repo.clone());
    let catalog = Arc::new(FlakyCatalog {
        inner: repo.clone(),
        healthy: AtomicBool::new(false),
    });
    let service = ProgressService::new(
        fixed_clock(),
        Arc::new(RewardsConfig::default()),
        progress.clone(),
        BonusDetector::new(progress.clone(), catalog),
        AchievementService::new(Arc::new(repo.clone()), progress),
    );
    let user_id = UserId::new("u1").unwrap();

    let first = service
        .record_completion(&flashcard("u1", "card-1"))
        .await
        .unwrap();
    assert_eq!(first.classification, RewardClass::FirstTime);
    assert_eq!(first.xp.base, 2);
    assert!(first.bonus.is_none());
    assert!(first.rewards_pending);
    assert!(first.message.contains("still being settled"));
    let key = ProgressKey::new(
        user_id.clone(),
        ContentId::new("card-1").unwrap(),
        ContentType::Flashcard,
    );
    assert!(repo.get_progress(&key).await.unwrap().is_some());

    // Same day: no base XP, but the missed bonus is settled.
    let retry = service
        .record_completion(&flashcard("u1", "card-1"))
        .await
        .unwrap();
    assert_eq!(retry.classification, RewardClass::None);
    assert_eq!(retry.xp.bonus, 10);
    assert!(!retry.rewards_pending);

    let user = repo.get_user(&user_id).await.unwrap().unwrap();
    assert_eq!(user.total_xp, first.xp.total() + retry.xp.total());
    assert_eq!(repo.count_bonus_claims(&user_id).await.unwrap(), 1);
}

#[tokio::test]
async fn total_xp_is_the_sum_of_all_credits() {
    let (repo, services) = setup(&[("u1", 0)]).await;
    register_flashcards(&repo, 3).await;

    let mut credited = 0;
    for day in 0..4 {
        let svc = on_day(&services, day);
        for i in 1..=3 {
            let outcome = svc
                .record_completion(&flashcard("u1", &format!("card-{i}")))
                .await
                .unwrap();
            credited += outcome.xp.total();
            assert_eq!(outcome.total_xp, credited);
        }
    }

    let user = repo.get_user(&UserId::new("u1").unwrap()).await.unwrap().unwrap();
    assert_eq!(user.total_xp, credited);
    assert_eq!(user.current_streak, 4);
    assert_eq!(user.longest_streak, 4);
}
