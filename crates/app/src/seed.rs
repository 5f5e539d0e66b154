//! Demo data for local runs.

use rewards_core::model::{CompletionData, Difficulty, Mastery};
use serde::Serialize;
use services::{
    AppServices, CompletionRequest, NewContent, NewUser, RegistrationError, SnapshotRun,
};
use tracing::info;

const LEARNERS: [(&str, &str, Option<&str>); 3] = [
    ("ada", "Ada", Some("Lovelace")),
    ("grace", "Grace", Some("Hopper")),
    ("alan", "Alan", Some("Turing")),
];

const FLASHCARDS: [&str; 4] = ["rust-own-1", "rust-own-2", "rust-own-3", "rust-own-4"];
const QUESTIONS: [&str; 2] = ["rust-borrow-q1", "rust-borrow-q2"];

/// What a seed run added.
#[derive(Debug, Default, Serialize)]
pub struct SeedReport {
    pub users_created: u32,
    pub users_existing: u32,
    pub content_items: u32,
    pub completions: u32,
    pub xp_credited: u64,
    pub snapshot: Option<SnapshotRun>,
}

/// Registers a few learners and a small catalog, then plays some completions.
///
/// Re-running is safe: existing users are kept and repeat completions earn
/// nothing on the same day.
pub async fn run(
    services: &AppServices,
    ranking_secret: Option<&str>,
) -> Result<SeedReport, Box<dyn std::error::Error>> {
    let mut report = SeedReport::default();
    let registration = services.registration();

    let staff = NewUser {
        id: "admin".into(),
        given_name: "Site".into(),
        family_name: Some("Admin".into()),
        role: "admin".into(),
    };
    let learners = LEARNERS.iter().map(|(id, given, family)| NewUser {
        id: (*id).into(),
        given_name: (*given).into(),
        family_name: family.map(str::to_owned),
        role: "learner".into(),
    });

    for user in std::iter::once(staff).chain(learners) {
        match registration.register_user(&user).await {
            Ok(_) => report.users_created += 1,
            Err(RegistrationError::DuplicateUser(_)) => report.users_existing += 1,
            Err(err) => return Err(err.into()),
        }
    }

    for id in FLASHCARDS {
        registration
            .register_content(&NewContent {
                id: id.into(),
                content_type: "flashcard".into(),
                topic_id: "ownership".into(),
                subject_id: "rust".into(),
                section_id: None,
                difficulty: "beginner".into(),
            })
            .await?;
        report.content_items += 1;
    }
    for id in QUESTIONS {
        registration
            .register_content(&NewContent {
                id: id.into(),
                content_type: "question".into(),
                topic_id: "borrowing".into(),
                subject_id: "rust".into(),
                section_id: Some("borrowing-basics".into()),
                difficulty: "intermediate".into(),
            })
            .await?;
        report.content_items += 1;
    }

    // Ada finishes the flashcard topic, Grace the question section, Alan dabbles.
    let mut plays = Vec::new();
    for id in FLASHCARDS {
        plays.push(flashcard("ada", id, 100.0));
    }
    for id in QUESTIONS {
        plays.push(question("grace", id, 90.0));
    }
    plays.push(flashcard("alan", FLASHCARDS[0], 70.0));
    plays.push(question("alan", QUESTIONS[0], 0.0));

    let progress = services.progress();
    for play in &plays {
        let outcome = progress.record_completion(play).await?;
        report.completions += 1;
        report.xp_credited += outcome.xp.total();
    }

    report.snapshot = Some(services.ranking().run(ranking_secret).await?);
    info!(
        users = report.users_created,
        completions = report.completions,
        xp = report.xp_credited,
        "seed finished"
    );
    Ok(report)
}

fn flashcard(user: &str, id: &str, score: f64) -> CompletionRequest {
    CompletionRequest {
        user_id: user.into(),
        content_id: id.into(),
        topic_id: "ownership".into(),
        subject_id: "rust".into(),
        section_id: None,
        completed: true,
        score,
        time_spent_secs: 12,
        data: CompletionData::Flashcard {
            difficulty: Difficulty::Beginner,
            mastery: Mastery::Reviewing,
        },
    }
}

fn question(user: &str, id: &str, score: f64) -> CompletionRequest {
    CompletionRequest {
        user_id: user.into(),
        content_id: id.into(),
        topic_id: "borrowing".into(),
        subject_id: "rust".into(),
        section_id: Some("borrowing-basics".into()),
        completed: true,
        score,
        time_spent_secs: 45,
        data: CompletionData::Question {
            difficulty: Difficulty::Intermediate,
            correct_answers: u32::from(score > 0.0),
            total_answers: 1,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rewards_core::time::fixed_clock;
    use services::RewardsConfig;

    #[tokio::test]
    async fn seeding_twice_is_harmless() {
        let services = AppServices::in_memory(fixed_clock(), RewardsConfig::default());

        let first = run(&services, None).await.unwrap();
        assert_eq!(first.users_created, 4);
        assert!(first.xp_credited > 0);
        assert!(matches!(first.snapshot, Some(SnapshotRun::Created { ranked_users: 3, .. })));

        let second = run(&services, None).await.unwrap();
        assert_eq!(second.users_created, 0);
        assert_eq!(second.users_existing, 4);
        assert_eq!(second.xp_credited, 0);
        assert!(matches!(second.snapshot, Some(SnapshotRun::AlreadyTaken { .. })));
    }
}
