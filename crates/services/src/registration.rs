use std::sync::Arc;

use serde::Deserialize;
use tracing::info;

use rewards_core::model::{
    ContentId, ContentItem, ContentType, Difficulty, Role, SectionId, SubjectId, TopicId, User,
    UserId,
};
use storage::repository::{ContentCatalog, StorageError, UserRepository};

use crate::Clock;
use crate::error::RegistrationError;

/// A new account as received from a caller.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewUser {
    pub id: String,
    pub given_name: String,
    #[serde(default)]
    pub family_name: Option<String>,
    pub role: String,
}

/// A catalog entry as received from a caller.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewContent {
    pub id: String,
    pub content_type: String,
    pub topic_id: String,
    pub subject_id: String,
    #[serde(default)]
    pub section_id: Option<String>,
    pub difficulty: String,
}

/// Registers users and catalog entries that the reward engine reads.
#[derive(Clone)]
pub struct RegistrationService {
    clock: Clock,
    users: Arc<dyn UserRepository>,
    content: Arc<dyn ContentCatalog>,
}

impl RegistrationService {
    #[must_use]
    pub fn new(
        clock: Clock,
        users: Arc<dyn UserRepository>,
        content: Arc<dyn ContentCatalog>,
    ) -> Self {
        Self {
            clock,
            users,
            content,
        }
    }

    /// Create a user with no XP.
    ///
    /// # Errors
    ///
    /// Returns `RegistrationError::Validation` for malformed input,
    /// `RegistrationError::DuplicateUser` if the id is taken, or storage errors.
    pub async fn register_user(&self, new: &NewUser) -> Result<User, RegistrationError> {
        let id = UserId::new(new.id.as_str())?;
        let role = new.role.parse::<Role>()?;
        let user = User::new(
            id,
            new.given_name.as_str(),
            new.family_name.clone(),
            role,
            self.clock.now(),
        )?;

        match self.users.insert_user(&user).await {
            Ok(()) => {
                info!(user = %user.id, role = %user.role, "user registered");
                Ok(user)
            }
            Err(StorageError::Conflict) => Err(RegistrationError::DuplicateUser(user.id)),
            Err(err) => Err(err.into()),
        }
    }

    /// Insert or replace a catalog entry.
    ///
    /// # Errors
    ///
    /// Returns `RegistrationError::Validation` for malformed input, or storage errors.
    pub async fn register_content(
        &self,
        new: &NewContent,
    ) -> Result<ContentItem, RegistrationError> {
        let item = ContentItem {
            id: ContentId::new(new.id.as_str())?,
            content_type: new.content_type.parse::<ContentType>()?,
            topic_id: TopicId::new(new.topic_id.as_str())?,
            subject_id: SubjectId::new(new.subject_id.as_str())?,
            section_id: new
                .section_id
                .as_deref()
                .map(SectionId::new)
                .transpose()?,
            difficulty: new.difficulty.parse::<Difficulty>()?,
        };

        self.content.upsert_content(&item).await?;
        info!(
            content = %item.id,
            content_type = %item.content_type,
            topic = %item.topic_id,
            "content registered"
        );
        Ok(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rewards_core::time::fixed_clock;
    use storage::InMemoryRepository;

    fn service(repo: &InMemoryRepository) -> RegistrationService {
        RegistrationService::new(
            fixed_clock(),
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
        )
    }

    fn ada() -> NewUser {
        NewUser {
            id: "ada".into(),
            given_name: "Ada".into(),
            family_name: Some("Lovelace".into()),
            role: "learner".into(),
        }
    }

    #[tokio::test]
    async fn duplicate_user_is_reported() {
        let repo = InMemoryRepository::new();
        let svc = service(&repo);
        let user = svc.register_user(&ada()).await.unwrap();
        assert_eq!(user.display_name(), "Ada L.");
        assert!(matches!(
            svc.register_user(&ada()).await.unwrap_err(),
            RegistrationError::DuplicateUser(_)
        ));
    }

    #[tokio::test]
    async fn malformed_input_is_rejected_before_storage() {
        let repo = InMemoryRepository::new();
        let svc = service(&repo);

        let mut bad = ada();
        bad.role = "wizard".into();
        assert!(matches!(
            svc.register_user(&bad).await.unwrap_err(),
            RegistrationError::Validation(_)
        ));

        let content = NewContent {
            id: "q1".into(),
            content_type: "podcast".into(),
            topic_id: "t1".into(),
            subject_id: "s1".into(),
            section_id: None,
            difficulty: "beginner".into(),
        };
        assert!(svc.register_content(&content).await.is_err());
    }
}
