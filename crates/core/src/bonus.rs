//! Group-completion bonus rules.
//!
//! A group is the set of questions in a section, or the set of flashcards or
//! media items of one topic. Once every member has a completed record the
//! group pays a one-off bonus. Payment is recorded as a claim keyed by
//! `(user, kind, group id, member type)`, stored apart from progress records so
//! no content id can collide with it.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::model::{ContentId, ContentType, Difficulty, Grouping, SectionId, TopicId};

/// Which group a completed item belongs to for bonus purposes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum BonusScope {
    Section { section_id: SectionId },
    Topic {
        topic_id: TopicId,
        content_type: ContentType,
    },
}

impl BonusScope {
    /// Group that an item of `content_type` with `grouping` counts towards, if any.
    ///
    /// Questions outside a section and section records themselves have none.
    #[must_use]
    pub fn for_item(content_type: ContentType, grouping: &Grouping) -> Option<Self> {
        match content_type {
            ContentType::Question => grouping.section_id.clone().map(|section_id| Self::Section {
                section_id,
            }),
            ContentType::Flashcard | ContentType::Media => Some(Self::Topic {
                topic_id: grouping.topic_id.clone(),
                content_type,
            }),
            ContentType::Section => None,
        }
    }

    /// Content type of the items that make up the group.
    #[must_use]
    pub fn member_type(&self) -> ContentType {
        match self {
            BonusScope::Section { .. } => ContentType::Question,
            BonusScope::Topic { content_type, .. } => *content_type,
        }
    }

    /// `"section"` or `"topic"`.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            BonusScope::Section { .. } => "section",
            BonusScope::Topic { .. } => "topic",
        }
    }

    /// Section or topic id of the group.
    #[must_use]
    pub fn group_id(&self) -> &str {
        match self {
            BonusScope::Section { section_id } => section_id.as_str(),
            BonusScope::Topic { topic_id, .. } => topic_id.as_str(),
        }
    }
}

impl std::fmt::Display for BonusScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.member_type(), self.kind(), self.group_id())
    }
}

/// Bonus paid when a whole group is completed.
#[must_use]
pub fn bonus_xp(scope: &BonusScope, difficulty: Difficulty) -> u64 {
    use Difficulty::{Advanced, Beginner, Expert, Intermediate};

    match (scope.member_type(), difficulty) {
        (ContentType::Question, Beginner) => 25,
        (ContentType::Question, Intermediate) => 50,
        (ContentType::Question, Advanced) => 75,
        (ContentType::Question, Expert) => 100,
        (ContentType::Flashcard, Beginner) => 10,
        (ContentType::Flashcard, Intermediate) => 20,
        (ContentType::Flashcard, Advanced) => 30,
        (ContentType::Flashcard, Expert) => 40,
        (ContentType::Media, Beginner) => 20,
        (ContentType::Media, Intermediate) => 30,
        (ContentType::Media, Advanced) => 40,
        (ContentType::Media, Expert) => 50,
        (ContentType::Section, _) => 0,
    }
}

/// True when every member of the group has been completed.
///
/// An empty group is never complete, so an unknown section or topic can never
/// pay a bonus. Completed ids outside the group (stale items) are ignored.
#[must_use]
pub fn is_group_complete(members: &HashSet<ContentId>, completed: &HashSet<ContentId>) -> bool {
    !members.is_empty() && members.iter().all(|id| completed.contains(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MAX_KEY_LEN, SubjectId};

    fn ids(raw: &[&str]) -> HashSet<ContentId> {
        raw.iter().map(|r| ContentId::new(*r).unwrap()).collect()
    }

    fn grouping(section: Option<&str>) -> Grouping {
        Grouping {
            topic_id: TopicId::new("t9").unwrap(),
            subject_id: SubjectId::new("s1").unwrap(),
            section_id: section.map(|s| SectionId::new(s).unwrap()),
        }
    }

    #[test]
    fn question_scope_requires_a_section() {
        assert_eq!(BonusScope::for_item(ContentType::Question, &grouping(None)), None);
        let scope = BonusScope::for_item(ContentType::Question, &grouping(Some("sec1"))).unwrap();
        assert_eq!(scope.kind(), "section");
        assert_eq!(scope.group_id(), "sec1");
        assert_eq!(scope.member_type(), ContentType::Question);
        assert_eq!(scope.to_string(), "question:section:sec1");
    }

    #[test]
    fn topic_groups_are_per_content_type() {
        let cards = BonusScope::for_item(ContentType::Flashcard, &grouping(None)).unwrap();
        let media = BonusScope::for_item(ContentType::Media, &grouping(None)).unwrap();
        assert_eq!(cards.kind(), "topic");
        assert_eq!(cards.group_id(), media.group_id());
        assert_ne!(cards, media);
    }

    #[test]
    fn longest_group_ids_still_form_a_scope() {
        let long = "t".repeat(MAX_KEY_LEN);
        let grouping = Grouping {
            topic_id: TopicId::new(long.clone()).unwrap(),
            subject_id: SubjectId::new("s1").unwrap(),
            section_id: Some(SectionId::new(long.clone()).unwrap()),
        };

        let topic = BonusScope::for_item(ContentType::Media, &grouping).unwrap();
        let section = BonusScope::for_item(ContentType::Question, &grouping).unwrap();
        assert_eq!(topic.group_id(), long);
        assert_eq!(section.group_id(), long);
    }

    #[test]
    fn section_records_have_no_group() {
        assert_eq!(
            BonusScope::for_item(ContentType::Section, &grouping(Some("sec1"))),
            None
        );
    }

    #[test]
    fn completeness_is_a_set_check() {
        let members = ids(&["a", "b", "c"]);
        assert!(!is_group_complete(&members, &ids(&["a", "b"])));
        assert!(is_group_complete(&members, &ids(&["a", "b", "c"])));
        assert!(is_group_complete(
            &members,
            &ids(&["a", "b", "c", "flashcard-topic-t9"])
        ));
    }

    #[test]
    fn empty_group_is_never_complete() {
        assert!(!is_group_complete(&HashSet::new(), &ids(&["a"])));
    }

    #[test]
    fn bonus_scales_with_difficulty() {
        let scope = BonusScope::Section {
            section_id: SectionId::new("sec1").unwrap(),
        };
        assert!(bonus_xp(&scope, Difficulty::Expert) > bonus_xp(&scope, Difficulty::Beginner));
    }
}
