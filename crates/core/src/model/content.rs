use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::model::ids::{ContentId, SectionId, SubjectId, TopicId};

//
// ─── ERRORS ───────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContentParseError {
    #[error("unknown content type: {0}")]
    ContentType(String),
    #[error("unknown difficulty: {0}")]
    Difficulty(String),
}

//
// ─── CONTENT TYPE ─────────────────────────────────────────────────────────────
//

/// Kind of learning content a progress record tracks.
///
/// `Section` completions are tracked but earn no XP of their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Question,
    Flashcard,
    Media,
    Section,
}

impl ContentType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::Question => "question",
            ContentType::Flashcard => "flashcard",
            ContentType::Media => "media",
            ContentType::Section => "section",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = ContentParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "question" => Ok(Self::Question),
            "flashcard" => Ok(Self::Flashcard),
            "media" => Ok(Self::Media),
            "section" => Ok(Self::Section),
            other => Err(ContentParseError::ContentType(other.to_owned())),
        }
    }
}

//
// ─── DIFFICULTY ───────────────────────────────────────────────────────────────
//

/// Author-assigned difficulty of a content item; scales base XP and bonuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Beginner,
    Intermediate,
    Advanced,
    Expert,
}

impl Difficulty {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Difficulty::Beginner => "beginner",
            Difficulty::Intermediate => "intermediate",
            Difficulty::Advanced => "advanced",
            Difficulty::Expert => "expert",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = ContentParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "beginner" => Ok(Self::Beginner),
            "intermediate" => Ok(Self::Intermediate),
            "advanced" => Ok(Self::Advanced),
            "expert" => Ok(Self::Expert),
            _ => Err(ContentParseError::Difficulty(s.to_owned())),
        }
    }
}

//
// ─── COMPLETION PAYLOAD ───────────────────────────────────────────────────────
//

/// How well a flashcard is known after the interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mastery {
    New,
    Learning,
    Reviewing,
    Mastered,
}

/// Content-specific payload attached to a completion event.
///
/// The variant determines the content type, so an event can never claim to be
/// a flashcard while carrying media data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CompletionData {
    Question {
        difficulty: Difficulty,
        correct_answers: u32,
        total_answers: u32,
    },
    Flashcard {
        difficulty: Difficulty,
        mastery: Mastery,
    },
    Media {
        difficulty: Difficulty,
        watched_seconds: u32,
        duration_seconds: u32,
    },
    Section {
        difficulty: Difficulty,
    },
}

impl CompletionData {
    #[must_use]
    pub fn content_type(&self) -> ContentType {
        match self {
            CompletionData::Question { .. } => ContentType::Question,
            CompletionData::Flashcard { .. } => ContentType::Flashcard,
            CompletionData::Media { .. } => ContentType::Media,
            CompletionData::Section { .. } => ContentType::Section,
        }
    }

    #[must_use]
    pub fn difficulty(&self) -> Difficulty {
        match self {
            CompletionData::Question { difficulty, .. }
            | CompletionData::Flashcard { difficulty, .. }
            | CompletionData::Media { difficulty, .. }
            | CompletionData::Section { difficulty } => *difficulty,
        }
    }
}

//
// ─── CATALOG ITEM ─────────────────────────────────────────────────────────────
//

/// Catalog entry for a content item, used to resolve bonus groups.
///
/// Content itself is authored elsewhere; this is the slice of it the reward
/// engine needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: ContentId,
    pub content_type: ContentType,
    pub topic_id: TopicId,
    pub subject_id: SubjectId,
    pub section_id: Option<SectionId>,
    pub difficulty: Difficulty,
}
