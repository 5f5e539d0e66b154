use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Longest identifier accepted as a storage key.
pub const MAX_KEY_LEN: usize = 64;

/// Error returned when a string is not a well-formed key.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("{kind} must not be empty")]
    Empty { kind: &'static str },

    #[error("{kind} is longer than {} characters", MAX_KEY_LEN)]
    TooLong { kind: &'static str },

    #[error("{kind} contains invalid character {found:?}")]
    InvalidChar { kind: &'static str, found: char },
}

fn validate_key(kind: &'static str, raw: &str) -> Result<(), IdError> {
    if raw.is_empty() {
        return Err(IdError::Empty { kind });
    }
    if raw.len() > MAX_KEY_LEN {
        return Err(IdError::TooLong { kind });
    }
    if let Some(found) = raw
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
    {
        return Err(IdError::InvalidChar { kind, found });
    }
    Ok(())
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Validates and wraps a raw key.
            ///
            /// # Errors
            ///
            /// Returns `IdError` if the key is empty, too long, or contains characters
            /// outside `[A-Za-z0-9_-]`.
            pub fn new(raw: impl Into<String>) -> Result<Self, IdError> {
                let raw = raw.into();
                validate_key(stringify!($name), &raw)?;
                Ok(Self(raw))
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> String {
                id.0
            }
        }
    };
}

string_id!(
    /// Unique identifier for a learner account.
    UserId
);
string_id!(
    /// Identifier of a question, flashcard, or media item.
    ContentId
);
string_id!(
    /// Identifier of a topic (grouping for flashcards and media).
    TopicId
);
string_id!(
    /// Identifier of a subject (top-level grouping above topics).
    SubjectId
);
string_id!(
    /// Identifier of a section (grouping for questions).
    SectionId
);

// ─── Tests ─────────────────────────────────────────────────────────────────────
