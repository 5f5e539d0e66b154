//! Shared error types for the services crate.

use thiserror::Error;

use rewards_core::model::{ContentParseError, IdError, ProgressError, UserError, UserId};
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

/// Errors emitted by `ProgressService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProgressServiceError {
    /// The request was rejected before anything was written.
    #[error("invalid completion: {0}")]
    Validation(#[from] rewards_core::Error),
    #[error("unknown user {0}")]
    UnknownUser(UserId),
    /// Every compare-and-swap attempt lost against a concurrent writer.
    #[error("progress record still contended after {attempts} attempts")]
    Contention { attempts: u32 },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<IdError> for ProgressServiceError {
    fn from(err: IdError) -> Self {
        Self::Validation(err.into())
    }
}

impl From<ProgressError> for ProgressServiceError {
    fn from(err: ProgressError) -> Self {
        Self::Validation(err.into())
    }
}

impl ProgressServiceError {
    /// Whether the caller may resubmit the same event.
    ///
    /// Safe because a resubmission re-classifies against the stored record.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Contention { .. } | Self::Storage(StorageError::Connection(_))
        )
    }
}

/// Errors emitted by `RankingJob`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RankingJobError {
    #[error("ranking trigger rejected: secret missing or wrong")]
    Unauthorized,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `LeaderboardService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LeaderboardError {
    #[error("invalid page {page} with page size {page_size} (max {max_page_size})")]
    InvalidPage {
        page: u32,
        page_size: u32,
        max_page_size: u32,
    },
    #[error("leaderboard unavailable: {0}")]
    Unavailable(#[from] StorageError),
}

impl LeaderboardError {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Errors emitted by `RegistrationService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RegistrationError {
    #[error("user {0} already exists")]
    DuplicateUser(UserId),
    #[error(transparent)]
    Validation(#[from] rewards_core::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<IdError> for RegistrationError {
    fn from(err: IdError) -> Self {
        Self::Validation(err.into())
    }
}

impl From<UserError> for RegistrationError {
    fn from(err: UserError) -> Self {
        Self::Validation(err.into())
    }
}

impl From<ContentParseError> for RegistrationError {
    fn from(err: ContentParseError) -> Self {
        Self::Validation(err.into())
    }
}

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
