use thiserror::Error;

use crate::model::{ContentParseError, IdError, ProgressError, UserError};

/// Any domain validation failure.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Id(#[from] IdError),
    #[error(transparent)]
    Content(#[from] ContentParseError),
    #[error(transparent)]
    Progress(#[from] ProgressError),
    #[error(transparent)]
    User(#[from] UserError),
}
