pub mod content;
mod ids;
mod progress;
mod snapshot;
mod user;

pub use content::{
    CompletionData, ContentItem, ContentParseError, ContentType, Difficulty, Mastery,
};
pub use ids::{ContentId, IdError, MAX_KEY_LEN, SectionId, SubjectId, TopicId, UserId};
pub use progress::{
    CompletionEvent, Grouping, ProgressError, ProgressKey, ProgressRecord, RewardState,
};
pub use snapshot::{DailyRankSnapshot, RankChange, RankChangeType, SnapshotEntry};
pub use user::{
    RankHistoryEntry, Role, User, UserError, display_name, next_streak, push_rank_history,
};
