use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rewards_core::model::{
    CompletionData, ContentId, ContentType, Grouping, ProgressKey, ProgressRecord, RewardState,
    SectionId, SubjectId, TopicId, UserId,
};
use sqlx::Row;

use crate::repository::StorageError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn conn<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

/// Maps constraint violations on writes to their domain meaning.
pub(crate) fn write_err(e: sqlx::Error) -> StorageError {
    let (unique, foreign_key) = e.as_database_error().map_or((false, false), |db| {
        (db.is_unique_violation(), db.is_foreign_key_violation())
    });
    if unique {
        StorageError::Conflict
    } else if foreign_key {
        StorageError::NotFound
    } else {
        conn(e)
    }
}

pub(crate) fn u64_to_i64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

pub(crate) fn i64_to_u64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} sign overflow")))
}

pub(crate) fn i64_to_u32(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

/// Parses a validated key column into its id type.
pub(crate) fn key<T>(row: &sqlx::sqlite::SqliteRow, column: &str) -> Result<T, StorageError>
where
    T: FromStr,
    T::Err: core::fmt::Display,
{
    let raw: String = row.try_get(column).map_err(ser)?;
    raw.parse::<T>().map_err(ser)
}

pub(crate) fn optional_key<T>(
    row: &sqlx::sqlite::SqliteRow,
    column: &str,
) -> Result<Option<T>, StorageError>
where
    T: FromStr,
    T::Err: core::fmt::Display,
{
    let raw: Option<String> = row.try_get(column).map_err(ser)?;
    raw.map(|r| r.parse::<T>().map_err(ser)).transpose()
}

pub(crate) fn parse_content_type(raw: &str) -> Result<ContentType, StorageError> {
    raw.parse::<ContentType>().map_err(ser)
}

pub(crate) fn data_to_json(data: Option<&CompletionData>) -> Result<Option<String>, StorageError> {
    data.map(|d| serde_json::to_string(d).map_err(ser)).transpose()
}

pub(crate) fn map_progress_row(row: &sqlx::sqlite::SqliteRow) -> Result<ProgressRecord, StorageError> {
    let content_type_str: String = row.try_get("content_type").map_err(ser)?;

    let first_completed_at: Option<DateTime<Utc>> =
        row.try_get("first_completed_at").map_err(ser)?;
    let first_completed_on: Option<NaiveDate> = row.try_get("first_completed_on").map_err(ser)?;
    let last_daily_on: Option<NaiveDate> = row.try_get("last_daily_on").map_err(ser)?;
    let reward = RewardState::from_persisted(first_completed_at, first_completed_on, last_daily_on)
        .map_err(ser)?;

    let data: Option<String> = row.try_get("data").map_err(ser)?;
    let data = data
        .map(|raw| serde_json::from_str::<CompletionData>(&raw).map_err(ser))
        .transpose()?;

    Ok(ProgressRecord {
        key: ProgressKey::new(
            key::<UserId>(row, "user_id")?,
            key::<ContentId>(row, "content_id")?,
            parse_content_type(&content_type_str)?,
        ),
        grouping: Grouping {
            topic_id: key::<TopicId>(row, "topic_id")?,
            subject_id: key::<SubjectId>(row, "subject_id")?,
            section_id: optional_key::<SectionId>(row, "section_id")?,
        },
        completed: row.try_get::<bool, _>("completed").map_err(ser)?,
        score: row.try_get("score").map_err(ser)?,
        attempts: i64_to_u32("attempts", row.try_get("attempts").map_err(ser)?)?,
        reward,
        daily_xp_count: i64_to_u32("daily_xp_count", row.try_get("daily_xp_count").map_err(ser)?)?,
        total_xp_earned: i64_to_u64(
            "total_xp_earned",
            row.try_get("total_xp_earned").map_err(ser)?,
        )?,
        time_spent_secs: i64_to_u64(
            "time_spent_secs",
            row.try_get("time_spent_secs").map_err(ser)?,
        )?,
        last_accessed: row.try_get("last_accessed").map_err(ser)?,
        data,
        revision: i64_to_u64("revision", row.try_get("revision").map_err(ser)?)?,
    })
}

pub(crate) const PROGRESS_COLUMNS: &str = r"
    user_id, content_id, content_type, topic_id, subject_id, section_id,
    completed, score, attempts, first_completed_at, first_completed_on, last_daily_on,
    daily_xp_count, total_xp_earned, time_spent_secs, last_accessed, data, revision
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_conversions_reject_out_of_range() {
        assert!(u64_to_i64("x", u64::MAX).is_err());
        assert!(i64_to_u64("x", -1).is_err());
        assert!(i64_to_u32("x", i64::from(u32::MAX) + 1).is_err());
        assert_eq!(i64_to_u32("x", 7).unwrap(), 7);
    }

    #[test]
    fn unknown_content_type_is_a_serialization_error() {
        assert!(matches!(
            parse_content_type("video"),
            Err(StorageError::Serialization(_))
        ));
    }
}
