use chrono::NaiveDate;
use rewards_core::leveling::{LevelChange, level_for_xp};
use rewards_core::model::{UserId, next_streak};
use sqlx::{Row, SqliteConnection};

use super::mapping::{conn, i64_to_u32, i64_to_u64, ser, u64_to_i64};
use crate::repository::{CreditReceipt, StorageError};

/// Adds `xp` to a user inside an open transaction.
///
/// Callers issue their own write first so the transaction already holds the
/// database write lock when the user row is read.
pub(super) async fn credit_user(
    tx: &mut SqliteConnection,
    user_id: &UserId,
    xp: u64,
    activity_on: Option<NaiveDate>,
) -> Result<CreditReceipt, StorageError> {
    let row = sqlx::query(
        r"
        SELECT total_xp, current_streak, longest_streak, last_active_on
        FROM users
        WHERE id = ?1
        ",
    )
    .bind(user_id.as_str())
    .fetch_optional(&mut *tx)
    .await
    .map_err(conn)?
    .ok_or(StorageError::NotFound)?;

    let previous_total = i64_to_u64("total_xp", row.try_get("total_xp").map_err(ser)?)?;
    let mut current_streak =
        i64_to_u32("current_streak", row.try_get("current_streak").map_err(ser)?)?;
    let mut longest_streak =
        i64_to_u32("longest_streak", row.try_get("longest_streak").map_err(ser)?)?;
    let mut last_active_on: Option<NaiveDate> = row.try_get("last_active_on").map_err(ser)?;

    let new_total = previous_total.saturating_add(xp);
    if let Some(day) = activity_on {
        current_streak = next_streak(last_active_on, current_streak, day);
        longest_streak = longest_streak.max(current_streak);
        last_active_on = Some(day);
    }

    sqlx::query(
        r"
        UPDATE users
        SET total_xp = ?2, level = ?3, current_streak = ?4, longest_streak = ?5,
            last_active_on = ?6
        WHERE id = ?1
        ",
    )
    .bind(user_id.as_str())
    .bind(u64_to_i64("total_xp", new_total)?)
    .bind(i64::from(level_for_xp(new_total)))
    .bind(i64::from(current_streak))
    .bind(i64::from(longest_streak))
    .bind(last_active_on)
    .execute(&mut *tx)
    .await
    .map_err(conn)?;

    Ok(CreditReceipt {
        previous_total,
        new_total,
        level: LevelChange::between(previous_total, new_total),
        current_streak,
    })
}
