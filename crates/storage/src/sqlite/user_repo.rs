use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use rewards_core::model::{RankHistoryEntry, Role, User, UserId};
use sqlx::Row;

use super::SqliteRepository;
use super::credit::credit_user;
use super::mapping::{conn, i64_to_u32, i64_to_u64, key, ser, u64_to_i64, write_err};
use crate::repository::{CreditReceipt, StorageError, UserRepository};

fn map_user_row(
    row: &sqlx::sqlite::SqliteRow,
    rank_history: Vec<RankHistoryEntry>,
) -> Result<User, StorageError> {
    let role: String = row.try_get("role").map_err(ser)?;
    Ok(User {
        id: key::<UserId>(row, "id")?,
        given_name: row.try_get("given_name").map_err(ser)?,
        family_name: row.try_get("family_name").map_err(ser)?,
        role: role.parse::<Role>().map_err(ser)?,
        total_xp: i64_to_u64("total_xp", row.try_get("total_xp").map_err(ser)?)?,
        level: i64_to_u32("level", row.try_get("level").map_err(ser)?)?,
        current_streak: i64_to_u32("current_streak", row.try_get("current_streak").map_err(ser)?)?,
        longest_streak: i64_to_u32("longest_streak", row.try_get("longest_streak").map_err(ser)?)?,
        last_active_on: row.try_get("last_active_on").map_err(ser)?,
        rank_history,
        created_at: row.try_get("created_at").map_err(ser)?,
    })
}

#[async_trait::async_trait]
impl UserRepository for SqliteRepository {
    async fn insert_user(&self, user: &User) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(conn)?;

        sqlx::query(
            r"
            INSERT INTO users (
                id, given_name, family_name, role, total_xp, level,
                current_streak, longest_streak, last_active_on, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ",
        )
        .bind(user.id.as_str())
        .bind(&user.given_name)
        .bind(user.family_name.as_deref())
        .bind(user.role.as_str())
        .bind(u64_to_i64("total_xp", user.total_xp)?)
        .bind(i64::from(user.level))
        .bind(i64::from(user.current_streak))
        .bind(i64::from(user.longest_streak))
        .bind(user.last_active_on)
        .bind(user.created_at)
        .execute(&mut *tx)
        .await
        .map_err(write_err)?;

        for entry in &user.rank_history {
            sqlx::query(
                r"
                INSERT INTO user_rank_history (user_id, date, rank, total_xp)
                VALUES (?1, ?2, ?3, ?4)
                ",
            )
            .bind(user.id.as_str())
            .bind(entry.date)
            .bind(i64::from(entry.rank))
            .bind(u64_to_i64("total_xp", entry.total_xp)?)
            .execute(&mut *tx)
            .await
            .map_err(write_err)?;
        }

        tx.commit().await.map_err(conn)?;
        Ok(())
    }

    async fn get_user(&self, id: &UserId) -> Result<Option<User>, StorageError> {
        let Some(row) = sqlx::query(
            r"
            SELECT id, given_name, family_name, role, total_xp, level,
                   current_streak, longest_streak, last_active_on, created_at
            FROM users
            WHERE id = ?1
            ",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?
        else {
            return Ok(None);
        };

        let history_rows = sqlx::query(
            r"
            SELECT date, rank, total_xp
            FROM user_rank_history
            WHERE user_id = ?1
            ORDER BY date ASC
            ",
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let mut history = Vec::with_capacity(history_rows.len());
        for h in history_rows {
            let date: NaiveDate = h.try_get("date").map_err(ser)?;
            history.push(RankHistoryEntry {
                date,
                rank: i64_to_u32("rank", h.try_get("rank").map_err(ser)?)?,
                total_xp: i64_to_u64("total_xp", h.try_get("total_xp").map_err(ser)?)?,
            });
        }

        map_user_row(&row, history).map(Some)
    }

    async fn delete_user(&self, id: &UserId) -> Result<(), StorageError> {
        // Progress, achievements and rank history go with the user (ON DELETE CASCADE).
        let res = sqlx::query("DELETE FROM users WHERE id = ?1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(conn)?;

        if res.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn unlocked_achievements(&self, id: &UserId) -> Result<HashSet<String>, StorageError> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT achievement_id FROM user_achievements WHERE user_id = ?1")
                .bind(id.as_str())
                .fetch_all(&self.pool)
                .await
                .map_err(conn)?;
        Ok(ids.into_iter().collect())
    }

    async fn unlock_achievement(
        &self,
        id: &UserId,
        achievement_id: &str,
        xp: u64,
        unlocked_at: DateTime<Utc>,
    ) -> Result<Option<CreditReceipt>, StorageError> {
        let mut tx = self.pool.begin().await.map_err(conn)?;

        let inserted = sqlx::query(
            r"
            INSERT INTO user_achievements (user_id, achievement_id, unlocked_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(user_id, achievement_id) DO NOTHING
            ",
        )
        .bind(id.as_str())
        .bind(achievement_id)
        .bind(unlocked_at)
        .execute(&mut *tx)
        .await
        .map_err(write_err)?
        .rows_affected();

        if inserted == 0 {
            tx.rollback().await.map_err(conn)?;
            return Ok(None);
        }

        let credit = credit_user(&mut tx, id, xp, None).await?;
        tx.commit().await.map_err(conn)?;
        Ok(Some(credit))
    }
}
