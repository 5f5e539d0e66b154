use rewards_core::model::UserId;
use rewards_core::ranking::RankCandidate;
use sqlx::Row;

use super::SqliteRepository;
use super::mapping::{conn, i64_to_u32, i64_to_u64, key, ser, u64_to_i64};
use crate::repository::{StandingRow, StandingsRepository, StorageError};

fn map_candidate(row: &sqlx::sqlite::SqliteRow) -> Result<RankCandidate, StorageError> {
    Ok(RankCandidate {
        user_id: key::<UserId>(row, "id")?,
        total_xp: i64_to_u64("total_xp", row.try_get("total_xp").map_err(ser)?)?,
        level: i64_to_u32("level", row.try_get("level").map_err(ser)?)?,
        streak: i64_to_u32("current_streak", row.try_get("current_streak").map_err(ser)?)?,
    })
}

#[async_trait::async_trait]
impl StandingsRepository for SqliteRepository {
    async fn all_standings(&self) -> Result<Vec<RankCandidate>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT id, total_xp, level, current_streak
            FROM users
            WHERE role = 'learner'
            ",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        rows.iter().map(map_candidate).collect()
    }

    async fn count_standings(&self) -> Result<u64, StorageError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE role = 'learner'")
            .fetch_one(&self.pool)
            .await
            .map_err(conn)?;
        i64_to_u64("learner count", n)
    }

    async fn standings_page(
        &self,
        offset: u64,
        limit: u32,
    ) -> Result<Vec<StandingRow>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT id, given_name, family_name, total_xp, level, current_streak
            FROM users
            WHERE role = 'learner'
            ORDER BY total_xp DESC, id ASC
            LIMIT ?1 OFFSET ?2
            ",
        )
        .bind(i64::from(limit))
        .bind(u64_to_i64("offset", offset)?)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(StandingRow {
                candidate: map_candidate(&row)?,
                given_name: row.try_get("given_name").map_err(ser)?,
                family_name: row.try_get("family_name").map_err(ser)?,
            });
        }
        Ok(out)
    }

    async fn count_ahead(&self, total_xp: u64, user_id: &UserId) -> Result<u64, StorageError> {
        // Same total order as the snapshot: XP descending, then id ascending.
        let n: i64 = sqlx::query_scalar(
            r"
            SELECT COUNT(*)
            FROM users
            WHERE role = 'learner'
              AND (total_xp > ?1 OR (total_xp = ?1 AND id < ?2))
            ",
        )
        .bind(u64_to_i64("total_xp", total_xp)?)
        .bind(user_id.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(conn)?;
        i64_to_u64("ahead count", n)
    }
}
