use chrono::NaiveDate;
use rewards_core::model::{DailyRankSnapshot, RankChange, RankChangeType, SnapshotEntry, UserId};
use sqlx::Row;

use super::SqliteRepository;
use super::mapping::{conn, i64_to_u32, i64_to_u64, key, ser, u64_to_i64};
use crate::repository::{SnapshotCommit, SnapshotRepository, StorageError};

fn map_entry_row(row: &sqlx::sqlite::SqliteRow) -> Result<SnapshotEntry, StorageError> {
    let previous_rank: Option<i64> = row.try_get("previous_rank").map_err(ser)?;
    let kind: String = row.try_get("rank_change_type").map_err(ser)?;

    Ok(SnapshotEntry {
        user_id: key::<UserId>(row, "user_id")?,
        rank: i64_to_u32("rank", row.try_get("rank").map_err(ser)?)?,
        total_xp: i64_to_u64("total_xp", row.try_get("total_xp").map_err(ser)?)?,
        level: i64_to_u32("level", row.try_get("level").map_err(ser)?)?,
        streak: i64_to_u32("streak", row.try_get("streak").map_err(ser)?)?,
        change: RankChange {
            previous_rank: previous_rank
                .map(|r| i64_to_u32("previous_rank", r))
                .transpose()?,
            delta: row.try_get("rank_change").map_err(ser)?,
            kind: kind.parse::<RankChangeType>().map_err(ser)?,
        },
    })
}

#[async_trait::async_trait]
impl SnapshotRepository for SqliteRepository {
    async fn snapshot_exists(&self, date: NaiveDate) -> Result<bool, StorageError> {
        let row = sqlx::query("SELECT 1 FROM rank_snapshots WHERE date = ?1")
            .bind(date)
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?;
        Ok(row.is_some())
    }

    async fn get_snapshot(
        &self,
        date: NaiveDate,
    ) -> Result<Option<DailyRankSnapshot>, StorageError> {
        let Some(header) = sqlx::query("SELECT date, created_at FROM rank_snapshots WHERE date = ?1")
            .bind(date)
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?
        else {
            return Ok(None);
        };

        let rows = sqlx::query(
            r"
            SELECT user_id, rank, total_xp, level, streak, previous_rank, rank_change,
                   rank_change_type
            FROM rank_snapshot_entries
            WHERE date = ?1
            ORDER BY rank ASC
            ",
        )
        .bind(date)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let mut rankings = Vec::with_capacity(rows.len());
        for row in rows {
            rankings.push(map_entry_row(&row)?);
        }

        Ok(Some(DailyRankSnapshot {
            date: header.try_get("date").map_err(ser)?,
            created_at: header.try_get("created_at").map_err(ser)?,
            rankings,
        }))
    }

    async fn commit_snapshot(
        &self,
        snapshot: &DailyRankSnapshot,
        history_limit: u32,
        prune_through: NaiveDate,
    ) -> Result<SnapshotCommit, StorageError> {
        let mut tx = self.pool.begin().await.map_err(conn)?;

        let inserted = sqlx::query(
            r"
            INSERT INTO rank_snapshots (date, created_at)
            VALUES (?1, ?2)
            ON CONFLICT(date) DO NOTHING
            ",
        )
        .bind(snapshot.date)
        .bind(snapshot.created_at)
        .execute(&mut *tx)
        .await
        .map_err(conn)?
        .rows_affected();

        if inserted == 0 {
            tx.rollback().await.map_err(conn)?;
            return Ok(SnapshotCommit::default());
        }

        let mut history_entries = 0_u32;
        for entry in &snapshot.rankings {
            let total_xp = u64_to_i64("total_xp", entry.total_xp)?;

            sqlx::query(
                r"
                INSERT INTO rank_snapshot_entries (
                    date, user_id, rank, total_xp, level, streak,
                    previous_rank, rank_change, rank_change_type
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                ",
            )
            .bind(snapshot.date)
            .bind(entry.user_id.as_str())
            .bind(i64::from(entry.rank))
            .bind(total_xp)
            .bind(i64::from(entry.level))
            .bind(i64::from(entry.streak))
            .bind(entry.change.previous_rank.map(i64::from))
            .bind(entry.change.delta)
            .bind(entry.change.kind.as_str())
            .execute(&mut *tx)
            .await
            .map_err(conn)?;

            // Users deleted since the standings were read get no history row.
            let written = sqlx::query(
                r"
                INSERT INTO user_rank_history (user_id, date, rank, total_xp)
                SELECT ?1, ?2, ?3, ?4
                WHERE EXISTS (SELECT 1 FROM users WHERE id = ?1)
                ON CONFLICT(user_id, date) DO UPDATE SET
                    rank = excluded.rank,
                    total_xp = excluded.total_xp
                ",
            )
            .bind(entry.user_id.as_str())
            .bind(snapshot.date)
            .bind(i64::from(entry.rank))
            .bind(total_xp)
            .execute(&mut *tx)
            .await
            .map_err(conn)?
            .rows_affected();

            if written > 0 {
                history_entries += 1;
            }
        }

        sqlx::query(
            r"
            DELETE FROM user_rank_history
            WHERE rowid IN (
                SELECT rid FROM (
                    SELECT rowid AS rid,
                           ROW_NUMBER() OVER (PARTITION BY user_id ORDER BY date DESC) AS pos
                    FROM user_rank_history
                )
                WHERE pos > ?1
            )
            ",
        )
        .bind(i64::from(history_limit))
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        // Entries follow their snapshot (ON DELETE CASCADE).
        let pruned = sqlx::query("DELETE FROM rank_snapshots WHERE date <= ?1")
            .bind(prune_through)
            .execute(&mut *tx)
            .await
            .map_err(conn)?
            .rows_affected();

        tx.commit().await.map_err(conn)?;

        Ok(SnapshotCommit {
            inserted: true,
            history_entries,
            pruned_snapshots: u32::try_from(pruned).unwrap_or(u32::MAX),
        })
    }
}
