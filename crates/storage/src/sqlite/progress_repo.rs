use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use rewards_core::bonus::BonusScope;
use rewards_core::model::{ContentId, ProgressKey, ProgressRecord, UserId};

use super::SqliteRepository;
use super::credit::credit_user;
use super::mapping::{
    PROGRESS_COLUMNS, conn, data_to_json, i64_to_u32, key, map_progress_row, u64_to_i64,
    write_err,
};
use crate::repository::{CompletionCommit, CreditReceipt, ProgressRepository, StorageError};

const INSERT_PROGRESS: &str = r"
    INSERT INTO progress (
        user_id, content_id, content_type, topic_id, subject_id, section_id,
        completed, score, attempts, first_completed_at, first_completed_on, last_daily_on,
        daily_xp_count, total_xp_earned, time_spent_secs, last_accessed, data, revision
    )
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
    ON CONFLICT(user_id, content_id, content_type) DO NOTHING
";

// The key and grouping are immutable once a record exists.
const UPDATE_PROGRESS: &str = r"
    UPDATE progress SET
        completed = ?7, score = ?8, attempts = ?9, first_completed_at = ?10,
        first_completed_on = ?11, last_daily_on = ?12, daily_xp_count = ?13,
        total_xp_earned = ?14, time_spent_secs = ?15, last_accessed = ?16, data = ?17,
        revision = ?18
    WHERE user_id = ?1 AND content_id = ?2 AND content_type = ?3
      AND topic_id = ?4 AND subject_id = ?5 AND section_id IS ?6
      AND revision = ?19
";

/// Binds the eighteen record columns in `INSERT_PROGRESS` order.
fn bind_record<'q>(
    sql: &'q str,
    record: &'q ProgressRecord,
    revision: u64,
) -> Result<sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>, StorageError>
{
    Ok(sqlx::query(sql)
        .bind(record.key.user_id.as_str())
        .bind(record.key.content_id.as_str())
        .bind(record.key.content_type.as_str())
        .bind(record.grouping.topic_id.as_str())
        .bind(record.grouping.subject_id.as_str())
        .bind(record.grouping.section_id.as_ref().map(|s| s.as_str().to_owned()))
        .bind(record.completed)
        .bind(record.score)
        .bind(i64::from(record.attempts))
        .bind(record.reward.first_completed_at())
        .bind(record.reward.first_completed_on())
        .bind(record.reward.last_daily_on())
        .bind(i64::from(record.daily_xp_count))
        .bind(u64_to_i64("total_xp_earned", record.total_xp_earned)?)
        .bind(u64_to_i64("time_spent_secs", record.time_spent_secs)?)
        .bind(record.last_accessed)
        .bind(data_to_json(record.data.as_ref())?)
        .bind(u64_to_i64("revision", revision)?))
}

#[async_trait::async_trait]
impl ProgressRepository for SqliteRepository {
    async fn get_progress(&self, key: &ProgressKey) -> Result<Option<ProgressRecord>, StorageError> {
        let sql = format!(
            "SELECT {PROGRESS_COLUMNS} FROM progress
             WHERE user_id = ?1 AND content_id = ?2 AND content_type = ?3"
        );
        let row = sqlx::query(&sql)
            .bind(key.user_id.as_str())
            .bind(key.content_id.as_str())
            .bind(key.content_type.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?;

        row.as_ref().map(map_progress_row).transpose()
    }

    async fn commit_completion(
        &self,
        record: &ProgressRecord,
        expected_revision: u64,
        xp: u64,
        activity_on: Option<NaiveDate>,
    ) -> Result<CompletionCommit, StorageError> {
        let new_revision = expected_revision
            .checked_add(1)
            .ok_or_else(|| StorageError::Serialization("revision overflow".into()))?;

        let mut tx = self.pool.begin().await.map_err(conn)?;

        // The progress write comes first and takes the write lock.
        let affected = if expected_revision == 0 {
            bind_record(INSERT_PROGRESS, record, new_revision)?
                .execute(&mut *tx)
                .await
                .map_err(write_err)?
                .rows_affected()
        } else {
            bind_record(UPDATE_PROGRESS, record, new_revision)?
                .bind(u64_to_i64("revision", expected_revision)?)
                .execute(&mut *tx)
                .await
                .map_err(write_err)?
                .rows_affected()
        };
        if affected == 0 {
            tx.rollback().await.map_err(conn)?;
            return Err(StorageError::Conflict);
        }

        let credit = credit_user(&mut tx, &record.key.user_id, xp, activity_on).await?;
        tx.commit().await.map_err(conn)?;

        let mut stored = record.clone();
        stored.revision = new_revision;
        Ok(CompletionCommit {
            record: stored,
            credit,
        })
    }

    async fn claim_bonus(
        &self,
        user_id: &UserId,
        scope: &BonusScope,
        xp: u64,
        claimed_at: DateTime<Utc>,
    ) -> Result<Option<CreditReceipt>, StorageError> {
        let mut tx = self.pool.begin().await.map_err(conn)?;

        let inserted = sqlx::query(
            r"
            INSERT INTO bonus_claims (user_id, scope_kind, group_id, content_type, xp, claimed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(user_id, scope_kind, group_id, content_type) DO NOTHING
            ",
        )
        .bind(user_id.as_str())
        .bind(scope.kind())
        .bind(scope.group_id())
        .bind(scope.member_type().as_str())
        .bind(u64_to_i64("xp", xp)?)
        .bind(claimed_at)
        .execute(&mut *tx)
        .await
        .map_err(write_err)?
        .rows_affected();

        if inserted == 0 {
            tx.rollback().await.map_err(conn)?;
            return Ok(None);
        }

        let credit = credit_user(&mut tx, user_id, xp, None).await?;
        tx.commit().await.map_err(conn)?;
        Ok(Some(credit))
    }

    async fn bonus_claimed(
        &self,
        user_id: &UserId,
        scope: &BonusScope,
    ) -> Result<bool, StorageError> {
        let row = sqlx::query(
            r"
            SELECT 1 FROM bonus_claims
            WHERE user_id = ?1 AND scope_kind = ?2 AND group_id = ?3 AND content_type = ?4
            ",
        )
        .bind(user_id.as_str())
        .bind(scope.kind())
        .bind(scope.group_id())
        .bind(scope.member_type().as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;
        Ok(row.is_some())
    }

    async fn count_bonus_claims(&self, user_id: &UserId) -> Result<u32, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bonus_claims WHERE user_id = ?1")
            .bind(user_id.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(conn)?;
        i64_to_u32("bonus claim count", count)
    }

    async fn completed_in_scope(
        &self,
        user_id: &UserId,
        scope: &BonusScope,
    ) -> Result<HashSet<ContentId>, StorageError> {
        let (column, group_id) = match scope {
            BonusScope::Section { section_id } => ("section_id", section_id.as_str()),
            BonusScope::Topic { topic_id, .. } => ("topic_id", topic_id.as_str()),
        };
        let sql = format!(
            "SELECT content_id FROM progress
             WHERE user_id = ?1 AND content_type = ?2 AND {column} = ?3
               AND first_completed_at IS NOT NULL"
        );

        let rows = sqlx::query(&sql)
            .bind(user_id.as_str())
            .bind(scope.member_type().as_str())
            .bind(group_id)
            .fetch_all(&self.pool)
            .await
            .map_err(conn)?;

        rows.iter()
            .map(|row| key::<ContentId>(row, "content_id"))
            .collect()
    }

    async fn progress_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<ProgressRecord>, StorageError> {
        let sql = format!(
            "SELECT {PROGRESS_COLUMNS} FROM progress
             WHERE user_id = ?1
             ORDER BY content_type ASC, content_id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(user_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(conn)?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(map_progress_row(&row)?);
        }
        Ok(records)
    }
}

