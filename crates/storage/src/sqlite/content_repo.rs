use std::collections::HashSet;

use rewards_core::bonus::BonusScope;
use rewards_core::model::{ContentId, ContentItem};

use super::SqliteRepository;
use super::mapping::{conn, key};
use crate::repository::{ContentCatalog, StorageError};

#[async_trait::async_trait]
impl ContentCatalog for SqliteRepository {
    async fn upsert_content(&self, item: &ContentItem) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO content_items (content_type, id, topic_id, subject_id, section_id, difficulty)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(content_type, id) DO UPDATE SET
                topic_id = excluded.topic_id,
                subject_id = excluded.subject_id,
                section_id = excluded.section_id,
                difficulty = excluded.difficulty
            ",
        )
        .bind(item.content_type.as_str())
        .bind(item.id.as_str())
        .bind(item.topic_id.as_str())
        .bind(item.subject_id.as_str())
        .bind(item.section_id.as_ref().map(|s| s.as_str().to_owned()))
        .bind(item.difficulty.as_str())
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        Ok(())
    }

    async fn group_members(&self, scope: &BonusScope) -> Result<HashSet<ContentId>, StorageError> {
        let (column, group_id) = match scope {
            BonusScope::Section { section_id } => ("section_id", section_id.as_str()),
            BonusScope::Topic { topic_id, .. } => ("topic_id", topic_id.as_str()),
        };
        let sql = format!(
            "SELECT id FROM content_items WHERE content_type = ?1 AND {column} = ?2"
        );

        let rows = sqlx::query(&sql)
            .bind(scope.member_type().as_str())
            .bind(group_id)
            .fetch_all(&self.pool)
            .await
            .map_err(conn)?;

        rows.iter().map(|row| key::<ContentId>(row, "id")).collect()
    }
}
