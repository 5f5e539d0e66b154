use chrono::Utc;
use sqlx::SqlitePool;

use super::SqliteInitError;

/// Runs a single, consolidated migration for the current schema.
///
/// Creates users, the content catalog, progress records, bonus claims,
/// unlocked achievements, daily snapshots, rank history and indexes.
#[allow(clippy::too_many_lines)]
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    async fn is_applied(pool: &SqlitePool, version: i64) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = ?1")
            .bind(version)
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
            ",
    )
    .execute(pool)
    .await?;

    // Version 1: full schema.
    if !is_applied(pool, 1).await? {
        let mut tx = pool.begin().await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS users (
                    id TEXT PRIMARY KEY,
                    given_name TEXT NOT NULL,
                    family_name TEXT,
                    role TEXT NOT NULL CHECK (role IN ('learner', 'instructor', 'admin')),
                    total_xp INTEGER NOT NULL DEFAULT 0 CHECK (total_xp >= 0),
                    level INTEGER NOT NULL DEFAULT 1 CHECK (level >= 1),
                    current_streak INTEGER NOT NULL DEFAULT 0 CHECK (current_streak >= 0),
                    longest_streak INTEGER NOT NULL DEFAULT 0 CHECK (longest_streak >= 0),
                    last_active_on TEXT,
                    created_at TEXT NOT NULL
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS content_items (
                    content_type TEXT NOT NULL,
                    id TEXT NOT NULL,
                    topic_id TEXT NOT NULL,
                    subject_id TEXT NOT NULL,
                    section_id TEXT,
                    difficulty TEXT NOT NULL,
                    PRIMARY KEY (content_type, id)
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS progress (
                    user_id TEXT NOT NULL,
                    content_id TEXT NOT NULL,
                    content_type TEXT NOT NULL,
                    topic_id TEXT NOT NULL,
                    subject_id TEXT NOT NULL,
                    section_id TEXT,
                    completed INTEGER NOT NULL CHECK (completed IN (0, 1)),
                    score REAL NOT NULL,
                    attempts INTEGER NOT NULL CHECK (attempts >= 0),
                    first_completed_at TEXT,
                    first_completed_on TEXT,
                    last_daily_on TEXT,
                    daily_xp_count INTEGER NOT NULL CHECK (daily_xp_count >= 0),
                    total_xp_earned INTEGER NOT NULL CHECK (total_xp_earned >= 0),
                    time_spent_secs INTEGER NOT NULL CHECK (time_spent_secs >= 0),
                    last_accessed TEXT NOT NULL,
                    data TEXT,
                    revision INTEGER NOT NULL CHECK (revision >= 1),
                    PRIMARY KEY (user_id, content_id, content_type),
                    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                    CHECK (last_daily_on IS NULL OR first_completed_at IS NOT NULL)
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS bonus_claims (
                    user_id TEXT NOT NULL,
                    scope_kind TEXT NOT NULL CHECK (scope_kind IN ('section', 'topic')),
                    group_id TEXT NOT NULL,
                    content_type TEXT NOT NULL,
                    xp INTEGER NOT NULL CHECK (xp >= 0),
                    claimed_at TEXT NOT NULL,
                    PRIMARY KEY (user_id, scope_kind, group_id, content_type),
                    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS user_achievements (
                    user_id TEXT NOT NULL,
                    achievement_id TEXT NOT NULL,
                    unlocked_at TEXT NOT NULL,
                    PRIMARY KEY (user_id, achievement_id),
                    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS rank_snapshots (
                    date TEXT PRIMARY KEY,
                    created_at TEXT NOT NULL
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        // No foreign key to users: a snapshot records what was read, even for
        // accounts deleted later.
        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS rank_snapshot_entries (
                    date TEXT NOT NULL,
                    user_id TEXT NOT NULL,
                    rank INTEGER NOT NULL CHECK (rank >= 1),
                    total_xp INTEGER NOT NULL CHECK (total_xp >= 0),
                    level INTEGER NOT NULL CHECK (level >= 1),
                    streak INTEGER NOT NULL CHECK (streak >= 0),
                    previous_rank INTEGER,
                    rank_change INTEGER NOT NULL,
                    rank_change_type TEXT NOT NULL
                        CHECK (rank_change_type IN ('up', 'down', 'none', 'new')),
                    PRIMARY KEY (date, user_id),
                    FOREIGN KEY (date) REFERENCES rank_snapshots(date) ON DELETE CASCADE
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS user_rank_history (
                    user_id TEXT NOT NULL,
                    date TEXT NOT NULL,
                    rank INTEGER NOT NULL CHECK (rank >= 1),
                    total_xp INTEGER NOT NULL CHECK (total_xp >= 0),
                    PRIMARY KEY (user_id, date),
                    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_users_role_standings
                    ON users (role, total_xp DESC, id ASC);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_progress_user_section
                    ON progress (user_id, content_type, section_id);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_progress_user_topic
                    ON progress (user_id, content_type, topic_id);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_content_items_section
                    ON content_items (content_type, section_id);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_content_items_topic
                    ON content_items (content_type, topic_id);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                INSERT INTO schema_migrations (version, applied_at)
                VALUES (?1, ?2)
                ON CONFLICT(version) DO NOTHING
            ",
        )
        .bind(1_i64)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
    }

    Ok(())
}
