use chrono::Utc;
use sqlx::SqlitePool;

use super::SqliteInitError;

/// Runs the schema migrations that have not been applied yet.
///
/// Version 1 creates the draft answer table and the attempt submission table.
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

    if !is_applied(pool, 1).await? {
        let mut tx = pool.begin().await?;

        // One row per question; a save replaces every row of the attempt.
        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS draft_answers (
                    quiz_id TEXT NOT NULL,
                    attempt_id TEXT NOT NULL,
                    question_id TEXT NOT NULL,
                    question_type TEXT NOT NULL CHECK (question_type IN (
                        'multiple_choice', 'true_false', 'short_answer', 'fill_in_the_blank'
                    )),
                    payload TEXT NOT NULL,
                    PRIMARY KEY (quiz_id, attempt_id, question_id)
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS attempt_submissions (
                    attempt_id TEXT PRIMARY KEY,
                    quiz_id TEXT NOT NULL,
                    answers TEXT NOT NULL,
                    focus_loss_count INTEGER NOT NULL CHECK (focus_loss_count >= 0),
                    time_expired INTEGER NOT NULL CHECK (time_expired IN (0, 1)),
                    submitted_at TEXT NOT NULL
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_attempt_submissions_quiz_submitted
                    ON attempt_submissions (quiz_id, submitted_at);
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
