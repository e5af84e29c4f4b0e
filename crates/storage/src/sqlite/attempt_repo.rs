use quiz_core::model::{AttemptId, AttemptSubmission};

use super::SqliteRepository;
use super::mapping::{count_to_i64, map_submission_row, ser};
use crate::repository::{AttemptRepository, StorageError};

#[async_trait::async_trait]
impl AttemptRepository for SqliteRepository {
    async fn submit_attempt(&self, submission: &AttemptSubmission) -> Result<(), StorageError> {
        let answers = serde_json::to_string(submission.answers()).map_err(ser)?;

        sqlx::query(
            r"
                INSERT INTO attempt_submissions (
                    attempt_id, quiz_id, answers, focus_loss_count, time_expired, submitted_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ",
        )
        .bind(submission.attempt_id().as_str())
        .bind(submission.quiz_id().as_str())
        .bind(answers)
        .bind(count_to_i64(submission.focus_loss_count()))
        .bind(submission.time_expired())
        .bind(submission.submitted_at())
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => StorageError::Conflict,
            other => StorageError::Connection(other.to_string()),
        })?;

        Ok(())
    }

    async fn get_submission(
        &self,
        attempt_id: &AttemptId,
    ) -> Result<Option<AttemptSubmission>, StorageError> {
        let row = sqlx::query(
            r"
                SELECT
                    attempt_id, quiz_id, answers, focus_loss_count, time_expired, submitted_at
                FROM attempt_submissions
                WHERE attempt_id = ?1
            ",
        )
        .bind(attempt_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        row.as_ref().map(map_submission_row).transpose()
    }
}
