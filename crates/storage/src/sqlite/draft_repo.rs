use quiz_core::model::{AttemptId, DraftAnswer, QuizId};

use super::SqliteRepository;
use super::mapping::{answer_to_payload, map_draft_row};
use crate::repository::{DraftAnswerRepository, StorageError};

fn conn(e: sqlx::Error) -> StorageError {
    StorageError::Connection(e.to_string())
}

#[async_trait::async_trait]
impl DraftAnswerRepository for SqliteRepository {
    async fn save_draft_answers(
        &self,
        quiz_id: &QuizId,
        attempt_id: &AttemptId,
        answers: &[DraftAnswer],
    ) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(conn)?;

        sqlx::query(
            r"
                DELETE FROM draft_answers
                WHERE quiz_id = ?1 AND attempt_id = ?2
            ",
        )
        .bind(quiz_id.as_str())
        .bind(attempt_id.as_str())
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        for answer in answers {
            let payload = answer_to_payload(answer)?;
            sqlx::query(
                r"
                    INSERT INTO draft_answers (
                        quiz_id, attempt_id, question_id, question_type, payload
                    )
                    VALUES (?1, ?2, ?3, ?4, ?5)
                ",
            )
            .bind(quiz_id.as_str())
            .bind(attempt_id.as_str())
            .bind(answer.question_id().as_str())
            .bind(answer.question_type().as_str())
            .bind(payload)
            .execute(&mut *tx)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(db) if db.is_unique_violation() => StorageError::Conflict,
                other => conn(other),
            })?;
        }

        tx.commit().await.map_err(conn)?;
        tracing::debug!(
            quiz_id = %quiz_id,
            attempt_id = %attempt_id,
            answers = answers.len(),
            "stored draft snapshot"
        );
        Ok(())
    }

    async fn load_draft_answers(
        &self,
        quiz_id: &QuizId,
        attempt_id: &AttemptId,
    ) -> Result<Vec<DraftAnswer>, StorageError> {
        let rows = sqlx::query(
            r"
                SELECT question_id, payload
                FROM draft_answers
                WHERE quiz_id = ?1 AND attempt_id = ?2
                ORDER BY question_id ASC
            ",
        )
        .bind(quiz_id.as_str())
        .bind(attempt_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(map_draft_row(&row)?);
        }
        Ok(out)
    }
}
