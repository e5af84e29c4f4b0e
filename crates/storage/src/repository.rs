use async_trait::async_trait;
use quiz_core::model::{AttemptId, AttemptSubmission, DraftAnswer, QuizId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("rejected by backend: {0}")]
    Rejected(String),
}

/// Persistence contract for in-progress answers.
///
/// Every save carries the full answer snapshot of the attempt, never a delta;
/// implementations replace whatever was stored before.
#[async_trait]
pub trait DraftAnswerRepository: Send + Sync {
    /// Replace the stored drafts of an attempt with `answers`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the snapshot cannot be stored.
    async fn save_draft_answers(
        &self,
        quiz_id: &QuizId,
        attempt_id: &AttemptId,
        answers: &[DraftAnswer],
    ) -> Result<(), StorageError>;

    /// Fetch the last stored snapshot; empty when nothing was saved yet.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the drafts cannot be read or decoded.
    async fn load_draft_answers(
        &self,
        quiz_id: &QuizId,
        attempt_id: &AttemptId,
    ) -> Result<Vec<DraftAnswer>, StorageError>;
}

#[async_trait]
pub trait AttemptRepository: Send + Sync {
    /// Record the final answers of an attempt.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the attempt was already submitted.
    async fn submit_attempt(&self, submission: &AttemptSubmission) -> Result<(), StorageError>;

    /// Fetch a submitted attempt, if any.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the lookup fails.
    async fn get_submission(
        &self,
        attempt_id: &AttemptId,
    ) -> Result<Option<AttemptSubmission>, StorageError>;
}

/// Simple in-memory repository implementation for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    drafts: Arc<Mutex<HashMap<(QuizId, AttemptId), Vec<DraftAnswer>>>>,
    submissions: Arc<Mutex<HashMap<AttemptId, AttemptSubmission>>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DraftAnswerRepository for InMemoryRepository {
    async fn save_draft_answers(
        &self,
        quiz_id: &QuizId,
        attempt_id: &AttemptId,
        answers: &[DraftAnswer],
    ) -> Result<(), StorageError> {
        let mut guard = self
            .drafts
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.insert((quiz_id.clone(), attempt_id.clone()), answers.to_vec());
        Ok(())
    }

    async fn load_draft_answers(
        &self,
        quiz_id: &QuizId,
        attempt_id: &AttemptId,
    ) -> Result<Vec<DraftAnswer>, StorageError> {
        let guard = self
            .drafts
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard
            .get(&(quiz_id.clone(), attempt_id.clone()))
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl AttemptRepository for InMemoryRepository {
    async fn submit_attempt(&self, submission: &AttemptSubmission) -> Result<(), StorageError> {
        let mut guard = self
            .submissions
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        if guard.contains_key(submission.attempt_id()) {
            return Err(StorageError::Conflict);
        }
        guard.insert(submission.attempt_id().clone(), submission.clone());
        Ok(())
    }

    async fn get_submission(
        &self,
        attempt_id: &AttemptId,
    ) -> Result<Option<AttemptSubmission>, StorageError> {
        let guard = self
            .submissions
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(attempt_id).cloned())
    }
}

/// Aggregates draft and attempt repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub drafts: Arc<dyn DraftAnswerRepository>,
    pub attempts: Arc<dyn AttemptRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let repo = InMemoryRepository::new();
        let drafts: Arc<dyn DraftAnswerRepository> = Arc::new(repo.clone());
        let attempts: Arc<dyn AttemptRepository> = Arc::new(repo);
        Self { drafts, attempts }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiz_core::model::QuestionId;
    use quiz_core::time::fixed_now;

    fn ids() -> (QuizId, AttemptId) {
        (QuizId::new("quiz-1"), AttemptId::new("attempt-1"))
    }

    #[tokio::test]
    async fn save_replaces_previous_snapshot() {
        let repo = InMemoryRepository::new();
        let (quiz, attempt) = ids();

        let first = vec![
            DraftAnswer::short_answer(QuestionId::new("q1"), "draft"),
            DraftAnswer::multiple_choice(QuestionId::new("q2"), Some("b".into())),
        ];
        repo.save_draft_answers(&quiz, &attempt, &first).await.unwrap();

        let second = vec![DraftAnswer::short_answer(QuestionId::new("q1"), "final")];
        repo.save_draft_answers(&quiz, &attempt, &second)
            .await
            .unwrap();

        let loaded = repo.load_draft_answers(&quiz, &attempt).await.unwrap();
        assert_eq!(loaded, second);
    }

    #[tokio::test]
    async fn load_without_save_is_empty() {
        let repo = InMemoryRepository::new();
        let (quiz, attempt) = ids();
        assert!(repo.load_draft_answers(&quiz, &attempt).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn second_submission_conflicts() {
        let repo = InMemoryRepository::new();
        let (quiz, attempt) = ids();
        let submission =
            AttemptSubmission::new(quiz, attempt.clone(), Vec::new(), 1, false, fixed_now())
                .unwrap();

        repo.submit_attempt(&submission).await.unwrap();
        let err = repo.submit_attempt(&submission).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict));

        let stored = repo.get_submission(&attempt).await.unwrap().unwrap();
        assert_eq!(stored.focus_loss_count(), 1);
    }
}
