use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::answer::DraftAnswer;
use crate::model::ids::{AttemptId, QuestionId, QuizId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SubmissionError {
    #[error("question {0} answered more than once")]
    DuplicateAnswer(QuestionId),
}

/// Final answer set handed to the backend when an attempt is submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptSubmission {
    quiz_id: QuizId,
    attempt_id: AttemptId,
    answers: Vec<DraftAnswer>,
    focus_loss_count: u32,
    time_expired: bool,
    submitted_at: DateTime<Utc>,
}

impl AttemptSubmission {
    /// Build a submission, checking that every question appears at most once.
    ///
    /// # Errors
    ///
    /// Returns `SubmissionError::DuplicateAnswer` if two answers share a question id.
    pub fn new(
        quiz_id: QuizId,
        attempt_id: AttemptId,
        answers: Vec<DraftAnswer>,
        focus_loss_count: u32,
        time_expired: bool,
        submitted_at: DateTime<Utc>,
    ) -> Result<Self, SubmissionError> {
        let mut seen = HashSet::with_capacity(answers.len());
        for answer in &answers {
            if !seen.insert(answer.question_id()) {
                return Err(SubmissionError::DuplicateAnswer(answer.question_id().clone()));
            }
        }

        Ok(Self {
            quiz_id,
            attempt_id,
            answers,
            focus_loss_count,
            time_expired,
            submitted_at,
        })
    }

    #[must_use]
    pub fn quiz_id(&self) -> &QuizId {
        &self.quiz_id
    }

    #[must_use]
    pub fn attempt_id(&self) -> &AttemptId {
        &self.attempt_id
    }

    #[must_use]
    pub fn answers(&self) -> &[DraftAnswer] {
        &self.answers
    }

    #[must_use]
    pub fn focus_loss_count(&self) -> u32 {
        self.focus_loss_count
    }

    /// True when the countdown ran out before the student submitted.
    #[must_use]
    pub fn time_expired(&self) -> bool {
        self.time_expired
    }

    #[must_use]
    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }
}
