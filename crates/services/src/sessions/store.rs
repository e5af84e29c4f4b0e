use std::collections::HashMap;

use chrono::{DateTime, Utc};
use quiz_core::model::{AnswerError, AttemptId, DraftAnswer, QuestionId, QuizId, TimerStatus};
use quiz_core::time::formatted_time;

//
// ─── TICK OUTCOME ──────────────────────────────────────────────────────────────
//

/// What a single timer tick did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Timer was not running (or had no limit); nothing changed.
    Ignored,
    /// One second was taken off the countdown.
    Counted { remaining: u32 },
    /// This tick reached zero and moved the timer to `expired`.
    Expired,
}

/// Consistent copy of the answers of a bound attempt, taken under one lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftSnapshot {
    pub quiz_id: QuizId,
    pub attempt_id: AttemptId,
    pub answers: Vec<DraftAnswer>,
    pub revision: u64,
}

//
// ─── SESSION STORE ─────────────────────────────────────────────────────────────
//

/// Canonical in-memory state of one quiz attempt.
///
/// Every method is synchronous and touches only these fields. Timing and
/// persistence live in the timer controller and the autosave pipeline.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    quiz_id: Option<QuizId>,
    attempt_id: Option<AttemptId>,
    answers: HashMap<QuestionId, DraftAnswer>,
    is_dirty: bool,
    last_saved_at: Option<DateTime<Utc>>,
    remaining_seconds: Option<u32>,
    timer_status: TimerStatus,
    focus_loss_count: u32,
    revision: u64,
}

impl SessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the store to an attempt. Until both ids are set the session is inert.
    pub fn bind_attempt(&mut self, quiz_id: QuizId, attempt_id: AttemptId) {
        self.quiz_id = Some(quiz_id);
        self.attempt_id = Some(attempt_id);
    }

    #[must_use]
    pub fn quiz_id(&self) -> Option<&QuizId> {
        self.quiz_id.as_ref()
    }

    #[must_use]
    pub fn attempt_id(&self) -> Option<&AttemptId> {
        self.attempt_id.as_ref()
    }

    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.quiz_id.is_some() && self.attempt_id.is_some()
    }

    // ─── Answers ───────────────────────────────────────────────────────────────

    /// Insert or replace the answer for `question_id` and mark the store dirty.
    ///
    /// # Errors
    ///
    /// Returns `AnswerError::QuestionMismatch` if `answer` belongs to another question.
    pub fn set_answer(
        &mut self,
        question_id: QuestionId,
        answer: DraftAnswer,
    ) -> Result<(), AnswerError> {
        if answer.question_id() != &question_id {
            return Err(AnswerError::QuestionMismatch {
                expected: question_id,
                actual: answer.question_id().clone(),
            });
        }
        self.answers.insert(question_id, answer);
        self.touch();
        Ok(())
    }

    /// Reset an answer to the empty shape of its own question type.
    ///
    /// Returns `false` (and stays clean) when the question had no answer.
    pub fn clear_answer(&mut self, question_id: &QuestionId) -> bool {
        let Some(answer) = self.answers.get_mut(question_id) else {
            return false;
        };
        *answer = answer.cleared();
        self.touch();
        true
    }

    #[must_use]
    pub fn get_answer(&self, question_id: &QuestionId) -> Option<&DraftAnswer> {
        self.answers.get(question_id)
    }

    #[must_use]
    pub fn has_answer(&self, question_id: &QuestionId) -> bool {
        self.answers
            .get(question_id)
            .is_some_and(DraftAnswer::has_content)
    }

    /// All answers, ordered by question id.
    #[must_use]
    pub fn all_answers(&self) -> Vec<DraftAnswer> {
        let mut answers: Vec<DraftAnswer> = self.answers.values().cloned().collect();
        answers.sort_by(|a, b| a.question_id().cmp(b.question_id()));
        answers
    }

    #[must_use]
    pub fn answered_count(&self) -> usize {
        self.answers.values().filter(|a| a.has_content()).count()
    }

    /// Load answers persisted by an earlier session without marking the store dirty.
    pub fn hydrate(&mut self, answers: impl IntoIterator<Item = DraftAnswer>) {
        for answer in answers {
            self.answers.insert(answer.question_id().clone(), answer);
        }
    }

    /// Snapshot of the answer set for saving; `None` while unbound.
    #[must_use]
    pub fn snapshot(&self) -> Option<DraftSnapshot> {
        Some(DraftSnapshot {
            quiz_id: self.quiz_id.clone()?,
            attempt_id: self.attempt_id.clone()?,
            answers: self.all_answers(),
            revision: self.revision,
        })
    }

    fn touch(&mut self) {
        self.is_dirty = true;
        self.revision = self.revision.wrapping_add(1);
    }

    // ─── Save bookkeeping ──────────────────────────────────────────────────────

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }

    #[must_use]
    pub fn last_saved_at(&self) -> Option<DateTime<Utc>> {
        self.last_saved_at
    }

    /// Counter bumped by every answer mutation.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn mark_saved(&mut self, saved_at: DateTime<Utc>) {
        self.is_dirty = false;
        self.last_saved_at = Some(saved_at);
    }

    /// Record a save of the snapshot taken at `revision`.
    ///
    /// The timestamp is always stamped; dirty is cleared only when no edit
    /// landed after the snapshot. Returns whether the store is now clean.
    pub fn mark_saved_if_unchanged(&mut self, revision: u64, saved_at: DateTime<Utc>) -> bool {
        if self.revision == revision {
            self.mark_saved(saved_at);
            true
        } else {
            self.last_saved_at = Some(saved_at);
            false
        }
    }

    // ─── Timer ─────────────────────────────────────────────────────────────────

    #[must_use]
    pub fn timer_status(&self) -> TimerStatus {
        self.timer_status
    }

    #[must_use]
    pub fn remaining_seconds(&self) -> Option<u32> {
        self.remaining_seconds
    }

    /// `MM:SS` rendering of the countdown, absent without a time limit.
    #[must_use]
    pub fn formatted_time(&self) -> Option<String> {
        formatted_time(self.remaining_seconds)
    }

    /// Seed the countdown and move `idle -> running`.
    ///
    /// No-op unless the store is bound and idle. Without a limit the timer
    /// stays idle; a zero limit is already expired.
    pub fn start_timer(&mut self, limit_seconds: Option<u32>) -> TimerStatus {
        if !self.is_bound() || self.timer_status != TimerStatus::Idle {
            return self.timer_status;
        }
        self.remaining_seconds = limit_seconds;
        self.timer_status = match limit_seconds {
            None => TimerStatus::Idle,
            Some(0) => TimerStatus::Expired,
            Some(_) => TimerStatus::Running,
        };
        self.timer_status
    }

    pub fn tick(&mut self) -> TickOutcome {
        if self.timer_status != TimerStatus::Running {
            return TickOutcome::Ignored;
        }
        let Some(remaining) = self.remaining_seconds.filter(|r| *r > 0) else {
            return TickOutcome::Ignored;
        };

        let remaining = remaining - 1;
        self.remaining_seconds = Some(remaining);
        if remaining == 0 {
            self.timer_status = TimerStatus::Expired;
            TickOutcome::Expired
        } else {
            TickOutcome::Counted { remaining }
        }
    }

    /// `running -> paused`; returns whether the status changed.
    pub fn pause(&mut self) -> bool {
        if self.timer_status == TimerStatus::Running {
            self.timer_status = TimerStatus::Paused;
            true
        } else {
            false
        }
    }

    /// `paused -> running`; returns whether the status changed.
    pub fn resume(&mut self) -> bool {
        if self.timer_status == TimerStatus::Paused {
            self.timer_status = TimerStatus::Running;
            true
        } else {
            false
        }
    }

    // ─── Telemetry ─────────────────────────────────────────────────────────────

    #[must_use]
    pub fn focus_loss_count(&self) -> u32 {
        self.focus_loss_count
    }

    pub fn record_focus_loss(&mut self) -> u32 {
        self.focus_loss_count = self.focus_loss_count.saturating_add(1);
        self.focus_loss_count
    }

    /// Back to a fresh, unbound store.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
