use std::sync::Arc;

use quiz_core::model::{AttemptId, AttemptSubmission, DraftAnswer, QuestionId, QuizId, TimerStatus};
use storage::repository::{AttemptRepository, DraftAnswerRepository, Storage};

use super::autosave::{AutoSavePipeline, SaveOutcome};
use super::shared::SharedSession;
use super::status::SessionStatus;
use super::store::SessionStore;
use super::timer::{ExpiryCallback, TimerController};
use crate::Clock;
use crate::config::EngineConfig;
use crate::error::SessionError;

//
// ─── SERVICE ───────────────────────────────────────────────────────────────────
//

/// Opens quiz sessions against a pair of repositories.
#[derive(Clone)]
pub struct QuizSessionService {
    clock: Clock,
    drafts: Arc<dyn DraftAnswerRepository>,
    attempts: Arc<dyn AttemptRepository>,
    config: EngineConfig,
}

impl QuizSessionService {
    #[must_use]
    pub fn new(
        clock: Clock,
        drafts: Arc<dyn DraftAnswerRepository>,
        attempts: Arc<dyn AttemptRepository>,
        config: EngineConfig,
    ) -> Self {
        Self {
            clock,
            drafts,
            attempts,
            config,
        }
    }

    #[must_use]
    pub fn from_storage(clock: Clock, storage: Storage, config: EngineConfig) -> Self {
        Self::new(clock, storage.drafts, storage.attempts, config)
    }

    /// Bind a fresh session to an attempt and start its timing sources.
    ///
    /// `time_limit` is the number of seconds left; `None` means untimed.
    /// `on_expire` runs once, from the timer task, after the store reads
    /// `expired`. A zero limit starts already expired and never calls it.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn start(
        &self,
        quiz_id: QuizId,
        attempt_id: AttemptId,
        time_limit: Option<u32>,
        on_expire: Option<ExpiryCallback>,
    ) -> QuizSession {
        self.open(quiz_id, attempt_id, Vec::new(), time_limit, on_expire)
    }

    /// Like [`start`](Self::start), but first restores the drafts saved by an
    /// earlier session of the same attempt. Restored answers count as saved.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::AlreadySubmitted` if the attempt was submitted,
    /// or `SessionError::Storage` if the repositories cannot be read.
    pub async fn resume(
        &self,
        quiz_id: QuizId,
        attempt_id: AttemptId,
        time_limit: Option<u32>,
        on_expire: Option<ExpiryCallback>,
    ) -> Result<QuizSession, SessionError> {
        if self.attempts.get_submission(&attempt_id).await?.is_some() {
            return Err(SessionError::AlreadySubmitted);
        }
        let drafts = self.drafts.load_draft_answers(&quiz_id, &attempt_id).await?;
        tracing::info!(
            quiz_id = %quiz_id,
            attempt_id = %attempt_id,
            restored = drafts.len(),
            "resuming quiz attempt"
        );
        Ok(self.open(quiz_id, attempt_id, drafts, time_limit, on_expire))
    }

    /// Look up what was submitted for an attempt.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Storage` if the lookup fails.
    pub async fn submission(
        &self,
        attempt_id: &AttemptId,
    ) -> Result<Option<AttemptSubmission>, SessionError> {
        Ok(self.attempts.get_submission(attempt_id).await?)
    }

    fn open(
        &self,
        quiz_id: QuizId,
        attempt_id: AttemptId,
        drafts: Vec<DraftAnswer>,
        time_limit: Option<u32>,
        on_expire: Option<ExpiryCallback>,
    ) -> QuizSession {
        let mut store = SessionStore::new();
        store.bind_attempt(quiz_id.clone(), attempt_id.clone());
        store.hydrate(drafts);
        let timer_status = store.start_timer(time_limit);
        let session = SharedSession::new(store);

        let timer = (timer_status == TimerStatus::Running).then(|| {
            TimerController::spawn(session.clone(), self.config.tick_interval, on_expire)
        });
        let autosave = AutoSavePipeline::spawn(
            session.clone(),
            Arc::clone(&self.drafts),
            self.clock,
            &self.config,
            true,
        );

        tracing::info!(
            quiz_id = %quiz_id,
            attempt_id = %attempt_id,
            time_limit = ?time_limit,
            timer = timer_status.as_str(),
            "quiz session started"
        );

        QuizSession {
            quiz_id,
            attempt_id,
            session,
            attempts: Arc::clone(&self.attempts),
            clock: self.clock,
            timer,
            autosave,
            submitted: false,
            disposed: false,
        }
    }
}

//
// ─── SESSION ───────────────────────────────────────────────────────────────────
//

/// One student's live attempt at a quiz.
///
/// Owns the shared store together with the tick task and the autosave task.
/// Both tasks stop on [`dispose`](Self::dispose) or when the session is dropped.
pub struct QuizSession {
    quiz_id: QuizId,
    attempt_id: AttemptId,
    session: SharedSession,
    attempts: Arc<dyn AttemptRepository>,
    clock: Clock,
    timer: Option<TimerController>,
    autosave: AutoSavePipeline,
    submitted: bool,
    disposed: bool,
}

impl QuizSession {
    #[must_use]
    pub fn quiz_id(&self) -> &QuizId {
        &self.quiz_id
    }

    #[must_use]
    pub fn attempt_id(&self) -> &AttemptId {
        &self.attempt_id
    }

    // ─── Answers ───────────────────────────────────────────────────────────────

    /// Record the student's answer to `question_id`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::AlreadySubmitted` after a successful submit, or
    /// `SessionError::Answer` if `answer` belongs to a different question.
    pub fn set_answer(
        &self,
        question_id: QuestionId,
        answer: DraftAnswer,
    ) -> Result<(), SessionError> {
        self.ensure_open()?;
        self.session.update(|s| s.set_answer(question_id, answer))?;
        Ok(())
    }

    /// Reset an answer to its empty shape. `Ok(false)` if it was never answered.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::AlreadySubmitted` after a successful submit.
    pub fn clear_answer(&self, question_id: &QuestionId) -> Result<bool, SessionError> {
        self.ensure_open()?;
        Ok(self.session.update(|s| s.clear_answer(question_id)))
    }

    #[must_use]
    pub fn answer(&self, question_id: &QuestionId) -> Option<DraftAnswer> {
        self.session.read(|s| s.get_answer(question_id).cloned())
    }

    #[must_use]
    pub fn has_answer(&self, question_id: &QuestionId) -> bool {
        self.session.read(|s| s.has_answer(question_id))
    }

    #[must_use]
    pub fn answers(&self) -> Vec<DraftAnswer> {
        self.session.read(SessionStore::all_answers)
    }

    #[must_use]
    pub fn answered_count(&self) -> usize {
        self.session.read(SessionStore::answered_count)
    }

    // ─── Timer and telemetry ───────────────────────────────────────────────────

    pub fn pause(&self) -> bool {
        self.session.update(SessionStore::pause)
    }

    pub fn resume(&self) -> bool {
        self.session.update(SessionStore::resume)
    }

    /// Count one loss of focus (tab hidden, window blurred).
    pub fn record_focus_loss(&self) -> u32 {
        let count = self.session.update(SessionStore::record_focus_loss);
        tracing::debug!(attempt_id = %self.attempt_id, count, "focus lost");
        count
    }

    #[must_use]
    pub fn timer_status(&self) -> TimerStatus {
        self.session.read(SessionStore::timer_status)
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        let save = self.autosave.state();
        self.session.read(|s| SessionStatus {
            answered: s.answered_count(),
            remaining_seconds: s.remaining_seconds(),
            formatted_time: s.formatted_time(),
            timer_status: s.timer_status(),
            is_dirty: s.is_dirty(),
            is_saving: save.is_saving,
            last_saved_at: s.last_saved_at(),
            save_error: save.save_error.as_ref().map(ToString::to_string),
            focus_loss_count: s.focus_loss_count(),
            submitted: self.submitted,
        })
    }

    // ─── Persistence ───────────────────────────────────────────────────────────

    /// Save now, bypassing the debounce window.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Save` when the draft repository fails.
    pub async fn force_save(&self) -> Result<SaveOutcome, SessionError> {
        self.autosave.force_save().await
    }

    pub fn set_autosave_enabled(&self, enabled: bool) {
        self.autosave.set_enabled(enabled);
    }

    #[must_use]
    pub fn is_autosave_enabled(&self) -> bool {
        self.autosave.is_enabled()
    }

    /// Hand the final answers to the attempt repository.
    ///
    /// Pending drafts are flushed first on a best-effort basis; a failed
    /// flush does not block the submission. On success autosave stays off
    /// and the timer stops. On failure autosave returns to the setting it
    /// had before the call and the timer keeps running, so the student can retry.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::AlreadySubmitted` on a second call,
    /// `SessionError::Submission` if the answer set is inconsistent, or
    /// `SessionError::Storage` if the repository rejects it.
    pub async fn submit(&mut self) -> Result<AttemptSubmission, SessionError> {
        self.ensure_open()?;
        let autosave_was_enabled = self.autosave.is_enabled();

        if let Err(err) = self.autosave.force_save().await {
            tracing::warn!(
                attempt_id = %self.attempt_id,
                error = %err,
                "final draft save failed; submitting anyway"
            );
        }
        self.autosave.set_enabled(false);

        let (answers, focus_loss_count, time_expired) = self.session.read(|s| {
            (
                s.all_answers(),
                s.focus_loss_count(),
                s.timer_status() == TimerStatus::Expired,
            )
        });
        let result = match AttemptSubmission::new(
            self.quiz_id.clone(),
            self.attempt_id.clone(),
            answers,
            focus_loss_count,
            time_expired,
            self.clock.now(),
        ) {
            Ok(submission) => self
                .attempts
                .submit_attempt(&submission)
                .await
                .map(|()| submission)
                .map_err(SessionError::from),
            Err(err) => Err(err.into()),
        };

        match result {
            Ok(submission) => {
                self.submitted = true;
                if let Some(timer) = self.timer.as_mut() {
                    timer.cancel();
                }
                tracing::info!(
                    attempt_id = %self.attempt_id,
                    answers = submission.answers().len(),
                    focus_loss_count,
                    time_expired,
                    "quiz attempt submitted"
                );
                Ok(submission)
            }
            Err(err) => {
                tracing::warn!(attempt_id = %self.attempt_id, error = %err, "submit failed");
                self.autosave.set_enabled(autosave_was_enabled);
                Err(err)
            }
        }
    }

    #[must_use]
    pub fn is_submitted(&self) -> bool {
        self.submitted
    }

    /// Stop the tick and autosave tasks. Idempotent.
    ///
    /// State stays readable afterwards, but nothing is saved anymore and the
    /// countdown is frozen.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        if let Some(timer) = self.timer.as_mut() {
            timer.cancel();
        }
        self.autosave.cancel();
        tracing::debug!(attempt_id = %self.attempt_id, "quiz session disposed");
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.submitted {
            Err(SessionError::AlreadySubmitted)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiz_core::time::fixed_clock;
    use std::time::Duration;
    use storage::repository::InMemoryRepository;
    use tokio::time::sleep;

    fn q(id: &str) -> QuestionId {
        QuestionId::new(id)
    }

    fn service(repo: &InMemoryRepository) -> QuizSessionService {
        QuizSessionService::new(
            fixed_clock(),
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
            EngineConfig::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn untimed_session_has_no_timer_task() {
        let repo = InMemoryRepository::new();
        let session = service(&repo).start(QuizId::new("quiz"), AttemptId::new("a1"), None, None);

        assert!(session.timer.is_none());
        let status = session.status();
        assert_eq!(status.timer_status, TimerStatus::Idle);
        assert_eq!(status.formatted_time, None);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_limit_starts_expired_without_ticking() {
        let repo = InMemoryRepository::new();
        let session =
            service(&repo).start(QuizId::new("quiz"), AttemptId::new("a1"), Some(0), None);

        assert!(session.timer.is_none());
        assert_eq!(session.timer_status(), TimerStatus::Expired);
        assert_eq!(session.status().formatted_time.as_deref(), Some("00:00"));
    }

    #[tokio::test(start_paused = true)]
    async fn mismatched_answer_is_rejected() {
        let repo = InMemoryRepository::new();
        let session = service(&repo).start(QuizId::new("quiz"), AttemptId::new("a1"), None, None);

        let err = session
            .set_answer(q("q1"), DraftAnswer::short_answer(q("q2"), "x"))
            .unwrap_err();
        assert!(matches!(err, SessionError::Answer(_)));
        assert_eq!(session.answered_count(), 0);
        assert!(!session.status().is_dirty);
    }

    #[tokio::test(start_paused = true)]
    async fn submitting_twice_fails_and_edits_are_locked() {
        let repo = InMemoryRepository::new();
        let mut session =
            service(&repo).start(QuizId::new("quiz"), AttemptId::new("a1"), Some(600), None);
        session
            .set_answer(q("q1"), DraftAnswer::true_false(q("q1"), Some(false)))
            .unwrap();

        session.submit().await.unwrap();
        assert!(session.is_submitted());
        assert!(!session.is_autosave_enabled());

        let err = session.submit().await.unwrap_err();
        assert!(matches!(err, SessionError::AlreadySubmitted));
        let err = session
            .set_answer(q("q1"), DraftAnswer::true_false(q("q1"), Some(true)))
            .unwrap_err();
        assert!(matches!(err, SessionError::AlreadySubmitted));

        // The countdown stopped with the submission.
        let remaining = session.status().remaining_seconds;
        sleep(Duration::from_secs(10)).await;
        assert_eq!(session.status().remaining_seconds, remaining);
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_is_idempotent_and_keeps_state_readable() {
        let repo = InMemoryRepository::new();
        let mut session =
            service(&repo).start(QuizId::new("quiz"), AttemptId::new("a1"), Some(60), None);
        session
            .set_answer(q("q1"), DraftAnswer::short_answer(q("q1"), "kept"))
            .unwrap();

        session.dispose();
        session.dispose();
        assert!(session.is_disposed());
        assert_eq!(
            session.answer(&q("q1")),
            Some(DraftAnswer::short_answer(q("q1"), "kept"))
        );
        assert_eq!(session.status().remaining_seconds, Some(60));
    }
}
