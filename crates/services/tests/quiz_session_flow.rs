use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use quiz_core::model::{
    AttemptId, AttemptSubmission, BlankId, DraftAnswer, FilledAnswers, QuestionId, QuizId,
    TimerStatus,
};
use quiz_core::time::{fixed_clock, fixed_now};
use services::{EngineConfig, ExpiryCallback, QuizSessionService, SaveOutcome, SessionError};
use storage::repository::{
    AttemptRepository, DraftAnswerRepository, InMemoryRepository, StorageError,
};
use tokio::sync::mpsc;
use tokio::time::sleep;

/// Draft repository that counts saves and can be told to fail.
#[derive(Default)]
struct FlakyDrafts {
    inner: InMemoryRepository,
    saves: AtomicUsize,
    failing: Mutex<bool>,
}

impl FlakyDrafts {
    fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }
}

#[async_trait]
impl DraftAnswerRepository for FlakyDrafts {
    async fn save_draft_answers(
        &self,
        quiz_id: &QuizId,
        attempt_id: &AttemptId,
        answers: &[DraftAnswer],
    ) -> Result<(), StorageError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        if *self.failing.lock().unwrap() {
            return Err(StorageError::Connection("503 from backend".into()));
        }
        self.inner
            .save_draft_answers(quiz_id, attempt_id, answers)
            .await
    }

    async fn load_draft_answers(
        &self,
        quiz_id: &QuizId,
        attempt_id: &AttemptId,
    ) -> Result<Vec<DraftAnswer>, StorageError> {
        self.inner.load_draft_answers(quiz_id, attempt_id).await
    }
}

/// Attempt repository whose backend refuses every submission.
struct RejectingAttempts;

#[async_trait]
impl AttemptRepository for RejectingAttempts {
    async fn submit_attempt(&self, _submission: &AttemptSubmission) -> Result<(), StorageError> {
        Err(StorageError::Rejected("grading service down".into()))
    }

    async fn get_submission(
        &self,
        _attempt_id: &AttemptId,
    ) -> Result<Option<AttemptSubmission>, StorageError> {
        Ok(None)
    }
}

fn rejecting_service(drafts: &Arc<FlakyDrafts>) -> QuizSessionService {
    QuizSessionService::new(
        fixed_clock(),
        drafts.clone(),
        Arc::new(RejectingAttempts),
        EngineConfig::default(),
    )
}

struct Harness {
    drafts: Arc<FlakyDrafts>,
    attempts: InMemoryRepository,
    service: QuizSessionService,
}

fn harness() -> Harness {
    let drafts = Arc::new(FlakyDrafts::default());
    let attempts = InMemoryRepository::new();
    let service = QuizSessionService::new(
        fixed_clock(),
        drafts.clone(),
        Arc::new(attempts.clone()),
        EngineConfig::default(),
    );
    Harness {
        drafts,
        attempts,
        service,
    }
}

fn q(id: &str) -> QuestionId {
    QuestionId::new(id)
}

fn ids() -> (QuizId, AttemptId) {
    (QuizId::new("biology-101"), AttemptId::new("attempt-7"))
}

#[tokio::test(start_paused = true)]
async fn edits_are_saved_once_after_the_quiet_period() {
    let h = harness();
    let (quiz, attempt) = ids();
    let session = h.service.start(quiz.clone(), attempt.clone(), None, None);

    let mut filled = FilledAnswers::new();
    filled.insert(BlankId::new("b1"), "nucleus".into());
    session
        .set_answer(q("q1"), DraftAnswer::multiple_choice(q("q1"), Some("opt-b".into())))
        .unwrap();
    session
        .set_answer(q("q2"), DraftAnswer::fill_in_the_blank(q("q2"), filled))
        .unwrap();
    assert!(session.status().is_dirty);

    sleep(Duration::from_millis(3_500)).await;

    assert_eq!(h.drafts.saves(), 1);
    let stored = h.drafts.load_draft_answers(&quiz, &attempt).await.unwrap();
    assert_eq!(stored, session.answers());
    let status = session.status();
    assert!(status.is_synced());
    assert_eq!(status.last_saved_at, Some(fixed_now()));
}

#[tokio::test(start_paused = true)]
async fn disabled_autosave_sends_nothing() {
    let h = harness();
    let (quiz, attempt) = ids();
    let session = h.service.start(quiz, attempt, None, None);
    session.set_autosave_enabled(false);

    session
        .set_answer(q("q1"), DraftAnswer::short_answer(q("q1"), "osmosis"))
        .unwrap();
    sleep(Duration::from_secs(30)).await;

    assert_eq!(h.drafts.saves(), 0);
    assert!(session.status().is_dirty);
}

#[tokio::test(start_paused = true)]
async fn failed_save_is_surfaced_then_retried() {
    let h = harness();
    let (quiz, attempt) = ids();
    let session = h.service.start(quiz, attempt, None, None);
    h.drafts.set_failing(true);

    session
        .set_answer(q("q1"), DraftAnswer::true_false(q("q1"), Some(true)))
        .unwrap();
    sleep(Duration::from_millis(3_500)).await;

    let status = session.status();
    assert_eq!(h.drafts.saves(), 1);
    assert!(status.is_dirty);
    assert!(status.save_error.is_some());
    assert_eq!(status.last_saved_at, None);

    h.drafts.set_failing(false);
    sleep(Duration::from_secs(5)).await;

    let status = session.status();
    assert_eq!(h.drafts.saves(), 2);
    assert!(!status.is_dirty);
    assert_eq!(status.save_error, None);
    assert_eq!(status.last_saved_at, Some(fixed_now()));
}

#[tokio::test(start_paused = true)]
async fn force_save_does_not_wait_for_debounce() {
    let h = harness();
    let (quiz, attempt) = ids();
    let session = h.service.start(quiz, attempt, None, None);

    session
        .set_answer(q("q1"), DraftAnswer::short_answer(q("q1"), "ribosome"))
        .unwrap();
    let outcome = session.force_save().await.unwrap();

    assert_eq!(outcome, SaveOutcome::Saved { clean: true });
    assert_eq!(h.drafts.saves(), 1);
    sleep(Duration::from_secs(10)).await;
    assert_eq!(h.drafts.saves(), 1);
}

#[tokio::test(start_paused = true)]
async fn dispose_before_the_debounce_fires_prevents_saves_and_ticks() {
    let h = harness();
    let (quiz, attempt) = ids();
    let mut session = h.service.start(quiz, attempt, Some(120), None);

    session
        .set_answer(q("q1"), DraftAnswer::short_answer(q("q1"), "draft"))
        .unwrap();
    sleep(Duration::from_millis(1_500)).await;
    session.dispose();
    sleep(Duration::from_secs(30)).await;

    assert_eq!(h.drafts.saves(), 0);
    assert_eq!(session.status().remaining_seconds, Some(119));
}

#[tokio::test(start_paused = true)]
async fn resume_restores_saved_drafts_as_clean() {
    let h = harness();
    let (quiz, attempt) = ids();
    {
        let session = h.service.start(quiz.clone(), attempt.clone(), None, None);
        session
            .set_answer(q("q1"), DraftAnswer::short_answer(q("q1"), "chlorophyll"))
            .unwrap();
        session.force_save().await.unwrap();
    }

    let resumed = h
        .service
        .resume(quiz, attempt, Some(300), None)
        .await
        .unwrap();

    assert_eq!(
        resumed.answer(&q("q1")),
        Some(DraftAnswer::short_answer(q("q1"), "chlorophyll"))
    );
    let status = resumed.status();
    assert!(!status.is_dirty);
    assert_eq!(status.answered, 1);
    assert_eq!(status.formatted_time.as_deref(), Some("05:00"));
}

#[tokio::test(start_paused = true)]
async fn submission_carries_answers_and_focus_losses() {
    let h = harness();
    let (quiz, attempt) = ids();
    let mut session = h.service.start(quiz.clone(), attempt.clone(), Some(900), None);

    session
        .set_answer(q("q2"), DraftAnswer::true_false(q("q2"), Some(false)))
        .unwrap();
    session
        .set_answer(q("q1"), DraftAnswer::short_answer(q("q1"), "mitosis"))
        .unwrap();
    session.record_focus_loss();
    session.record_focus_loss();

    let submission = session.submit().await.unwrap();

    assert_eq!(submission.focus_loss_count(), 2);
    assert!(!submission.time_expired());
    assert_eq!(submission.answers().len(), 2);
    assert_eq!(submission.answers()[0].question_id(), &q("q1"));
    assert_eq!(h.attempts.get_submission(&attempt).await.unwrap(), Some(submission.clone()));
    // The pending drafts were flushed before submitting.
    assert_eq!(h.drafts.saves(), 1);

    let err = h.service.resume(quiz, attempt.clone(), None, None).await.err();
    assert!(matches!(err, Some(SessionError::AlreadySubmitted)));
    assert_eq!(h.service.submission(&attempt).await.unwrap(), Some(submission));
    assert_eq!(
        h.service
            .submission(&AttemptId::new("never-taken"))
            .await
            .unwrap(),
        None
    );
}

#[tokio::test(start_paused = true)]
async fn expiry_callback_drives_auto_submit() {
    let h = harness();
    let (quiz, attempt) = ids();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let on_expire: ExpiryCallback = Box::new(move || {
        let _ = tx.send(());
    });
    let mut session = h.service.start(quiz, attempt.clone(), Some(5), Some(on_expire));
    session
        .set_answer(q("q1"), DraftAnswer::short_answer(q("q1"), "late answer"))
        .unwrap();

    rx.recv().await.unwrap();
    assert_eq!(session.timer_status(), TimerStatus::Expired);
    let submission = session.submit().await.unwrap();

    assert!(submission.time_expired());
    assert!(h.attempts.get_submission(&attempt).await.unwrap().is_some());
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn failed_submit_keeps_autosave_switched_off() {
    let drafts = Arc::new(FlakyDrafts::default());
    let (quiz, attempt) = ids();
    let mut session = rejecting_service(&drafts).start(quiz, attempt, Some(600), None);
    session.set_autosave_enabled(false);
    session
        .set_answer(q("q1"), DraftAnswer::short_answer(q("q1"), "read only"))
        .unwrap();

    let err = session.submit().await.unwrap_err();
    assert!(matches!(err, SessionError::Storage(StorageError::Rejected(_))));
    assert!(!session.is_submitted());
    assert!(!session.is_autosave_enabled());

    sleep(Duration::from_secs(10)).await;
    assert_eq!(drafts.saves(), 0);
}

#[tokio::test(start_paused = true)]
async fn failed_submit_restores_autosave_and_keeps_counting_down() {
    let drafts = Arc::new(FlakyDrafts::default());
    let (quiz, attempt) = ids();
    let mut session = rejecting_service(&drafts).start(quiz, attempt, Some(600), None);
    session
        .set_answer(q("q1"), DraftAnswer::short_answer(q("q1"), "v1"))
        .unwrap();

    assert!(session.submit().await.is_err());
    assert!(session.is_autosave_enabled());
    assert_eq!(drafts.saves(), 1);

    session
        .set_answer(q("q1"), DraftAnswer::short_answer(q("q1"), "v2"))
        .unwrap();
    sleep(Duration::from_millis(3_500)).await;
    assert_eq!(drafts.saves(), 2);
    assert_eq!(session.status().remaining_seconds, Some(597));
}
