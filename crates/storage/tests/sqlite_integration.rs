use quiz_core::model::{
    AttemptId, AttemptSubmission, BlankId, DraftAnswer, FilledAnswers, QuestionId, QuizId,
};
use quiz_core::time::fixed_now;
use storage::repository::{AttemptRepository, DraftAnswerRepository, Storage, StorageError};
use storage::sqlite::SqliteRepository;

async fn connect(name: &str) -> SqliteRepository {
    let url = format!("sqlite:file:{name}?mode=memory&cache=shared");
    let repo = SqliteRepository::connect(&url).await.expect("connect");
    repo.migrate().await.expect("migrate");
    repo
}

fn mixed_answers() -> Vec<DraftAnswer> {
    let mut filled = FilledAnswers::new();
    filled.insert(BlankId::new("b1"), "mitochondria".into());
    vec![
        DraftAnswer::multiple_choice(QuestionId::new("q1"), Some("opt-c".into())),
        DraftAnswer::true_false(QuestionId::new("q2"), None),
        DraftAnswer::short_answer(QuestionId::new("q3"), ""),
        DraftAnswer::fill_in_the_blank(QuestionId::new("q4"), filled),
    ]
}

#[tokio::test]
async fn sqlite_draft_snapshot_round_trips() {
    let repo = connect("memdb_drafts_roundtrip").await;
    let quiz = QuizId::new("quiz-1");
    let attempt = AttemptId::new("attempt-1");

    let answers = mixed_answers();
    repo.save_draft_answers(&quiz, &attempt, &answers)
        .await
        .unwrap();

    let loaded = repo.load_draft_answers(&quiz, &attempt).await.unwrap();
    assert_eq!(loaded, answers);
}

#[tokio::test]
async fn sqlite_save_replaces_whole_snapshot() {
    let repo = connect("memdb_drafts_replace").await;
    let quiz = QuizId::new("quiz-1");
    let attempt = AttemptId::new("attempt-1");

    repo.save_draft_answers(&quiz, &attempt, &mixed_answers())
        .await
        .unwrap();
    let latest = vec![DraftAnswer::short_answer(QuestionId::new("q3"), "ATP")];
    repo.save_draft_answers(&quiz, &attempt, &latest)
        .await
        .unwrap();

    let loaded = repo.load_draft_answers(&quiz, &attempt).await.unwrap();
    assert_eq!(loaded, latest);
}

#[tokio::test]
async fn sqlite_keeps_attempts_apart() {
    let repo = connect("memdb_drafts_isolation").await;
    let quiz = QuizId::new("quiz-1");
    let first = AttemptId::new("attempt-1");
    let second = AttemptId::new("attempt-2");

    repo.save_draft_answers(&quiz, &first, &mixed_answers())
        .await
        .unwrap();

    assert!(repo
        .load_draft_answers(&quiz, &second)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn sqlite_duplicate_question_in_snapshot_conflicts() {
    let repo = connect("memdb_drafts_duplicate").await;
    let quiz = QuizId::new("quiz-1");
    let attempt = AttemptId::new("attempt-1");
    let answers = vec![
        DraftAnswer::short_answer(QuestionId::new("q1"), "a"),
        DraftAnswer::short_answer(QuestionId::new("q1"), "b"),
    ];

    let err = repo
        .save_draft_answers(&quiz, &attempt, &answers)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Conflict));
}

#[tokio::test]
async fn sqlite_submission_round_trips_and_conflicts() {
    let repo = connect("memdb_submissions").await;
    let submission = AttemptSubmission::new(
        QuizId::new("quiz-1"),
        AttemptId::new("attempt-1"),
        mixed_answers(),
        4,
        true,
        fixed_now(),
    )
    .unwrap();

    repo.submit_attempt(&submission).await.unwrap();
    let stored = repo
        .get_submission(submission.attempt_id())
        .await
        .unwrap()
        .expect("submission stored");
    assert_eq!(stored, submission);

    let err = repo.submit_attempt(&submission).await.unwrap_err();
    assert!(matches!(err, StorageError::Conflict));

    let missing = repo
        .get_submission(&AttemptId::new("nope"))
        .await
        .unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
async fn private_memory_database_keeps_schema_across_calls() {
    let storage = Storage::sqlite("sqlite::memory:").await.unwrap();
    let quiz = QuizId::new("quiz-1");
    let attempt = AttemptId::new("attempt-1");

    for round in 0..8 {
        let answers = vec![DraftAnswer::short_answer(
            QuestionId::new("q1"),
            format!("draft {round}"),
        )];
        storage
            .drafts
            .save_draft_answers(&quiz, &attempt, &answers)
            .await
            .unwrap();
        let loaded = storage
            .drafts
            .load_draft_answers(&quiz, &attempt)
            .await
            .unwrap();
        assert_eq!(loaded, answers);
    }

    let submission =
        AttemptSubmission::new(quiz, attempt.clone(), mixed_answers(), 0, false, fixed_now()).unwrap();
    storage.attempts.submit_attempt(&submission).await.unwrap();
    assert_eq!(
        storage.attempts.get_submission(&attempt).await.unwrap(),
        Some(submission)
    );
}
