use quiz_core::model::{AttemptId, AttemptSubmission, DraftAnswer, QuizId};
use sqlx::Row;

use crate::repository::StorageError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn answer_to_payload(answer: &DraftAnswer) -> Result<String, StorageError> {
    serde_json::to_string(answer).map_err(ser)
}

pub(crate) fn answer_from_payload(payload: &str) -> Result<DraftAnswer, StorageError> {
    DraftAnswer::from_json(payload).map_err(ser)
}

pub(crate) fn count_to_i64(v: u32) -> i64 {
    i64::from(v)
}

fn count_from_i64(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

pub(crate) fn map_draft_row(row: &sqlx::sqlite::SqliteRow) -> Result<DraftAnswer, StorageError> {
    let payload: String = row.try_get("payload").map_err(ser)?;
    let answer = answer_from_payload(&payload)?;

    let question_id: String = row.try_get("question_id").map_err(ser)?;
    if answer.question_id().as_str() != question_id {
        return Err(StorageError::Serialization(format!(
            "payload for {} stored under question {question_id}",
            answer.question_id()
        )));
    }
    Ok(answer)
}

pub(crate) fn map_submission_row(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<AttemptSubmission, StorageError> {
    let attempt_id = AttemptId::new(row.try_get::<String, _>("attempt_id").map_err(ser)?);
    let quiz_id = QuizId::new(row.try_get::<String, _>("quiz_id").map_err(ser)?);
    let raw_answers: String = row.try_get("answers").map_err(ser)?;
    let values: Vec<serde_json::Value> = serde_json::from_str(&raw_answers).map_err(ser)?;
    let answers = values
        .into_iter()
        .map(|value| DraftAnswer::from_value(value).map_err(ser))
        .collect::<Result<Vec<_>, _>>()?;
    let focus_loss_count = count_from_i64(
        "focus_loss_count",
        row.try_get::<i64, _>("focus_loss_count").map_err(ser)?,
    )?;
    let time_expired: bool = row.try_get("time_expired").map_err(ser)?;
    let submitted_at = row.try_get("submitted_at").map_err(ser)?;

    AttemptSubmission::new(
        quiz_id,
        attempt_id,
        answers,
        focus_loss_count,
        time_expired,
        submitted_at,
    )
    .map_err(ser)
}
