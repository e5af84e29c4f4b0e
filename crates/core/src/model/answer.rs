use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::{BlankId, QuestionId};

//
// ─── ERRORS ───────────────────────────────────────────────────────────────────
//

/// Errors raised when an answer crosses the typed boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AnswerError {
    #[error("unknown question type: {0}")]
    UnknownType(String),

    #[error("malformed draft answer: {0}")]
    Malformed(String),

    #[error("answer for question {actual} stored under key {expected}")]
    QuestionMismatch {
        expected: QuestionId,
        actual: QuestionId,
    },
}

//
// ─── QUESTION TYPE ────────────────────────────────────────────────────────────
//

/// Closed set of question types a draft answer can belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    MultipleChoice,
    TrueFalse,
    ShortAnswer,
    FillInTheBlank,
}

impl QuestionType {
    pub const ALL: [QuestionType; 4] = [
        QuestionType::MultipleChoice,
        QuestionType::TrueFalse,
        QuestionType::ShortAnswer,
        QuestionType::FillInTheBlank,
    ];

    /// Wire tag used in the `type` field.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            QuestionType::MultipleChoice => "multiple_choice",
            QuestionType::TrueFalse => "true_false",
            QuestionType::ShortAnswer => "short_answer",
            QuestionType::FillInTheBlank => "fill_in_the_blank",
        }
    }
}

impl fmt::Display for QuestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuestionType {
    type Err = AnswerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QuestionType::ALL
            .into_iter()
            .find(|ty| ty.as_str() == s)
            .ok_or_else(|| AnswerError::UnknownType(s.to_owned()))
    }
}

//
// ─── DRAFT ANSWER ─────────────────────────────────────────────────────────────
//

/// Blank id → text typed into that blank.
pub type FilledAnswers = BTreeMap<BlankId, String>;

/// A not-yet-submitted, locally buffered response to one question.
///
/// Serialized with an internal `type` tag and camelCase fields, matching the
/// payload the backend stores for drafts:
///
/// ```json
/// { "type": "multiple_choice", "questionId": "q1", "selectedOptionId": "opt-b" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DraftAnswer {
    #[serde(rename_all = "camelCase")]
    MultipleChoice {
        question_id: QuestionId,
        selected_option_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    TrueFalse {
        question_id: QuestionId,
        selected_answer: Option<bool>,
    },
    #[serde(rename_all = "camelCase")]
    ShortAnswer { question_id: QuestionId, text: String },
    #[serde(rename_all = "camelCase")]
    FillInTheBlank {
        question_id: QuestionId,
        filled_answers: FilledAnswers,
    },
}

impl DraftAnswer {
    #[must_use]
    pub fn multiple_choice(question_id: QuestionId, selected_option_id: Option<String>) -> Self {
        Self::MultipleChoice {
            question_id,
            selected_option_id,
        }
    }

    #[must_use]
    pub fn true_false(question_id: QuestionId, selected_answer: Option<bool>) -> Self {
        Self::TrueFalse {
            question_id,
            selected_answer,
        }
    }

    #[must_use]
    pub fn short_answer(question_id: QuestionId, text: impl Into<String>) -> Self {
        Self::ShortAnswer {
            question_id,
            text: text.into(),
        }
    }

    #[must_use]
    pub fn fill_in_the_blank(question_id: QuestionId, filled_answers: FilledAnswers) -> Self {
        Self::FillInTheBlank {
            question_id,
            filled_answers,
        }
    }

    /// Builds the empty shape of the given question type.
    #[must_use]
    pub fn empty(question_type: QuestionType, question_id: QuestionId) -> Self {
        match question_type {
            QuestionType::MultipleChoice => Self::multiple_choice(question_id, None),
            QuestionType::TrueFalse => Self::true_false(question_id, None),
            QuestionType::ShortAnswer => Self::short_answer(question_id, String::new()),
            QuestionType::FillInTheBlank => {
                Self::fill_in_the_blank(question_id, FilledAnswers::new())
            }
        }
    }

    /// Parses a draft from its JSON wire form, rejecting unknown `type` tags.
    ///
    /// # Errors
    ///
    /// Returns `AnswerError::UnknownType` for a tag outside the closed set and
    /// `AnswerError::Malformed` for any other shape problem.
    pub fn from_json(raw: &str) -> Result<Self, AnswerError> {
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| AnswerError::Malformed(e.to_string()))?;
        Self::from_value(value)
    }

    /// Same as [`DraftAnswer::from_json`] for an already-parsed JSON value.
    ///
    /// # Errors
    ///
    /// See [`DraftAnswer::from_json`].
    pub fn from_value(value: serde_json::Value) -> Result<Self, AnswerError> {
        let tag = value
            .get("type")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| AnswerError::Malformed("missing `type` tag".into()))?;
        tag.parse::<QuestionType>()?;
        serde_json::from_value(value).map_err(|e| AnswerError::Malformed(e.to_string()))
    }

    #[must_use]
    pub fn question_id(&self) -> &QuestionId {
        match self {
            DraftAnswer::MultipleChoice { question_id, .. }
            | DraftAnswer::TrueFalse { question_id, .. }
            | DraftAnswer::ShortAnswer { question_id, .. }
            | DraftAnswer::FillInTheBlank { question_id, .. } => question_id,
        }
    }

    #[must_use]
    pub fn question_type(&self) -> QuestionType {
        match self {
            DraftAnswer::MultipleChoice { .. } => QuestionType::MultipleChoice,
            DraftAnswer::TrueFalse { .. } => QuestionType::TrueFalse,
            DraftAnswer::ShortAnswer { .. } => QuestionType::ShortAnswer,
            DraftAnswer::FillInTheBlank { .. } => QuestionType::FillInTheBlank,
        }
    }

    /// Whether this draft counts as answered.
    ///
    /// Choice answers need a selection. Text answers always count, including
    /// an empty string or an empty blank map.
    #[must_use]
    pub fn has_content(&self) -> bool {
        match self {
            DraftAnswer::MultipleChoice {
                selected_option_id, ..
            } => selected_option_id.is_some(),
            DraftAnswer::TrueFalse {
                selected_answer, ..
            } => selected_answer.is_some(),
            DraftAnswer::ShortAnswer { .. } | DraftAnswer::FillInTheBlank { .. } => true,
        }
    }

    /// The empty state of the same variant for the same question.
    #[must_use]
    pub fn cleared(&self) -> Self {
        Self::empty(self.question_type(), self.question_id().clone())
    }
}
