mod answer;
mod attempt;
mod ids;
mod timer;

pub use answer::{AnswerError, DraftAnswer, FilledAnswers, QuestionType};
pub use attempt::{AttemptSubmission, SubmissionError};
pub use ids::{AttemptId, BlankId, ParseIdError, QuestionId, QuizId};
pub use timer::TimerStatus;
