use std::fmt;

use quiz_core::model::{BlankId, QuestionId};

/// One line typed at the `take` prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Choice {
        question: QuestionId,
        option: Option<String>,
    },
    TrueFalse {
        question: QuestionId,
        value: Option<bool>,
    },
    Short {
        question: QuestionId,
        text: String,
    },
    Fill {
        question: QuestionId,
        blank: BlankId,
        text: String,
    },
    Clear(QuestionId),
    Status,
    Pause,
    Resume,
    Blur,
    Save,
    Submit,
    Quit,
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputError {
    Empty,
    UnknownCommand(String),
    MissingArgument {
        command: &'static str,
        what: &'static str,
    },
    InvalidBool(String),
}

impl fmt::Display for InputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputError::Empty => write!(f, "empty command"),
            InputError::UnknownCommand(cmd) => {
                write!(f, "unknown command: {cmd} (type `help`)")
            }
            InputError::MissingArgument { command, what } => {
                write!(f, "{command} requires {what}")
            }
            InputError::InvalidBool(raw) => {
                write!(f, "expected true, false or -, got {raw}")
            }
        }
    }
}

impl std::error::Error for InputError {}

pub const HELP: &str = "\
commands:
  mc <question> <option>|-        pick a choice (- unselects)
  tf <question> true|false|-      answer true/false
  short <question> <text...>      free text answer
  fill <question> <blank> <text>  fill one blank
  clear <question>                reset an answer
  status | pause | resume | blur | save | submit | quit";

impl Input {
    /// Parse one prompt line. Text arguments keep their inner spacing.
    pub fn parse(line: &str) -> Result<Self, InputError> {
        let line = line.trim();
        let (command, rest) = split_word(line);
        match command {
            "" => Err(InputError::Empty),
            "mc" => {
                let (question, rest) = question(rest, "mc")?;
                let option = match rest.trim() {
                    "" => {
                        return Err(InputError::MissingArgument {
                            command: "mc",
                            what: "an option id or -",
                        });
                    }
                    "-" => None,
                    option => Some(option.to_string()),
                };
                Ok(Self::Choice { question, option })
            }
            "tf" => {
                let (question, rest) = question(rest, "tf")?;
                let value = match rest.trim() {
                    "true" | "t" => Some(true),
                    "false" | "f" => Some(false),
                    "-" => None,
                    other => return Err(InputError::InvalidBool(other.to_string())),
                };
                Ok(Self::TrueFalse { question, value })
            }
            "short" => {
                let (question, rest) = question(rest, "short")?;
                Ok(Self::Short {
                    question,
                    text: rest.trim().to_string(),
                })
            }
            "fill" => {
                let (question, rest) = question(rest, "fill")?;
                let (blank, rest) = split_word(rest);
                let blank = blank.parse::<BlankId>().map_err(|_| InputError::MissingArgument {
                    command: "fill",
                    what: "a blank id",
                })?;
                Ok(Self::Fill {
                    question,
                    blank,
                    text: rest.trim().to_string(),
                })
            }
            "clear" => Ok(Self::Clear(question(rest, "clear")?.0)),
            "status" => Ok(Self::Status),
            "pause" => Ok(Self::Pause),
            "resume" => Ok(Self::Resume),
            "blur" => Ok(Self::Blur),
            "save" => Ok(Self::Save),
            "submit" => Ok(Self::Submit),
            "quit" | "exit" => Ok(Self::Quit),
            "help" | "?" => Ok(Self::Help),
            other => Err(InputError::UnknownCommand(other.to_string())),
        }
    }
}

fn split_word(input: &str) -> (&str, &str) {
    let input = input.trim_start();
    input.split_once(char::is_whitespace).unwrap_or((input, ""))
}

fn question<'a>(
    input: &'a str,
    command: &'static str,
) -> Result<(QuestionId, &'a str), InputError> {
    let (word, rest) = split_word(input);
    let question = word
        .parse::<QuestionId>()
        .map_err(|_| InputError::MissingArgument {
            command,
            what: "a question id",
        })?;
    Ok((question, rest))
}
