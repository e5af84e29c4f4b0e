use std::fmt;

use serde::{Deserialize, Serialize};

/// Countdown state of an attempt.
///
/// `idle --start--> running --pause--> paused --resume--> running`, and
/// `running --tick to zero--> expired`. `Expired` is terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerStatus {
    #[default]
    Idle,
    Running,
    Paused,
    Expired,
}

impl TimerStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TimerStatus::Idle => "idle",
            TimerStatus::Running => "running",
            TimerStatus::Paused => "paused",
            TimerStatus::Expired => "expired",
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, TimerStatus::Expired)
    }
}

impl fmt::Display for TimerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
