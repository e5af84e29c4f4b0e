use chrono::{DateTime, Utc};
use quiz_core::model::TimerStatus;
use serde::Serialize;

/// Point-in-time view of a session, shaped for a UI or a status line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub answered: usize,
    pub remaining_seconds: Option<u32>,
    pub formatted_time: Option<String>,
    pub timer_status: TimerStatus,
    pub is_dirty: bool,
    pub is_saving: bool,
    pub last_saved_at: Option<DateTime<Utc>>,
    /// Message of the last failed save; cleared by the next successful one.
    pub save_error: Option<String>,
    pub focus_loss_count: u32,
    pub submitted: bool,
}

impl SessionStatus {
    /// Whether every edit so far has reached the backend.
    #[must_use]
    pub fn is_synced(&self) -> bool {
        !self.is_dirty && !self.is_saving && self.save_error.is_none()
    }
}
