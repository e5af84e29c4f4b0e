mod autosave;
mod service;
mod shared;
mod status;
mod store;
mod timer;

// Public API of the session subsystem.
pub use crate::error::SessionError;
pub use autosave::{AutoSavePipeline, SaveOutcome, SaveState};
pub use service::{QuizSession, QuizSessionService};
pub use shared::SharedSession;
pub use status::SessionStatus;
pub use store::{DraftSnapshot, SessionStore, TickOutcome};
pub use timer::{ExpiryCallback, TimerController};
