#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod sessions;

pub use quiz_core::Clock;
pub use sessions as session;

pub use config::EngineConfig;
pub use error::{ConfigError, SessionError};

pub use sessions::{
    ExpiryCallback, QuizSession, QuizSessionService, SaveOutcome, SessionStatus, SessionStore,
};
