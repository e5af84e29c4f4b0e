use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use storage::repository::{DraftAnswerRepository, StorageError};
use tokio::sync::{Mutex as AsyncMutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};

use super::shared::SharedSession;
use crate::Clock;
use crate::config::EngineConfig;
use crate::error::SessionError;

/// Save progress as the UI sees it.
#[derive(Debug, Clone, Default)]
pub struct SaveState {
    pub is_saving: bool,
    pub save_error: Option<Arc<StorageError>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The collaborator accepted the snapshot.
    Saved { clean: bool },
    /// No attempt bound yet; nothing was sent.
    NoAttempt,
    /// Autosave is switched off.
    Disabled,
    /// A debounced save found nothing left to write.
    AlreadyClean,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Debounced,
    Forced,
}

struct Pipeline {
    session: SharedSession,
    drafts: Arc<dyn DraftAnswerRepository>,
    clock: Clock,
    state: Mutex<SaveState>,
    // Single slot: a forced save and a debounced save never run together.
    in_flight: AsyncMutex<()>,
    enabled: watch::Sender<bool>,
    flushes: watch::Sender<u64>,
}

impl Pipeline {
    fn update_state(&self, f: impl FnOnce(&mut SaveState)) {
        f(&mut self.state.lock().unwrap_or_else(PoisonError::into_inner));
    }

    fn state(&self) -> SaveState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn save(&self, trigger: Trigger) -> Result<SaveOutcome, Arc<StorageError>> {
        let _slot = self.in_flight.lock().await;

        if !*self.enabled.borrow() {
            return Ok(SaveOutcome::Disabled);
        }
        let snapshot = self.session.read(|s| {
            if trigger == Trigger::Debounced && !s.is_dirty() {
                return Err(SaveOutcome::AlreadyClean);
            }
            s.snapshot().ok_or(SaveOutcome::NoAttempt)
        });
        let snapshot = match snapshot {
            Ok(snapshot) => snapshot,
            Err(outcome) => return Ok(outcome),
        };

        let started_at = self.clock.now();
        self.update_state(|state| {
            state.is_saving = true;
            state.last_attempt_at = Some(started_at);
        });

        let result = self
            .drafts
            .save_draft_answers(&snapshot.quiz_id, &snapshot.attempt_id, &snapshot.answers)
            .await;

        match result {
            Ok(()) => {
                let saved_at = self.clock.now();
                let clean = self
                    .session
                    .update(|s| s.mark_saved_if_unchanged(snapshot.revision, saved_at));
                self.update_state(|state| {
                    state.is_saving = false;
                    state.save_error = None;
                });
                tracing::debug!(
                    attempt_id = %snapshot.attempt_id,
                    answers = snapshot.answers.len(),
                    ?trigger,
                    clean,
                    "draft answers saved"
                );
                Ok(SaveOutcome::Saved { clean })
            }
            Err(err) => {
                let err = Arc::new(err);
                self.update_state(|state| {
                    state.is_saving = false;
                    state.save_error = Some(Arc::clone(&err));
                });
                tracing::warn!(
                    attempt_id = %snapshot.attempt_id,
                    ?trigger,
                    error = %err,
                    "draft save failed; answers stay dirty"
                );
                Err(err)
            }
        }
    }

    fn wants_save(&self) -> bool {
        *self.enabled.borrow() && self.session.read(|s| s.is_dirty() && s.is_bound())
    }
}

/// Debounced, retrying writer of draft answers.
///
/// A background task waits for the store to become dirty, lets the debounce
/// window pass without further edits, and sends the full answer snapshot.
/// Failures keep the store dirty and the next attempt waits `retry_backoff`
/// instead of `debounce`. An edit arriving during either wait restarts the
/// normal debounce window.
pub struct AutoSavePipeline {
    pipeline: Arc<Pipeline>,
    task: Option<JoinHandle<()>>,
}

impl AutoSavePipeline {
    /// Spawn the autosave loop on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn spawn(
        session: SharedSession,
        drafts: Arc<dyn DraftAnswerRepository>,
        clock: Clock,
        config: &EngineConfig,
        enabled: bool,
    ) -> Self {
        let (enabled, _) = watch::channel(enabled);
        let (flushes, _) = watch::channel(0_u64);
        let pipeline = Arc::new(Pipeline {
            session,
            drafts,
            clock,
            state: Mutex::new(SaveState::default()),
            in_flight: AsyncMutex::new(()),
            enabled,
            flushes,
        });
        let task = tokio::spawn(run_loop(Arc::clone(&pipeline), config.clone()));
        Self {
            pipeline,
            task: Some(task),
        }
    }

    /// Save the current answers now, skipping the debounce window.
    ///
    /// Waits for a save already in flight, then writes. Any pending debounce
    /// or retry wait is dropped afterwards.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Save` if the collaborator rejects the snapshot.
    /// The failure is also recorded in [`SaveState::save_error`].
    pub async fn force_save(&self) -> Result<SaveOutcome, SessionError> {
        let outcome = self.pipeline.save(Trigger::Forced).await;
        self.pipeline
            .flushes
            .send_modify(|generation| *generation = generation.wrapping_add(1));
        outcome.map_err(SessionError::Save)
    }

    pub fn set_enabled(&self, enabled: bool) {
        let changed = self.pipeline.enabled.send_if_modified(|current| {
            let changed = *current != enabled;
            *current = enabled;
            changed
        });
        if changed {
            tracing::debug!(enabled, "autosave toggled");
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        *self.pipeline.enabled.borrow()
    }

    #[must_use]
    pub fn state(&self) -> SaveState {
        self.pipeline.state()
    }

    #[must_use]
    pub fn is_saving(&self) -> bool {
        self.pipeline.state().is_saving
    }

    #[must_use]
    pub fn save_error(&self) -> Option<Arc<StorageError>> {
        self.pipeline.state().save_error
    }

    /// Stop the background loop. Pending debounce or retry waits never fire.
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for AutoSavePipeline {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn run_loop(pipeline: Arc<Pipeline>, config: EngineConfig) {
    let mut changes = pipeline.session.subscribe();
    let mut enabled = pipeline.enabled.subscribe();
    let mut flushes = pipeline.flushes.subscribe();

    loop {
        while !pipeline.wants_save() {
            tokio::select! {
                res = changes.changed() => {
                    if res.is_err() {
                        return;
                    }
                }
                res = enabled.changed() => {
                    if res.is_err() {
                        return;
                    }
                }
            }
        }
        changes.borrow_and_update();
        flushes.borrow_and_update();

        // The last save, debounced or forced, failed: back off before retrying.
        let delay = if pipeline.state().save_error.is_some() {
            config.retry_backoff
        } else {
            config.debounce
        };
        let wait = sleep(delay);
        tokio::pin!(wait);
        let mut superseded = false;
        loop {
            tokio::select! {
                () = &mut wait => break,
                res = changes.changed() => {
                    if res.is_err() {
                        return;
                    }
                    wait.as_mut().reset(Instant::now() + config.debounce);
                }
                res = enabled.changed() => {
                    if res.is_err() {
                        return;
                    }
                    if !*enabled.borrow_and_update() {
                        superseded = true;
                        break;
                    }
                }
                res = flushes.changed() => {
                    if res.is_err() {
                        return;
                    }
                    superseded = true;
                    break;
                }
            }
        }

        if !superseded {
            // Failures are recorded in the save state and picked up above.
            let _ = pipeline.save(Trigger::Debounced).await;
        }
    }
}
