use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};

use quiz_core::model::TimerStatus;

use super::shared::SharedSession;
use super::store::{SessionStore, TickOutcome};

/// Callback run once when the countdown crosses zero.
pub type ExpiryCallback = Box<dyn FnOnce() + Send + 'static>;

/// Owns the one repeating tick task of a session.
///
/// Ticks arrive every `period`; the store decides whether a tick counts
/// (only while `running`). Dropping or cancelling the controller stops the
/// task, and no tick reaches the store afterwards.
pub struct TimerController {
    task: Option<JoinHandle<()>>,
}

impl TimerController {
    /// Spawn the tick loop on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn spawn(
        session: SharedSession,
        period: Duration,
        on_expire: Option<ExpiryCallback>,
    ) -> Self {
        let task = tokio::spawn(run_ticks(session, period, on_expire));
        Self { task: Some(task) }
    }

    /// Whether the tick loop is still alive.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for TimerController {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn run_ticks(session: SharedSession, period: Duration, mut on_expire: Option<ExpiryCallback>) {
    // First tick one full period after start; `interval` would fire immediately.
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut status = session.subscribe_timer();
    status.borrow_and_update();

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            res = status.changed() => {
                if res.is_err() {
                    return;
                }
                // A resumed countdown owes a full period before its next decrement.
                if *status.borrow_and_update() == TimerStatus::Running {
                    ticker.reset();
                }
                continue;
            }
        }

        match session.update(SessionStore::tick) {
            TickOutcome::Expired => {
                tracing::info!("quiz timer expired");
                // The store lock is released here, so the callback sees `expired`.
                if let Some(callback) = on_expire.take() {
                    callback();
                }
                return;
            }
            TickOutcome::Counted { remaining } => {
                tracing::trace!(remaining, "timer tick");
            }
            TickOutcome::Ignored => {
                if session.read(|s| s.timer_status().is_terminal()) {
                    return;
                }
            }
        }
    }
}
