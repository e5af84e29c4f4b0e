use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use quiz_core::model::TimerStatus;
use tokio::sync::watch;

use super::store::SessionStore;

/// Handle to the session store shared by the session, its timer and its autosave task.
///
/// The lock is only ever held for the duration of a synchronous closure, never
/// across an `.await`. Answer edits are published on a watch channel carrying
/// the store revision so the autosave loop can restart its debounce window.
/// Timer transitions go out on a second channel for the tick task.
#[derive(Clone)]
pub struct SharedSession {
    store: Arc<Mutex<SessionStore>>,
    changes: Arc<watch::Sender<u64>>,
    timer: Arc<watch::Sender<TimerStatus>>,
}

impl SharedSession {
    #[must_use]
    pub fn new(store: SessionStore) -> Self {
        let (changes, _) = watch::channel(store.revision());
        let (timer, _) = watch::channel(store.timer_status());
        Self {
            store: Arc::new(Mutex::new(store)),
            changes: Arc::new(changes),
            timer: Arc::new(timer),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionStore> {
        // Store methods cannot leave it half-updated, so a poisoned lock is still usable.
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn read<R>(&self, f: impl FnOnce(&SessionStore) -> R) -> R {
        f(&self.lock())
    }

    /// Mutate the store, then notify subscribers of a new answer revision or
    /// a timer transition.
    pub fn update<R>(&self, f: impl FnOnce(&mut SessionStore) -> R) -> R {
        let (result, revision, timer_status) = {
            let mut guard = self.lock();
            let result = f(&mut guard);
            (result, guard.revision(), guard.timer_status())
        };
        publish(&self.changes, revision);
        publish(&self.timer, timer_status);
        result
    }

    /// Receiver that wakes on every answer edit.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    /// Receiver that wakes on every timer status change.
    #[must_use]
    pub fn subscribe_timer(&self) -> watch::Receiver<TimerStatus> {
        self.timer.subscribe()
    }
}

fn publish<T: PartialEq>(sender: &watch::Sender<T>, value: T) {
    sender.send_if_modified(|current| {
        if *current == value {
            false
        } else {
            *current = value;
            true
        }
    });
}
