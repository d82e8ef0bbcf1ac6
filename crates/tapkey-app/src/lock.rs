//! Optimistic lock/unlock control for one key

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use tapkey_core::prelude::*;
use tapkey_core::{ActivityEntry, KeyId, KeyRecord, LockAction, UserId};

use crate::optimistic::Optimistic;
use crate::store::RemoteStore;

/// Snapshot of a key's lock state as shown to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockView {
    pub key_id: KeyId,
    pub locked: bool,
    pub pending: bool,
    pub last_action_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct LockState {
    locked: Optimistic<bool>,
    last_action_at: Option<DateTime<Utc>>,
}

fn lock_state(state: &Mutex<LockState>) -> MutexGuard<'_, LockState> {
    state.lock().unwrap_or_else(|p| p.into_inner())
}

fn view_of(key_id: &str, state: &LockState) -> LockView {
    LockView {
        key_id: key_id.to_string(),
        locked: *state.locked.current(),
        pending: state.locked.is_pending(),
        last_action_at: state.last_action_at,
    }
}

/// Rolls back a staged toggle unless it was committed, so a cancelled
/// toggle never leaves the key pending.
struct StagedToggle<'a> {
    key_id: &'a str,
    state: &'a Mutex<LockState>,
    view_tx: &'a watch::Sender<LockView>,
    committed: bool,
}

impl StagedToggle<'_> {
    fn commit(mut self) -> LockView {
        let view = {
            let mut state = lock_state(self.state);
            state.locked.commit();
            state.last_action_at = Some(Utc::now());
            view_of(self.key_id, &state)
        };
        self.committed = true;
        self.view_tx.send_replace(view.clone());
        view
    }
}

impl Drop for StagedToggle<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let view = {
            let mut state = lock_state(self.state);
            state.locked.rollback();
            view_of(self.key_id, &state)
        };
        debug!("key {} toggle rolled back", self.key_id);
        self.view_tx.send_replace(view);
    }
}

/// Owns the lock boolean of one key.
///
/// A toggle flips the displayed state immediately, then writes the new
/// state and an activity entry concurrently. Only the state write decides
/// the outcome; a failed activity append is logged and ignored.
pub struct LockController<S> {
    store: Arc<S>,
    key_id: KeyId,
    user_id: UserId,
    state: Mutex<LockState>,
    view_tx: watch::Sender<LockView>,
}

impl<S: RemoteStore> LockController<S> {
    pub fn new(store: Arc<S>, key: &KeyRecord, user_id: impl Into<UserId>) -> Self {
        let state = LockState {
            locked: Optimistic::new(key.is_locked),
            last_action_at: None,
        };
        let (view_tx, _) = watch::channel(view_of(&key.id, &state));
        Self {
            store,
            key_id: key.id.clone(),
            user_id: user_id.into(),
            state: Mutex::new(state),
            view_tx,
        }
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn view(&self) -> LockView {
        view_of(&self.key_id, &self.state())
    }

    pub fn subscribe(&self) -> watch::Receiver<LockView> {
        self.view_tx.subscribe()
    }

    fn state(&self) -> MutexGuard<'_, LockState> {
        lock_state(&self.state)
    }

    fn publish(&self) -> LockView {
        let view = self.view();
        self.view_tx.send_replace(view.clone());
        view
    }

    /// Flip the lock. Fails with [`Error::ToggleInFlight`] while a previous
    /// toggle is unresolved, and with [`Error::RemoteWrite`] after rolling
    /// back when the backend rejects the new state. Dropping the future
    /// before it resolves also rolls back.
    pub async fn toggle(&self) -> Result<LockView> {
        let target = {
            let mut state = self.state();
            let target = !*state.locked.current();
            if !state.locked.begin(target) {
                return Err(Error::ToggleInFlight {
                    key_id: self.key_id.clone(),
                });
            }
            target
        };
        let staged = StagedToggle {
            key_id: &self.key_id,
            state: &self.state,
            view_tx: &self.view_tx,
            committed: false,
        };
        self.publish();
        debug!("key {} -> locked={} (pending)", self.key_id, target);

        let entry = ActivityEntry::now(&self.key_id, &self.user_id, LockAction::for_target(target));
        let (state_result, log_result) = tokio::join!(
            self.store.set_lock_state(&self.key_id, target),
            self.store.append_activity(entry),
        );

        if let Err(e) = log_result {
            warn!("activity log append failed for key {}: {}", self.key_id, e);
        }

        match state_result {
            Ok(()) => {
                let view = staged.commit();
                info!(
                    "key {} {}",
                    self.key_id,
                    if target { "locked" } else { "unlocked" }
                );
                Ok(view)
            }
            Err(e) => {
                drop(staged);
                warn!("lock update for key {} rolled back: {}", self.key_id, e);
                Err(e.into_write_error())
            }
        }
    }

    /// Replace local state with the backend's row. Ignored while a toggle
    /// is pending.
    pub async fn refresh(&self) -> Result<LockView> {
        let key = self
            .store
            .get_key(&self.key_id)
            .await
            .map_err(|e| e.into_read_error())?
            .ok_or_else(|| Error::not_found(format!("key {}", self.key_id)))?;

        {
            let mut state = self.state();
            if state.locked.is_pending() {
                trace!("refresh of key {} skipped, toggle pending", self.key_id);
            } else {
                state.locked.reset(key.is_locked);
            }
        }
        Ok(self.publish())
    }
}
