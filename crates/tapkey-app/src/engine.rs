//! Engine - wires the NFC session, stores and flows together
//!
//! Frontends construct one Engine per signed-in user and drive everything
//! through it. State changes are broadcast as [`AppEvent`]s.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

use tapkey_core::prelude::*;
use tapkey_core::{KeyId, KeyPermission, KeyRecord, Notice, Notification, PermissionLevel};
use tapkey_nfc::{NfcBackend, NfcSession};

use crate::config::Settings;
use crate::engine_event::AppEvent;
use crate::key_settings::{
    KeySettingsService, NotificationSettings, NotificationToggle, SecuritySettings,
};
use crate::lock::{LockController, LockView};
use crate::notifications::{self, ReadStateService, SyncReport};
use crate::pairing::{PairingFlow, PairingStep};
use crate::pin::PinGate;
use crate::sharing::{AccessManager, GrantOutcome, Mailer};
use crate::storage::KeyValueStore;
use crate::store::RemoteStore;

/// Notifications together with their read state
#[derive(Debug, Clone, serde::Serialize)]
pub struct Inbox {
    pub notifications: Vec<Notification>,
    pub read_ids: BTreeSet<String>,
    pub unread_count: usize,
}

/// Orchestration engine for one signed-in user.
pub struct Engine<B, S, K, M> {
    pub settings: Settings,
    user_id: String,
    session: Arc<NfcSession<B>>,
    remote: Arc<S>,
    pairing: PairingFlow<B>,
    access: AccessManager<S, M>,
    key_settings: KeySettingsService<K>,
    read_state: ReadStateService<K, S>,
    locks: Mutex<HashMap<KeyId, Arc<LockController<S>>>>,
    /// Set after the first inbox load
    inbox_loaded: AtomicBool,
    event_tx: broadcast::Sender<AppEvent>,
}

impl<B, S, K, M> Engine<B, S, K, M>
where
    B: NfcBackend + Sync + 'static,
    S: RemoteStore,
    K: KeyValueStore,
    M: Mailer,
{
    pub fn new(
        settings: Settings,
        backend: B,
        remote: Arc<S>,
        local: Arc<K>,
        mailer: Arc<M>,
    ) -> Self {
        let user_id = settings.session.user_id.clone();
        let session = Arc::new(
            NfcSession::new(backend).with_emulation_timeout(settings.nfc.emulation_timeout()),
        );
        let pairing = PairingFlow::new(Arc::clone(&session), settings.nfc.pairing_timeout());
        let (event_tx, _) = broadcast::channel(256);

        info!("engine ready for user {}", user_id);
        Self {
            access: AccessManager::new(Arc::clone(&remote), mailer),
            key_settings: KeySettingsService::new(Arc::clone(&local), user_id.clone()),
            read_state: ReadStateService::new(local, Arc::clone(&remote), user_id.clone()),
            settings,
            user_id,
            session,
            remote,
            pairing,
            locks: Mutex::new(HashMap::new()),
            inbox_loaded: AtomicBool::new(false),
            event_tx,
        }
    }

    /// Subscribe to engine events
    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: AppEvent) {
        trace!("event: {}", event.event_type());
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }

    fn notice(&self, notice: Notice) {
        self.emit(AppEvent::Notice { notice });
    }

    /// Emit the error's notice and hand the error back
    fn surface<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_recoverable() {
                debug!("recoverable failure: {}", e);
            } else {
                warn!("operation failed: {}", e);
            }
            self.notice(Notice::from(e));
        }
        result
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn session(&self) -> &Arc<NfcSession<B>> {
        &self.session
    }

    // ─────────────────────────────────────────────────────────
    // NFC
    // ─────────────────────────────────────────────────────────

    pub async fn write_tag(&self, payload: &str) -> Result<()> {
        let result = self.session.write_tag(payload).await;
        self.surface(result)
    }

    pub async fn emulate(&self, correlation_id: &str) -> Result<String> {
        let result = self.session.emulate_nfc(correlation_id).await;
        self.surface(result)
    }

    /// Deliver a synthesized tag to the running scan
    pub fn simulate_tag(&self, serial: &str) -> usize {
        self.session.simulate_tag_detection(serial)
    }

    // ─────────────────────────────────────────────────────────
    // Pairing
    // ─────────────────────────────────────────────────────────

    pub fn pairing_step(&self) -> PairingStep {
        self.pairing.step()
    }

    /// Run one pairing scan to completion
    pub async fn pair(&self) -> Result<PairingStep> {
        let mut steps = self.pairing.subscribe();
        let _ = steps.borrow_and_update();

        let run = self.pairing.run();
        tokio::pin!(run);
        let step = loop {
            tokio::select! {
                result = &mut run => break result,
                changed = steps.changed() => {
                    if changed.is_ok() {
                        let step = steps.borrow_and_update().clone();
                        if !step.is_terminal() {
                            self.emit(AppEvent::PairingStepChanged { step });
                        }
                    }
                }
            }
        };

        let step = self.surface(step)?;
        self.emit(AppEvent::PairingStepChanged { step: step.clone() });
        if let PairingStep::Failed { reason } = &step {
            self.notice(Notice::error(reason.notice()));
        }
        Ok(step)
    }

    pub fn retry_pairing(&self) -> Result<()> {
        let result = self.pairing.retry();
        self.surface(result)?;
        self.emit(AppEvent::PairingStepChanged {
            step: PairingStep::AwaitingStart,
        });
        Ok(())
    }

    /// Create the key for the paired tag and start tracking its lock
    pub async fn confirm_pairing(&self, name: &str) -> Result<KeyRecord> {
        let result = self.pairing.confirm(name, &self.user_id, self.remote.as_ref()).await;
        let key = self.surface(result)?;

        self.register_lock(&key);
        self.emit(AppEvent::KeyPaired { key: key.clone() });
        self.notice(Notice::info(format!("\"{}\" paired", key.name)));
        Ok(key)
    }

    // ─────────────────────────────────────────────────────────
    // Locks
    // ─────────────────────────────────────────────────────────

    fn register_lock(&self, key: &KeyRecord) -> Arc<LockController<S>> {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        Arc::clone(locks.entry(key.id.clone()).or_insert_with(|| {
            Arc::new(LockController::new(
                Arc::clone(&self.remote),
                key,
                self.user_id.clone(),
            ))
        }))
    }

    fn cached_lock(&self, key_id: &str) -> Option<Arc<LockController<S>>> {
        self.locks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(key_id)
            .cloned()
    }

    /// Controller for `key_id`, loading the key on first use
    pub async fn lock(&self, key_id: &str) -> Result<Arc<LockController<S>>> {
        if let Some(controller) = self.cached_lock(key_id) {
            return Ok(controller);
        }
        let key = self.fetch_key(key_id).await?;
        Ok(self.register_lock(&key))
    }

    async fn fetch_key(&self, key_id: &str) -> Result<KeyRecord> {
        self.remote
            .get_key(key_id)
            .await
            .map_err(|e| e.into_read_error())?
            .ok_or_else(|| Error::not_found(format!("key {}", key_id)))
    }

    pub async fn toggle_lock(&self, key_id: &str) -> Result<LockView> {
        let result = match self.lock(key_id).await {
            Ok(controller) => {
                let result = controller.toggle().await;
                // Publish the settled view on both paths
                self.emit(AppEvent::LockChanged {
                    view: controller.view(),
                });
                result
            }
            Err(e) => Err(e),
        };
        self.surface(result)
    }

    // ─────────────────────────────────────────────────────────
    // Sharing
    // ─────────────────────────────────────────────────────────

    pub async fn grant_access(
        &self,
        key_id: &str,
        recipient_email: &str,
        level: PermissionLevel,
    ) -> Result<GrantOutcome> {
        let result = match self.fetch_key(key_id).await {
            Ok(key) => {
                self.access
                    .grant_access(&key, &self.user_id, recipient_email, level)
                    .await
            }
            Err(e) => Err(e),
        };
        let outcome = self.surface(result)?;

        self.emit(AppEvent::AccessGranted {
            permission: outcome.permission.clone(),
            invitation: outcome.invitation.clone(),
        });
        self.notice(outcome.notice());
        Ok(outcome)
    }

    pub async fn revoke_access(&self, permission_id: &str) -> Result<()> {
        let result = self.access.revoke_access(permission_id).await;
        self.surface(result)?;
        self.emit(AppEvent::AccessRevoked {
            permission_id: permission_id.to_string(),
        });
        Ok(())
    }

    pub async fn list_access(&self, key_id: &str) -> Result<Vec<KeyPermission>> {
        let result = self.access.list_access(key_id).await;
        self.surface(result)
    }

    // ─────────────────────────────────────────────────────────
    // Notifications
    // ─────────────────────────────────────────────────────────

    fn report(&self, report: &SyncReport) {
        for warning in &report.warnings {
            self.notice(warning.clone());
        }
        self.emit(AppEvent::ReadStateChanged {
            read_count: report.read_ids.len(),
        });
    }

    /// Fetch notifications. The first load reconciles read state when
    /// `refresh_on_load` is set.
    pub async fn load_notifications(&self) -> Result<Inbox> {
        let first_load = !self.inbox_loaded.swap(true, Ordering::SeqCst);
        if first_load && self.settings.notifications.refresh_on_load {
            let report = self.read_state.refresh().await;
            self.report(&report);
        }

        let result = self.read_state.fetch_notifications().await;
        let notifications = self.surface(result)?;
        let read_ids = self.read_state.read_ids();
        let unread_count = notifications::unread(&notifications, &read_ids).len();
        Ok(Inbox {
            notifications,
            read_ids,
            unread_count,
        })
    }

    /// Explicit pull-to-refresh
    pub async fn refresh_read_state(&self) -> SyncReport {
        let report = self.read_state.refresh().await;
        self.report(&report);
        report
    }

    pub async fn mark_read(&self, notification_id: &str) -> Result<SyncReport> {
        let result = self.read_state.mark_read(notification_id).await;
        let report = self.surface(result)?;
        self.report(&report);
        Ok(report)
    }

    pub async fn mark_all_read(&self, notification_ids: Vec<String>) -> Result<SyncReport> {
        let result = self.read_state.mark_all_read(notification_ids).await;
        let report = self.surface(result)?;
        self.report(&report);
        Ok(report)
    }

    // ─────────────────────────────────────────────────────────
    // Settings and PIN
    // ─────────────────────────────────────────────────────────

    pub fn pin(&self) -> &PinGate<K> {
        self.key_settings.pin()
    }

    pub async fn notification_settings(&self, key_id: &str) -> Result<NotificationSettings> {
        self.key_settings.notification_settings(key_id).await
    }

    pub async fn update_notification_settings(
        &self,
        key_id: &str,
        changes: &[(NotificationToggle, bool)],
        pin: Option<&str>,
    ) -> Result<NotificationSettings> {
        let result = self
            .key_settings
            .update_notification_settings(key_id, changes, pin)
            .await;
        self.surface(result)
    }

    pub async fn security_settings(&self, key_id: &str) -> Result<SecuritySettings> {
        self.key_settings.security_settings(key_id).await
    }

    pub async fn save_security_settings(
        &self,
        key_id: &str,
        settings: SecuritySettings,
        pin: Option<&str>,
    ) -> Result<()> {
        let result = self
            .key_settings
            .save_security_settings(key_id, settings, pin)
            .await;
        self.surface(result)
    }

    /// Release the NFC radio and notify subscribers
    pub async fn shutdown(&self) {
        info!("engine shutting down");
        self.session.dispose().await;
        self.emit(AppEvent::Shutdown);
    }
}
