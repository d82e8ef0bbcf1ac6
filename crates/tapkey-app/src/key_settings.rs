//! Per-key notification and security settings
//!
//! Both documents are stored locally under `{kind}_{keyId}_{userId}`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use tapkey_core::prelude::*;
use tapkey_core::UserId;

use crate::pin::PinGate;
use crate::storage::{self, KeyValueStore, SettingKind};

/// One switch on the notification settings screen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationToggle {
    AllActivity,
    LockEvents,
    UnlockEvents,
    AccessChanges,
    SecurityAlerts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    pub all_activity: bool,
    pub lock_events: bool,
    pub unlock_events: bool,
    pub access_changes: bool,
    pub security_alerts: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            all_activity: true,
            lock_events: true,
            unlock_events: true,
            access_changes: true,
            security_alerts: true,
        }
    }
}

impl NotificationSettings {
    fn individual_mut(&mut self, toggle: NotificationToggle) -> Option<&mut bool> {
        match toggle {
            NotificationToggle::AllActivity => None,
            NotificationToggle::LockEvents => Some(&mut self.lock_events),
            NotificationToggle::UnlockEvents => Some(&mut self.unlock_events),
            NotificationToggle::AccessChanges => Some(&mut self.access_changes),
            NotificationToggle::SecurityAlerts => Some(&mut self.security_alerts),
        }
    }

    /// Apply one switch change.
    ///
    /// Turning `all_activity` on turns every switch on. Turning any
    /// individual switch off turns `all_activity` off. Turning the last
    /// individual switch back on leaves `all_activity` off.
    pub fn apply(&mut self, toggle: NotificationToggle, enabled: bool) {
        match self.individual_mut(toggle) {
            Some(flag) => {
                *flag = enabled;
                if !enabled {
                    self.all_activity = false;
                }
            }
            None if enabled => *self = Self::default(),
            None => self.all_activity = false,
        }
    }

    /// Apply changes in order
    pub fn apply_all(&mut self, changes: &[(NotificationToggle, bool)]) {
        for &(toggle, enabled) in changes {
            self.apply(toggle, enabled);
        }
    }
}

/// Default delay before a key re-locks itself
pub const DEFAULT_AUTO_LOCK_DELAY_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySettings {
    pub require_pin: bool,
    pub auto_lock: bool,
    pub auto_lock_delay_secs: u64,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            require_pin: false,
            auto_lock: false,
            auto_lock_delay_secs: DEFAULT_AUTO_LOCK_DELAY_SECS,
        }
    }
}

/// Loads and saves per-key settings for one user
pub struct KeySettingsService<K> {
    local: Arc<K>,
    user_id: UserId,
    pin: PinGate<K>,
}

impl<K: KeyValueStore> KeySettingsService<K> {
    pub fn new(local: Arc<K>, user_id: impl Into<UserId>) -> Self {
        let user_id = user_id.into();
        Self {
            pin: PinGate::new(Arc::clone(&local), user_id.clone()),
            local,
            user_id,
        }
    }

    pub fn pin(&self) -> &PinGate<K> {
        &self.pin
    }

    async fn load<T>(&self, kind: SettingKind, key_id: &str) -> Result<T>
    where
        T: Default + serde::de::DeserializeOwned,
    {
        let key = storage::setting_key(kind, key_id, &self.user_id);
        match storage::get_json(self.local.as_ref(), &key).await {
            Ok(value) => Ok(value.unwrap_or_default()),
            Err(Error::Json(e)) => {
                warn!("discarding unreadable {}: {}", key, e);
                Ok(T::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Fails with [`Error::PinRequired`]/[`Error::PinMismatch`] when the
    /// key's security settings ask for a PIN and `pin` does not satisfy it.
    async fn check_pin(&self, key_id: &str, pin: Option<&str>) -> Result<()> {
        let security: SecuritySettings = self.load(SettingKind::Security, key_id).await?;
        if security.require_pin {
            self.pin.require(pin).await?;
        }
        Ok(())
    }

    pub async fn notification_settings(&self, key_id: &str) -> Result<NotificationSettings> {
        self.load(SettingKind::Notifications, key_id).await
    }

    pub async fn update_notification_settings(
        &self,
        key_id: &str,
        changes: &[(NotificationToggle, bool)],
        pin: Option<&str>,
    ) -> Result<NotificationSettings> {
        self.check_pin(key_id, pin).await?;
        let mut settings = self.notification_settings(key_id).await?;
        settings.apply_all(changes);
        storage::set_json(
            self.local.as_ref(),
            &storage::setting_key(SettingKind::Notifications, key_id, &self.user_id),
            &settings,
        )
        .await?;
        debug!("notification settings for {} saved: {:?}", key_id, settings);
        Ok(settings)
    }

    pub async fn security_settings(&self, key_id: &str) -> Result<SecuritySettings> {
        self.load(SettingKind::Security, key_id).await
    }

    pub async fn save_security_settings(
        &self,
        key_id: &str,
        settings: SecuritySettings,
        pin: Option<&str>,
    ) -> Result<()> {
        self.check_pin(key_id, pin).await?;
        if settings.require_pin && !self.pin.has_pin().await? {
            return Err(Error::PinRequired);
        }
        storage::set_json(
            self.local.as_ref(),
            &storage::setting_key(SettingKind::Security, key_id, &self.user_id),
            &settings,
        )
        .await?;
        debug!("security settings for {} saved: {:?}", key_id, settings);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use NotificationToggle::*;

    fn service() -> (KeySettingsService<MemoryStore>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (KeySettingsService::new(Arc::clone(&store), "u1"), store)
    }

    #[test]
    fn test_enable_all_activity_turns_everything_on() {
        let mut settings = NotificationSettings {
            all_activity: false,
            lock_events: false,
            unlock_events: true,
            access_changes: false,
            security_alerts: false,
        };
        settings.apply(AllActivity, true);
        assert_eq!(settings, NotificationSettings::default());
    }

    #[test]
    fn test_disable_individual_turns_all_activity_off() {
        let mut settings = NotificationSettings::default();
        settings.apply(UnlockEvents, false);
        assert!(!settings.all_activity);
        assert!(!settings.unlock_events);
        assert!(settings.lock_events);
    }

    #[test]
    fn test_enable_last_individual_leaves_all_activity_off() {
        let mut settings = NotificationSettings::default();
        settings.apply(LockEvents, false);
        settings.apply(LockEvents, true);
        assert!(settings.lock_events);
        assert!(!settings.all_activity);
    }

    #[test]
    fn test_disable_all_activity_keeps_individuals() {
        let mut settings = NotificationSettings::default();
        settings.apply(AllActivity, false);
        assert!(!settings.all_activity);
        assert!(settings.lock_events && settings.security_alerts);
    }

    #[test]
    fn test_batch_applied_in_order() {
        let mut settings = NotificationSettings::default();
        settings.apply_all(&[(SecurityAlerts, false), (AllActivity, true)]);
        assert_eq!(settings, NotificationSettings::default());

        settings.apply_all(&[(AllActivity, true), (SecurityAlerts, false)]);
        assert!(!settings.all_activity);
        assert!(!settings.security_alerts);
    }

    #[test]
    fn test_partial_document_uses_defaults() {
        let settings: SecuritySettings = serde_json::from_str(r#"{"auto_lock":true}"#).unwrap();
        assert!(settings.auto_lock);
        assert_eq!(settings.auto_lock_delay_secs, DEFAULT_AUTO_LOCK_DELAY_SECS);
    }

    #[tokio::test]
    async fn test_settings_default_when_missing() {
        let (service, _store) = service();
        assert_eq!(
            service.notification_settings("k1").await.unwrap(),
            NotificationSettings::default()
        );
        assert_eq!(
            service.security_settings("k1").await.unwrap(),
            SecuritySettings::default()
        );
    }

    #[tokio::test]
    async fn test_update_persists_under_namespaced_key() {
        let (service, store) = service();
        service
            .update_notification_settings("k1", &[(LockEvents, false)], None)
            .await
            .unwrap();

        assert!(store
            .get("notification_settings_k1_u1")
            .await
            .unwrap()
            .is_some());
        let loaded = service.notification_settings("k1").await.unwrap();
        assert!(!loaded.lock_events);
        assert!(!loaded.all_activity);
        // Other keys are unaffected
        assert!(service.notification_settings("k2").await.unwrap().lock_events);
    }

    #[tokio::test]
    async fn test_corrupt_document_falls_back_to_defaults() {
        let (service, store) = service();
        store
            .set("security_settings_k1_u1", "{oops".to_string())
            .await
            .unwrap();
        assert_eq!(
            service.security_settings("k1").await.unwrap(),
            SecuritySettings::default()
        );
    }

    #[tokio::test]
    async fn test_require_pin_needs_a_pin() {
        let (service, _store) = service();
        let secure = SecuritySettings {
            require_pin: true,
            ..SecuritySettings::default()
        };
        assert!(matches!(
            service.save_security_settings("k1", secure, None).await,
            Err(Error::PinRequired)
        ));

        service.pin().set_pin("4321", None).await.unwrap();
        service
            .save_security_settings("k1", secure, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_pin_protected_key_gates_changes() {
        let (service, _store) = service();
        service.pin().set_pin("4321", None).await.unwrap();
        let secure = SecuritySettings {
            require_pin: true,
            ..SecuritySettings::default()
        };
        service
            .save_security_settings("k1", secure, None)
            .await
            .unwrap();

        assert!(matches!(
            service
                .update_notification_settings("k1", &[(LockEvents, false)], None)
                .await,
            Err(Error::PinRequired)
        ));
        assert!(matches!(
            service
                .update_notification_settings("k1", &[(LockEvents, false)], Some("0000"))
                .await,
            Err(Error::PinMismatch)
        ));
        service
            .update_notification_settings("k1", &[(LockEvents, false)], Some("4321"))
            .await
            .unwrap();
    }
}
