//! Configuration types for tapkey
//!
//! Defines `Settings` (`.tapkey/config.toml`) and its sections.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Application settings (.tapkey/config.toml)
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub nfc: NfcSettings,

    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub session: SessionSettings,

    #[serde(default)]
    pub notifications: NotificationSyncSettings,
}

/// NFC behaviour
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct NfcSettings {
    /// Seconds a pairing scan waits for a tag
    #[serde(default = "default_pairing_timeout_secs")]
    pub pairing_timeout_secs: u64,

    /// Latency of simulated card emulation
    #[serde(default = "default_emulation_delay_ms")]
    pub emulation_delay_ms: u64,

    /// Emulation fails with a timeout after this many seconds
    #[serde(default = "default_emulation_timeout_secs")]
    pub emulation_timeout_secs: u64,

    /// Use the simulated backend; without it no NFC is available
    #[serde(default = "default_true")]
    pub simulate: bool,
}

impl Default for NfcSettings {
    fn default() -> Self {
        Self {
            pairing_timeout_secs: default_pairing_timeout_secs(),
            emulation_delay_ms: default_emulation_delay_ms(),
            emulation_timeout_secs: default_emulation_timeout_secs(),
            simulate: true,
        }
    }
}

impl NfcSettings {
    pub fn pairing_timeout(&self) -> Duration {
        Duration::from_secs(self.pairing_timeout_secs)
    }

    pub fn emulation_delay(&self) -> Duration {
        Duration::from_millis(self.emulation_delay_ms)
    }

    pub fn emulation_timeout(&self) -> Duration {
        Duration::from_secs(self.emulation_timeout_secs)
    }
}

fn default_pairing_timeout_secs() -> u64 {
    30
}

fn default_emulation_delay_ms() -> u64 {
    2000
}

fn default_emulation_timeout_secs() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

/// Local storage location
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct StorageSettings {
    /// Defaults to the platform data dir when unset
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl StorageSettings {
    /// Resolved storage directory
    pub fn resolve_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("tapkey")
        })
    }
}

/// Signed-in user
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SessionSettings {
    #[serde(default = "default_user_id")]
    pub user_id: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            user_id: default_user_id(),
        }
    }
}

fn default_user_id() -> String {
    "local-user".to_string()
}

/// Notification read-state sync
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct NotificationSyncSettings {
    /// Reconcile read state when notifications are first loaded
    #[serde(default = "default_true")]
    pub refresh_on_load: bool,
}

impl Default for NotificationSyncSettings {
    fn default() -> Self {
        Self {
            refresh_on_load: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.nfc.pairing_timeout(), Duration::from_secs(30));
        assert_eq!(settings.nfc.emulation_delay(), Duration::from_secs(2));
        assert_eq!(settings.nfc.emulation_timeout(), Duration::from_secs(10));
        assert!(settings.nfc.simulate);
        assert!(settings.notifications.refresh_on_load);
        assert!(settings.storage.data_dir.is_none());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let settings: Settings = toml::from_str(
            r#"
[nfc]
pairing_timeout_secs = 10
"#,
        )
        .unwrap();
        assert_eq!(settings.nfc.pairing_timeout_secs, 10);
        assert_eq!(settings.nfc.emulation_delay_ms, 2000);
        assert_eq!(settings.session.user_id, "local-user");
    }

    #[test]
    fn test_explicit_data_dir() {
        let storage = StorageSettings {
            data_dir: Some(PathBuf::from("/tmp/tk")),
        };
        assert_eq!(storage.resolve_data_dir(), PathBuf::from("/tmp/tk"));
        assert!(StorageSettings::default()
            .resolve_data_dir()
            .ends_with("tapkey"));
    }
}
