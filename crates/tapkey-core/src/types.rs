//! Core domain type definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque identifier of a key record in the backend store
pub type KeyId = String;

/// Session-scoped identifier of the signed-in user
pub type UserId = String;

/// Action recorded in the key activity log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockAction {
    Lock,
    Unlock,
    Pair,
}

impl LockAction {
    /// The action that moves a lock into `locked`
    pub fn for_target(locked: bool) -> Self {
        if locked {
            LockAction::Lock
        } else {
            LockAction::Unlock
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LockAction::Lock => "lock",
            LockAction::Unlock => "unlock",
            LockAction::Pair => "pair",
        }
    }
}

impl std::fmt::Display for LockAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row appended to `key_activity` on every lock/unlock/pair action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub key_id: KeyId,
    pub user_id: UserId,
    pub action: LockAction,
    pub performed_at: DateTime<Utc>,
}

impl ActivityEntry {
    /// Create an entry stamped with the current time
    pub fn now(key_id: impl Into<KeyId>, user_id: impl Into<UserId>, action: LockAction) -> Self {
        Self {
            key_id: key_id.into(),
            user_id: user_id.into(),
            action,
            performed_at: Utc::now(),
        }
    }
}

/// A key row in the backend store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    pub id: KeyId,
    pub owner_id: UserId,
    pub name: String,
    /// Hardware serial of the paired tag, kept opaque
    pub tag_id: String,
    pub is_locked: bool,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for a newly paired key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewKey {
    pub owner_id: UserId,
    pub name: String,
    pub tag_id: String,
}

/// Level of access granted when sharing a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    /// Can see the key and its activity
    View,
    /// Can lock and unlock
    #[default]
    Control,
    /// Can also share and change settings
    Admin,
}

impl std::fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PermissionLevel::View => write!(f, "view"),
            PermissionLevel::Control => write!(f, "control"),
            PermissionLevel::Admin => write!(f, "admin"),
        }
    }
}

/// A row in `key_permissions`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPermission {
    pub id: String,
    pub key_id: KeyId,
    pub granted_by: UserId,
    pub recipient_email: String,
    pub level: PermissionLevel,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for `key_permissions`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPermission {
    pub key_id: KeyId,
    pub granted_by: UserId,
    pub recipient_email: String,
    pub level: PermissionLevel,
}

/// A row in `profiles`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: UserId,
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl Profile {
    /// Name to show other users: display name, else the email
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.email)
    }
}

/// Kind of notification shown in the inbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Locked,
    Unlocked,
    AccessShared,
    SecurityAlert,
}

/// A notification delivered to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub key_id: Option<KeyId>,
    pub kind: NotificationKind,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Severity of a user-facing notice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// Short human-readable message surfaced to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

impl From<&crate::error::Error> for Notice {
    fn from(err: &crate::error::Error) -> Self {
        Notice::error(err.notice())
    }
}
