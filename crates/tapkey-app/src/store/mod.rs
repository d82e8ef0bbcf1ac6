//! Backend store abstraction
//!
//! The hosted backend exposes the `keys`, `key_activity`, `key_permissions`,
//! `read_notifications`, `notifications` and `profiles` tables. Everything in
//! this crate talks to it through [`RemoteStore`].

mod memory;

pub use memory::{MemoryRemoteStore, StoreOp};

use std::collections::BTreeSet;

use tapkey_core::prelude::*;
use tapkey_core::{
    ActivityEntry, KeyPermission, KeyRecord, NewKey, NewPermission, Notification, Profile,
};

/// Postgres `unique_violation`, as surfaced by the backend's REST layer
pub const UNIQUE_VIOLATION: &str = "23505";

/// Failure reported by the backend
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct StoreError {
    /// Backend error code, when one was returned
    pub code: Option<String>,
    pub message: String,
}

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    pub fn unreachable() -> Self {
        Self::new("backend unreachable")
    }

    pub fn is_unique_violation(&self) -> bool {
        self.code.as_deref() == Some(UNIQUE_VIOLATION)
            || self.message.contains("duplicate key value")
    }

    pub fn into_write_error(self) -> Error {
        Error::remote_write(self.message)
    }

    pub fn into_read_error(self) -> Error {
        Error::remote_read(self.message)
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Authenticated backend store operations used by the app
#[trait_variant::make(RemoteStore: Send)]
pub trait LocalRemoteStore {
    async fn create_key(&self, key: NewKey) -> StoreResult<KeyRecord>;

    async fn get_key(&self, key_id: &str) -> StoreResult<Option<KeyRecord>>;

    async fn set_lock_state(&self, key_id: &str, locked: bool) -> StoreResult<()>;

    async fn append_activity(&self, entry: ActivityEntry) -> StoreResult<()>;

    async fn insert_permission(&self, permission: NewPermission) -> StoreResult<KeyPermission>;

    async fn list_permissions(&self, key_id: &str) -> StoreResult<Vec<KeyPermission>>;

    async fn delete_permission(&self, permission_id: &str) -> StoreResult<()>;

    async fn fetch_profile(&self, user_id: &str) -> StoreResult<Option<Profile>>;

    async fn fetch_notifications(&self, user_id: &str) -> StoreResult<Vec<Notification>>;

    async fn fetch_read_notifications(&self, user_id: &str) -> StoreResult<BTreeSet<String>>;

    /// Insert any ids not yet recorded as read; existing rows are kept
    async fn upsert_read_notifications(
        &self,
        user_id: &str,
        ids: &BTreeSet<String>,
    ) -> StoreResult<()>;
}
