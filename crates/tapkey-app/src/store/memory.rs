//! In-process backend store
//!
//! Mirrors the constraints of the hosted tables that the app relies on
//! (unique `(key_id, recipient_email)` permissions, set semantics for read
//! notifications) and supports scripted failures for exercising rollback
//! paths.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;

use tapkey_core::prelude::*;
use tapkey_core::{
    ActivityEntry, KeyPermission, KeyRecord, NewKey, NewPermission, Notification, Profile,
};

use super::{RemoteStore, StoreError, StoreResult, UNIQUE_VIOLATION};

/// Store operations that can be scripted to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    CreateKey,
    SetLockState,
    AppendActivity,
    InsertPermission,
    DeletePermission,
    FetchNotifications,
    FetchReadNotifications,
    UpsertReadNotifications,
}

#[derive(Debug, Default)]
struct Tables {
    keys: HashMap<String, KeyRecord>,
    activity: Vec<ActivityEntry>,
    permissions: Vec<KeyPermission>,
    profiles: HashMap<String, Profile>,
    notifications: HashMap<String, Vec<Notification>>,
    read_notifications: HashMap<String, BTreeSet<String>>,
}

#[derive(Debug, Default)]
pub struct MemoryRemoteStore {
    tables: Mutex<Tables>,
    failures: Mutex<HashMap<StoreOp, VecDeque<StoreError>>>,
    latency: Option<Duration>,
    next_id: AtomicU64,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every operation, simulating a network round trip
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make the next call of `op` fail with `err`
    pub fn fail_next(&self, op: StoreOp, err: StoreError) {
        self.failures
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entry(op)
            .or_default()
            .push_back(err);
    }

    pub fn insert_profile(&self, profile: Profile) {
        self.tables()
            .profiles
            .insert(profile.id.clone(), profile);
    }

    pub fn insert_notification(&self, user_id: &str, notification: Notification) {
        self.tables()
            .notifications
            .entry(user_id.to_string())
            .or_default()
            .push(notification);
    }

    /// Seed a key row directly
    pub fn insert_key(&self, key: KeyRecord) {
        self.tables().keys.insert(key.id.clone(), key);
    }

    /// Seed read ids directly
    pub fn seed_read_notifications(&self, user_id: &str, ids: &[&str]) {
        self.tables()
            .read_notifications
            .entry(user_id.to_string())
            .or_default()
            .extend(ids.iter().map(|s| s.to_string()));
    }

    pub fn activity(&self) -> Vec<ActivityEntry> {
        self.tables().activity.clone()
    }

    pub fn key(&self, key_id: &str) -> Option<KeyRecord> {
        self.tables().keys.get(key_id).cloned()
    }

    pub fn read_ids(&self, user_id: &str) -> BTreeSet<String> {
        self.tables()
            .read_notifications
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    fn tables(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    async fn round_trip(&self, op: Option<StoreOp>) -> StoreResult<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let Some(op) = op else {
            return Ok(());
        };
        let scripted = self
            .failures
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get_mut(&op)
            .and_then(|queue| queue.pop_front());
        match scripted {
            Some(err) => {
                debug!("scripted failure for {:?}: {}", op, err);
                Err(err)
            }
            None => Ok(()),
        }
    }
}

impl RemoteStore for MemoryRemoteStore {
    async fn create_key(&self, key: NewKey) -> StoreResult<KeyRecord> {
        self.round_trip(Some(StoreOp::CreateKey)).await?;
        let record = KeyRecord {
            id: self.next_id("key"),
            owner_id: key.owner_id,
            name: key.name,
            tag_id: key.tag_id,
            is_locked: true,
            created_at: Utc::now(),
        };
        self.tables()
            .keys
            .insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn get_key(&self, key_id: &str) -> StoreResult<Option<KeyRecord>> {
        self.round_trip(None).await?;
        Ok(self.key(key_id))
    }

    async fn set_lock_state(&self, key_id: &str, locked: bool) -> StoreResult<()> {
        self.round_trip(Some(StoreOp::SetLockState)).await?;
        let mut tables = self.tables();
        match tables.keys.get_mut(key_id) {
            Some(key) => {
                key.is_locked = locked;
                Ok(())
            }
            None => Err(StoreError::with_code("PGRST116", "key not found")),
        }
    }

    async fn append_activity(&self, entry: ActivityEntry) -> StoreResult<()> {
        self.round_trip(Some(StoreOp::AppendActivity)).await?;
        self.tables().activity.push(entry);
        Ok(())
    }

    async fn insert_permission(&self, permission: NewPermission) -> StoreResult<KeyPermission> {
        self.round_trip(Some(StoreOp::InsertPermission)).await?;
        let mut tables = self.tables();
        let duplicate = tables.permissions.iter().any(|p| {
            p.key_id == permission.key_id
                && p.recipient_email.eq_ignore_ascii_case(&permission.recipient_email)
        });
        if duplicate {
            return Err(StoreError::with_code(
                UNIQUE_VIOLATION,
                "duplicate key value violates unique constraint",
            ));
        }
        let row = KeyPermission {
            id: self.next_id("perm"),
            key_id: permission.key_id,
            granted_by: permission.granted_by,
            recipient_email: permission.recipient_email,
            level: permission.level,
            created_at: Utc::now(),
        };
        tables.permissions.push(row.clone());
        Ok(row)
    }

    async fn list_permissions(&self, key_id: &str) -> StoreResult<Vec<KeyPermission>> {
        self.round_trip(None).await?;
        Ok(self
            .tables()
            .permissions
            .iter()
            .filter(|p| p.key_id == key_id)
            .cloned()
            .collect())
    }

    async fn delete_permission(&self, permission_id: &str) -> StoreResult<()> {
        self.round_trip(Some(StoreOp::DeletePermission)).await?;
        self.tables().permissions.retain(|p| p.id != permission_id);
        Ok(())
    }

    async fn fetch_profile(&self, user_id: &str) -> StoreResult<Option<Profile>> {
        self.round_trip(None).await?;
        Ok(self.tables().profiles.get(user_id).cloned())
    }

    async fn fetch_notifications(&self, user_id: &str) -> StoreResult<Vec<Notification>> {
        self.round_trip(Some(StoreOp::FetchNotifications)).await?;
        let mut list = self
            .tables()
            .notifications
            .get(user_id)
            .cloned()
            .unwrap_or_default();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }

    async fn fetch_read_notifications(&self, user_id: &str) -> StoreResult<BTreeSet<String>> {
        self.round_trip(Some(StoreOp::FetchReadNotifications))
            .await?;
        Ok(self.read_ids(user_id))
    }

    async fn upsert_read_notifications(
        &self,
        user_id: &str,
        ids: &BTreeSet<String>,
    ) -> StoreResult<()> {
        self.round_trip(Some(StoreOp::UpsertReadNotifications))
            .await?;
        self.tables()
            .read_notifications
            .entry(user_id.to_string())
            .or_default()
            .extend(ids.iter().cloned());
        Ok(())
    }
}
