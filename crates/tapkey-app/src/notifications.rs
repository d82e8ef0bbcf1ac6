//! Notification read-state reconciliation
//!
//! The device keeps its own set of read notification ids and the backend
//! keeps another. Both are merged with a set union, so reading on one side
//! is never undone by the other.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

use tapkey_core::prelude::*;
use tapkey_core::{Notice, Notification, UserId};

use crate::storage::{self, KeyValueStore};
use crate::store::RemoteStore;

/// Merge two read sets.
///
/// Idempotent, commutative and monotonic: the result contains every id of
/// both inputs and nothing else.
pub fn reconcile(local: &BTreeSet<String>, remote: &BTreeSet<String>) -> BTreeSet<String> {
    local.union(remote).cloned().collect()
}

/// Notifications whose id is not in `read`, in input order
pub fn unread<'a>(
    notifications: &'a [Notification],
    read: &BTreeSet<String>,
) -> Vec<&'a Notification> {
    notifications
        .iter()
        .filter(|n| !read.contains(&n.id))
        .collect()
}

/// Outcome of a reconcile-and-persist pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub read_ids: BTreeSet<String>,
    /// Non-fatal problems, e.g. the backend could not be updated
    pub warnings: Vec<Notice>,
}

/// Owns the in-memory read set of one user and keeps both stores in step.
pub struct ReadStateService<K, S> {
    local: Arc<K>,
    remote: Arc<S>,
    user_id: UserId,
    read: Mutex<BTreeSet<String>>,
    /// One reconcile/persist pass at a time
    serial: tokio::sync::Mutex<()>,
}

impl<K: KeyValueStore, S: RemoteStore> ReadStateService<K, S> {
    pub fn new(local: Arc<K>, remote: Arc<S>, user_id: impl Into<UserId>) -> Self {
        Self {
            local,
            remote,
            user_id: user_id.into(),
            read: Mutex::new(BTreeSet::new()),
            serial: tokio::sync::Mutex::new(()),
        }
    }

    fn read(&self) -> MutexGuard<'_, BTreeSet<String>> {
        self.read.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn read_ids(&self) -> BTreeSet<String> {
        self.read().clone()
    }

    pub fn is_read(&self, id: &str) -> bool {
        self.read().contains(id)
    }

    fn storage_key(&self) -> String {
        storage::read_notifications_key(&self.user_id)
    }

    /// Fetch the user's notifications, newest first
    pub async fn fetch_notifications(&self) -> Result<Vec<Notification>> {
        self.remote
            .fetch_notifications(&self.user_id)
            .await
            .map_err(|e| e.into_read_error())
    }

    /// Stored local read set; an unreadable document counts as empty and
    /// adds a warning.
    async fn load_local(&self, warnings: &mut Vec<Notice>) -> BTreeSet<String> {
        match storage::get_json(self.local.as_ref(), &self.storage_key()).await {
            Ok(ids) => ids.unwrap_or_default(),
            Err(e) => {
                warn!("could not read local read-state: {}", e);
                warnings.push(Notice::warning("Local read state could not be loaded"));
                BTreeSet::new()
            }
        }
    }

    /// Load both read sets, merge them and write the union back to both
    /// sides. Failures on either side become warnings; the merged set is
    /// used regardless.
    pub async fn refresh(&self) -> SyncReport {
        let _serial = self.serial.lock().await;
        let mut warnings = Vec::new();

        let local = self.load_local(&mut warnings).await;

        let remote = match self.remote.fetch_read_notifications(&self.user_id).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!("could not fetch remote read-state: {}", e);
                warnings.push(Notice::warning(e.into_read_error().notice()));
                BTreeSet::new()
            }
        };

        let merged = reconcile(&reconcile(&local, &remote), &self.read_ids());
        debug!(
            "read-state: {} local, {} remote, {} merged",
            local.len(),
            remote.len(),
            merged.len()
        );

        if merged != local {
            let saved =
                storage::set_json(self.local.as_ref(), &self.storage_key(), &merged).await;
            if let Err(e) = saved {
                warn!("could not persist local read-state: {}", e);
                warnings.push(Notice::warning("Read state could not be saved on this device"));
            }
        }
        if merged != remote {
            if let Some(notice) = self.push_remote(&merged).await {
                warnings.push(notice);
            }
        }

        *self.read() = merged.clone();
        SyncReport {
            read_ids: merged,
            warnings,
        }
    }

    pub async fn mark_read(&self, id: &str) -> Result<SyncReport> {
        self.mark_all_read(std::iter::once(id.to_string())).await
    }

    /// Mark every id as read.
    ///
    /// The new ids are merged with what is stored on the device, so marking
    /// before the first refresh keeps earlier reads. Nothing changes in
    /// memory unless the union was saved locally; the backend write
    /// afterwards may fail with only a warning.
    pub async fn mark_all_read<I>(&self, ids: I) -> Result<SyncReport>
    where
        I: IntoIterator<Item = String>,
    {
        let _serial = self.serial.lock().await;
        let mut warnings = Vec::new();

        let added: BTreeSet<String> = ids.into_iter().collect();
        let stored = self.load_local(&mut warnings).await;
        let merged = reconcile(&reconcile(&stored, &self.read_ids()), &added);

        storage::set_json(self.local.as_ref(), &self.storage_key(), &merged)
            .await
            .with_context(|| {
                format!("Failed to persist read notifications of {}", self.user_id)
            })?;
        *self.read() = merged.clone();

        if let Some(notice) = self.push_remote(&merged).await {
            warnings.push(notice);
        }

        Ok(SyncReport {
            read_ids: merged,
            warnings,
        })
    }

    async fn push_remote(&self, ids: &BTreeSet<String>) -> Option<Notice> {
        match self
            .remote
            .upsert_read_notifications(&self.user_id, ids)
            .await
        {
            Ok(()) => None,
            Err(e) => {
                warn!("could not persist remote read-state: {}", e);
                Some(Notice::warning("Read state will sync when you are back online"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::store::{MemoryRemoteStore, StoreError, StoreOp};
    use chrono::{Duration, Utc};
    use tapkey_core::NotificationKind;

    fn set(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn service() -> (
        ReadStateService<MemoryStore, MemoryRemoteStore>,
        Arc<MemoryStore>,
        Arc<MemoryRemoteStore>,
    ) {
        let local = Arc::new(MemoryStore::new());
        let remote = Arc::new(MemoryRemoteStore::new());
        let service = ReadStateService::new(Arc::clone(&local), Arc::clone(&remote), "u1");
        (service, local, remote)
    }

    fn notification(id: &str, minutes_ago: i64) -> Notification {
        Notification {
            id: id.to_string(),
            key_id: None,
            kind: NotificationKind::Locked,
            message: format!("notification {}", id),
            created_at: Utc::now() - Duration::minutes(minutes_ago),
        }
    }

    #[test]
    fn test_reconcile_union() {
        assert_eq!(reconcile(&set(&["1", "2"]), &set(&["2", "3"])), set(&["1", "2", "3"]));
    }

    #[test]
    fn test_reconcile_properties() {
        let samples = [set(&[]), set(&["a"]), set(&["a", "b"]), set(&["c", "d", "a"])];
        for a in &samples {
            assert_eq!(reconcile(a, a), *a, "idempotent");
            for b in &samples {
                let merged = reconcile(a, b);
                assert_eq!(merged, reconcile(b, a), "commutative");
                assert!(a.is_subset(&merged) && b.is_subset(&merged), "monotonic");
            }
        }
    }

    #[test]
    fn test_unread_filter_keeps_order() {
        let list = vec![notification("3", 1), notification("2", 2), notification("1", 3)];
        let unread = unread(&list, &set(&["2"]));
        let ids: Vec<_> = unread.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["3", "1"]);
    }

    #[tokio::test]
    async fn test_refresh_merges_and_persists_both_sides() {
        let (service, local, remote) = service();
        storage::set_json(local.as_ref(), "read_notifications_u1", &set(&["1", "2"]))
            .await
            .unwrap();
        remote.seed_read_notifications("u1", &["2", "3"]);

        let report = service.refresh().await;
        assert_eq!(report.read_ids, set(&["1", "2", "3"]));
        assert!(report.warnings.is_empty());

        let stored: Option<BTreeSet<String>> =
            storage::get_json(local.as_ref(), "read_notifications_u1").await.unwrap();
        assert_eq!(stored, Some(set(&["1", "2", "3"])));
        assert_eq!(remote.read_ids("u1"), set(&["1", "2", "3"]));
        assert!(service.is_read("3"));
    }

    #[tokio::test]
    async fn test_refresh_remote_failure_is_warning() {
        let (service, local, remote) = service();
        storage::set_json(local.as_ref(), "read_notifications_u1", &set(&["1"]))
            .await
            .unwrap();
        remote.seed_read_notifications("u1", &["2"]);
        remote.fail_next(StoreOp::UpsertReadNotifications, StoreError::unreachable());

        let report = service.refresh().await;
        assert_eq!(report.read_ids, set(&["1", "2"]));
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(service.read_ids(), set(&["1", "2"]));
    }

    #[tokio::test]
    async fn test_refresh_never_unreads() {
        let (service, local, remote) = service();
        // Known in memory only, neither store has it yet
        service.read().insert("9".to_string());

        let report = service.refresh().await;
        assert!(report.read_ids.contains("9"));
        assert!(remote.read_ids("u1").contains("9"));
        assert!(local.get("read_notifications_u1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_mark_read_persists_locally_and_remotely() {
        let (service, _local, remote) = service();
        let report = service.mark_read("n1").await.unwrap();
        assert_eq!(report.read_ids, set(&["n1"]));
        assert_eq!(remote.read_ids("u1"), set(&["n1"]));
    }

    #[tokio::test]
    async fn test_mark_read_before_refresh_keeps_stored_ids() {
        let (service, local, _remote) = service();
        storage::set_json(local.as_ref(), "read_notifications_u1", &set(&["1", "2"]))
            .await
            .unwrap();

        let report = service.mark_read("3").await.unwrap();
        assert_eq!(report.read_ids, set(&["1", "2", "3"]));
        let stored: Option<BTreeSet<String>> =
            storage::get_json(local.as_ref(), "read_notifications_u1").await.unwrap();
        assert_eq!(stored, Some(set(&["1", "2", "3"])));

        let report = service.refresh().await;
        assert_eq!(report.read_ids, set(&["1", "2", "3"]));
    }

    #[tokio::test]
    async fn test_mark_all_read_is_atomic_on_local_failure() {
        let (service, local, _remote) = service();
        service.mark_read("1").await.unwrap();
        local.set_fail_writes(true);

        let result = service
            .mark_all_read(vec!["2".to_string(), "3".to_string()])
            .await;
        assert!(result.is_err());
        assert_eq!(service.read_ids(), set(&["1"]));
    }

    #[tokio::test]
    async fn test_mark_all_read_remote_failure_still_applies() {
        let (service, _local, remote) = service();
        remote.fail_next(StoreOp::UpsertReadNotifications, StoreError::unreachable());

        let report = service
            .mark_all_read(vec!["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(report.read_ids, set(&["a", "b"]));
        assert_eq!(report.warnings.len(), 1);
        assert!(service.is_read("b"));
    }

    #[tokio::test]
    async fn test_fetch_notifications_newest_first() {
        let (service, _local, remote) = service();
        remote.insert_notification("u1", notification("old", 10));
        remote.insert_notification("u1", notification("new", 1));

        let list = service.fetch_notifications().await.unwrap();
        assert_eq!(list[0].id, "new");
        assert_eq!(list[1].id, "old");
    }
}
