//! End-to-end scenarios for pairing, lock toggling and read-state merging

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;

use tapkey_app::{
    reconcile, LockController, MemoryRemoteStore, MemoryStore, PairingFailure, PairingFlow,
    PairingStep, ReadStateService, StoreError, StoreOp,
};
use tapkey_core::{KeyRecord, TagReadEvent};
use tapkey_nfc::test_utils::FakeBackend;
use tapkey_nfc::{NfcCapability, NfcSession, TagListener};

fn ids(values: &[&str]) -> BTreeSet<String> {
    values.iter().map(|s| s.to_string()).collect()
}

async fn until_scanning(session: &NfcSession<FakeBackend>) {
    while !session.is_scanning() {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn simulated_tag_pairs_and_releases_radio() {
    let session = Arc::new(NfcSession::new(FakeBackend::new()));
    let flow = Arc::new(PairingFlow::new(Arc::clone(&session), Duration::from_secs(30)));

    // A second observer on the same scan sees the synthesized event too
    let seen: Arc<Mutex<Vec<TagReadEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let runner = tokio::spawn({
        let flow = Arc::clone(&flow);
        async move { flow.run().await }
    });
    until_scanning(&session).await;
    let sink = Arc::clone(&seen);
    let observer: TagListener = Arc::new(move |event: &TagReadEvent| {
        sink.lock().unwrap().push(event.clone());
    });
    session.start_scan(Some(observer)).await.unwrap();
    assert_eq!(session.backend().scan_starts(), 1);

    assert_eq!(session.simulate_tag_detection("abc123"), 2);

    let step = runner.await.unwrap().unwrap();
    assert_eq!(
        step,
        PairingStep::Succeeded {
            tag_id: "abc123".to_string()
        }
    );
    assert_eq!(session.capability(), NfcCapability::Idle);
    assert_eq!(session.subscriber_count(), 0);
    assert_eq!(*seen.lock().unwrap(), vec![TagReadEvent::new("abc123")]);
}

#[tokio::test(start_paused = true)]
async fn no_tag_times_out_after_thirty_seconds() {
    let session = Arc::new(NfcSession::new(FakeBackend::new()));
    let flow = PairingFlow::new(Arc::clone(&session), Duration::from_secs(30));
    let started = tokio::time::Instant::now();

    let step = flow.run().await.unwrap();

    assert_eq!(
        step,
        PairingStep::Failed {
            reason: PairingFailure::Timeout
        }
    );
    assert_eq!(started.elapsed(), Duration::from_secs(30));
    assert_eq!(session.backend().stops(), 1);

    // Nothing left to deliver to
    assert_eq!(session.simulate_tag_detection("late"), 0);
    assert_eq!(flow.step(), step);
}

#[tokio::test(start_paused = true)]
async fn tag_and_timeout_ready_together_tag_wins() {
    let session = Arc::new(NfcSession::new(FakeBackend::new()));
    let flow = Arc::new(PairingFlow::new(Arc::clone(&session), Duration::from_secs(30)));
    let runner = tokio::spawn({
        let flow = Arc::clone(&flow);
        async move { flow.run().await }
    });
    until_scanning(&session).await;

    tokio::time::advance(Duration::from_millis(29_999)).await;
    session.simulate_tag_detection("edge");
    tokio::time::advance(Duration::from_millis(1)).await;

    let step = runner.await.unwrap().unwrap();
    assert_eq!(step.tag_id(), Some("edge"));
    assert_eq!(session.backend().stops(), 1);
}

#[tokio::test]
async fn read_sets_merge_on_refresh() {
    assert_eq!(reconcile(&ids(&["1", "2"]), &ids(&["2", "3"])), ids(&["1", "2", "3"]));

    let local = Arc::new(MemoryStore::new());
    let remote = Arc::new(MemoryRemoteStore::new());
    remote.seed_read_notifications("u1", &["2", "3"]);
    let service = ReadStateService::new(Arc::clone(&local), Arc::clone(&remote), "u1");
    service.mark_read("1").await.unwrap();

    let report = service.refresh().await;
    assert_eq!(report.read_ids, ids(&["1", "2", "3"]));
    assert_eq!(remote.read_ids("u1"), ids(&["1", "2", "3"]));
}

#[tokio::test]
async fn failed_unlock_rolls_back_to_locked() {
    let store = Arc::new(MemoryRemoteStore::new());
    let key = KeyRecord {
        id: "key-1".to_string(),
        owner_id: "u1".to_string(),
        name: "Front door".to_string(),
        tag_id: "abc123".to_string(),
        is_locked: true,
        created_at: Utc::now(),
    };
    store.insert_key(key.clone());
    store.fail_next(StoreOp::SetLockState, StoreError::unreachable());

    let controller = LockController::new(Arc::clone(&store), &key, "u1");
    let err = controller.toggle().await.unwrap_err();

    let view = controller.view();
    assert!(view.locked);
    assert!(!view.pending);
    assert!(!err.notice().is_empty());
}
