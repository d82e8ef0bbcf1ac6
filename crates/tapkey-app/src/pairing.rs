//! Device pairing state machine
//!
//! ```text
//! awaiting_start --(begin)--> scanning
//! scanning --(tag)--> succeeded(tag_id)
//! scanning --(timeout | error)--> failed(reason)
//! failed --(retry)--> awaiting_start
//! succeeded --(confirm)--> key created, back to awaiting_start
//! ```
//!
//! [`PairingAttempt`] holds the transitions and is free of I/O.
//! [`PairingFlow`] drives it against an [`NfcSession`].

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use tapkey_core::prelude::*;
use tapkey_core::{ActivityEntry, KeyRecord, LockAction, NewKey, TagReadEvent};
use tapkey_nfc::{NfcBackend, NfcSession, TagListener};

use crate::store::RemoteStore;

/// Default time a pairing scan waits for a tag
pub const DEFAULT_PAIRING_TIMEOUT: Duration = Duration::from_secs(30);

/// Why a pairing attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PairingFailure {
    Timeout,
    Unsupported,
    PermissionDenied,
    HardwareUnavailable,
    /// The scan was stopped underneath the attempt
    SessionClosed,
}

impl PairingFailure {
    pub fn from_error(err: &Error) -> Self {
        match err {
            Error::Timeout { .. } => PairingFailure::Timeout,
            Error::UnsupportedCapability => PairingFailure::Unsupported,
            Error::PermissionDenied { .. } => PairingFailure::PermissionDenied,
            Error::SessionDisposed | Error::ChannelClosed => PairingFailure::SessionClosed,
            _ => PairingFailure::HardwareUnavailable,
        }
    }

    pub fn notice(&self) -> &'static str {
        match self {
            PairingFailure::Timeout => "No key detected. Hold the tag closer and retry.",
            PairingFailure::Unsupported => "NFC is not available on this device",
            PairingFailure::PermissionDenied => "NFC permission was denied",
            PairingFailure::HardwareUnavailable => "NFC is turned off or busy. Try again.",
            PairingFailure::SessionClosed => "Scan was cancelled",
        }
    }
}

/// Observable step of a pairing attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum PairingStep {
    AwaitingStart,
    Scanning,
    Succeeded { tag_id: String },
    Failed { reason: PairingFailure },
}

impl PairingStep {
    pub fn name(&self) -> &'static str {
        match self {
            PairingStep::AwaitingStart => "awaiting_start",
            PairingStep::Scanning => "scanning",
            PairingStep::Succeeded { .. } => "succeeded",
            PairingStep::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PairingStep::Succeeded { .. } | PairingStep::Failed { .. }
        )
    }

    pub fn tag_id(&self) -> Option<&str> {
        match self {
            PairingStep::Succeeded { tag_id } => Some(tag_id),
            _ => None,
        }
    }
}

/// Pure pairing transitions.
///
/// Terminal steps are latched: once `succeeded` or `failed` is reached,
/// further tag, timeout and error inputs are ignored until `retry`.
#[derive(Debug, Clone)]
pub struct PairingAttempt {
    step: PairingStep,
    timeout: Duration,
    deadline: Option<Instant>,
}

impl PairingAttempt {
    pub fn new(timeout: Duration) -> Self {
        Self {
            step: PairingStep::AwaitingStart,
            timeout,
            deadline: None,
        }
    }

    pub fn step(&self) -> &PairingStep {
        &self.step
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// When the running scan auto-fails; `None` outside `scanning`
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn begin(&mut self, now: Instant) -> Result<()> {
        if self.step != PairingStep::AwaitingStart {
            return Err(Error::invalid_transition(self.step.name(), "begin"));
        }
        self.step = PairingStep::Scanning;
        self.deadline = Some(now + self.timeout);
        Ok(())
    }

    /// Returns `true` if the tag completed the attempt
    pub fn on_tag(&mut self, tag_id: &str) -> bool {
        if self.step != PairingStep::Scanning {
            return false;
        }
        self.deadline = None;
        self.step = PairingStep::Succeeded {
            tag_id: tag_id.to_string(),
        };
        true
    }

    /// Returns `true` if the timeout failed the attempt
    pub fn on_timeout(&mut self) -> bool {
        self.fail(PairingFailure::Timeout)
    }

    pub fn on_error(&mut self, err: &Error) -> bool {
        self.fail(PairingFailure::from_error(err))
    }

    fn fail(&mut self, reason: PairingFailure) -> bool {
        if self.step != PairingStep::Scanning {
            return false;
        }
        self.deadline = None;
        self.step = PairingStep::Failed { reason };
        true
    }

    pub fn retry(&mut self) -> Result<()> {
        if !matches!(self.step, PairingStep::Failed { .. }) {
            return Err(Error::invalid_transition(self.step.name(), "retry"));
        }
        self.step = PairingStep::AwaitingStart;
        Ok(())
    }

    /// Return to `awaiting_start` after a confirmed pairing
    fn finish(&mut self) {
        self.step = PairingStep::AwaitingStart;
        self.deadline = None;
    }
}

/// Drives a [`PairingAttempt`] with a live NFC session.
pub struct PairingFlow<B> {
    session: Arc<NfcSession<B>>,
    attempt: Mutex<PairingAttempt>,
    step_tx: watch::Sender<PairingStep>,
    /// Stop issued on behalf of a `run` that was dropped mid-scan
    abandoned_stop: Mutex<Option<JoinHandle<()>>>,
}

/// Fails the attempt and releases the radio when `run` is dropped while
/// still scanning.
struct ScanGuard<'a, B: NfcBackend + Sync + 'static> {
    flow: &'a PairingFlow<B>,
}

impl<B: NfcBackend + Sync + 'static> Drop for ScanGuard<'_, B> {
    fn drop(&mut self) {
        let step = {
            let mut attempt = self.flow.attempt();
            if !attempt.on_error(&Error::ChannelClosed) {
                return;
            }
            attempt.step().clone()
        };
        warn!("pairing scan abandoned before completion");
        self.flow.publish(step);

        let session = Arc::clone(&self.flow.session);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let stop = handle.spawn(async move { session.stop_scan().await });
                *self.flow.abandoned_stop() = Some(stop);
            }
            Err(_) => error!("no runtime left to stop the abandoned pairing scan"),
        }
    }
}

impl<B: NfcBackend + Sync + 'static> PairingFlow<B> {
    pub fn new(session: Arc<NfcSession<B>>, timeout: Duration) -> Self {
        let (step_tx, _) = watch::channel(PairingStep::AwaitingStart);
        Self {
            session,
            attempt: Mutex::new(PairingAttempt::new(timeout)),
            step_tx,
            abandoned_stop: Mutex::new(None),
        }
    }

    fn abandoned_stop(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.abandoned_stop
            .lock()
            .unwrap_or_else(|p| p.into_inner())
    }

    pub fn step(&self) -> PairingStep {
        self.attempt().step.clone()
    }

    /// Observe step changes
    pub fn subscribe(&self) -> watch::Receiver<PairingStep> {
        self.step_tx.subscribe()
    }

    fn attempt(&self) -> MutexGuard<'_, PairingAttempt> {
        self.attempt.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn publish(&self, step: PairingStep) {
        debug!("pairing -> {}", step.name());
        self.step_tx.send_replace(step);
    }

    /// Begin scanning and wait until a tag arrives, the timeout fires or the
    /// scan fails. Returns the terminal step.
    ///
    /// NFC failures end in [`PairingStep::Failed`]; only an out-of-order
    /// call (e.g. `run` while already scanning) is an `Err`. Dropping the
    /// returned future mid-scan leaves the attempt in
    /// `failed(session_closed)` and stops the scan.
    pub async fn run(&self) -> Result<PairingStep> {
        let pending_stop = self.abandoned_stop().take();
        if let Some(stop) = pending_stop {
            if let Err(e) = stop.await {
                warn!("stop of abandoned pairing scan failed: {}", e);
            }
        }

        let deadline = {
            let mut attempt = self.attempt();
            attempt.begin(Instant::now())?;
            attempt.deadline().unwrap_or_else(Instant::now)
        };
        self.publish(PairingStep::Scanning);
        let _guard = ScanGuard { flow: self };

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let listener: TagListener = Arc::new(move |event: &TagReadEvent| {
            let _ = tx.send(event.serial_number.clone());
        });

        if let Err(e) = self.session.start_scan(Some(listener)).await {
            warn!("pairing scan could not start: {}", e);
            let step = {
                let mut attempt = self.attempt();
                attempt.on_error(&e);
                attempt.step().clone()
            };
            self.publish(step.clone());
            return Ok(step);
        }
        info!(
            "pairing scan running, timeout {}s",
            self.attempt().timeout().as_secs()
        );

        // A tag that is ready in the same turn as the deadline wins
        let completed = tokio::select! {
            biased;
            tag = rx.recv() => {
                let mut attempt = self.attempt();
                match tag {
                    Some(tag_id) => attempt.on_tag(&tag_id),
                    None => attempt.on_error(&Error::ChannelClosed),
                }
            }
            _ = tokio::time::sleep_until(deadline) => self.attempt().on_timeout(),
        };
        drop(rx);

        self.session.stop_scan().await;

        let step = self.step();
        if completed {
            match &step {
                PairingStep::Succeeded { tag_id } => info!("paired tag {}", tag_id),
                PairingStep::Failed { reason } => warn!("pairing failed: {:?}", reason),
                _ => {}
            }
        }
        self.publish(step.clone());
        Ok(step)
    }

    /// Create the key for the detected tag and log a `pair` activity entry.
    pub async fn confirm<S>(&self, name: &str, owner_id: &str, store: &S) -> Result<KeyRecord>
    where
        S: RemoteStore,
    {
        let tag_id = {
            let attempt = self.attempt();
            match attempt.step().tag_id() {
                Some(tag_id) => tag_id.to_string(),
                None => return Err(Error::invalid_transition(attempt.step().name(), "confirm")),
            }
        };

        let key = store
            .create_key(NewKey {
                owner_id: owner_id.to_string(),
                name: name.to_string(),
                tag_id,
            })
            .await
            .map_err(|e| e.into_write_error())?;

        if let Err(e) = store
            .append_activity(ActivityEntry::now(&key.id, owner_id, LockAction::Pair))
            .await
        {
            warn!("failed to log pairing of key {}: {}", key.id, e);
        }

        self.attempt().finish();
        self.publish(PairingStep::AwaitingStart);
        info!("key {} created for tag {}", key.id, key.tag_id);
        Ok(key)
    }

    /// `failed -> awaiting_start`
    pub fn retry(&self) -> Result<()> {
        self.attempt().retry()?;
        self.publish(PairingStep::AwaitingStart);
        Ok(())
    }
}
