//! NFC session management
//!
//! [`NfcSession`] owns the platform backend and multiplexes one physical scan
//! over any number of listeners. It is constructed explicitly and handed to
//! whoever needs it, so tests can run against a fake backend without any
//! process-wide state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use tapkey_core::prelude::*;
use tapkey_core::TagReadEvent;

use crate::backend::NfcBackend;

/// Callback invoked for every tag-read event of the active scan
pub type TagListener = Arc<dyn Fn(&TagReadEvent) + Send + Sync>;

/// Delay the simulation path uses to mimic host-card emulation latency
pub const DEFAULT_EMULATION_DELAY: Duration = Duration::from_secs(2);

/// Current hardware/permission state of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NfcCapability {
    /// The platform has no usable NFC
    Unsupported,
    /// Supported, radio not in use
    Idle,
    /// A scan is active and listeners are receiving events
    Scanning,
    /// A host-card emulation is in progress
    Emulating,
}

/// Handle for removing a single listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Shared between the session and its event pump task.
struct Registry {
    capability: NfcCapability,
    /// Ordered observer list; insertion order is delivery order
    subscribers: Vec<(SubscriptionId, TagListener)>,
    /// Bumped on every scan start and stop so a pump from an old scan
    /// cannot deliver into a new one
    generation: u64,
    pump: Option<JoinHandle<()>>,
    disposed: bool,
}

impl Registry {
    fn listeners_for(&self, generation: u64) -> Vec<TagListener> {
        if self.capability != NfcCapability::Scanning || self.generation != generation {
            return Vec::new();
        }
        self.subscribers.iter().map(|(_, l)| Arc::clone(l)).collect()
    }
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Invoke every listener of `generation` with `event`.
///
/// Listeners run outside the registry lock so they may call back into the
/// session (e.g. to stop the scan).
fn dispatch(registry: &Mutex<Registry>, generation: u64, event: &TagReadEvent) -> usize {
    let listeners = lock(registry).listeners_for(generation);
    for listener in &listeners {
        listener(event);
    }
    listeners.len()
}

/// Forward hardware events into the listener list until the scan ends.
async fn pump(
    registry: Arc<Mutex<Registry>>,
    generation: u64,
    mut rx: mpsc::UnboundedReceiver<TagReadEvent>,
) {
    while let Some(event) = rx.recv().await {
        trace!("tag read: {}", event.serial_number);
        let delivered = dispatch(&registry, generation, &event);
        if delivered == 0 {
            debug!(
                "dropped tag {} from stale scan generation {}",
                event.serial_number, generation
            );
        }
    }
    debug!("tag pump for generation {} finished", generation);
}

/// Lifecycle owner of the single NFC radio.
pub struct NfcSession<B> {
    backend: B,
    registry: Arc<Mutex<Registry>>,
    /// Serializes start/stop so concurrent starts fan out onto one scan
    transition: tokio::sync::Mutex<()>,
    next_subscription: AtomicU64,
    emulation_timeout: Option<Duration>,
}

impl<B: NfcBackend> NfcSession<B> {
    pub fn new(backend: B) -> Self {
        let capability = if backend.is_supported() {
            NfcCapability::Idle
        } else {
            NfcCapability::Unsupported
        };

        Self {
            backend,
            registry: Arc::new(Mutex::new(Registry {
                capability,
                subscribers: Vec::new(),
                generation: 0,
                pump: None,
                disposed: false,
            })),
            transition: tokio::sync::Mutex::new(()),
            next_subscription: AtomicU64::new(1),
            emulation_timeout: None,
        }
    }

    /// Abort emulation if the backend takes longer than `timeout`
    pub fn with_emulation_timeout(mut self, timeout: Duration) -> Self {
        self.emulation_timeout = Some(timeout);
        self
    }

    /// Access the underlying backend
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Pure capability probe; never fails.
    pub fn is_supported(&self) -> bool {
        self.backend.is_supported()
    }

    pub fn capability(&self) -> NfcCapability {
        lock(&self.registry).capability
    }

    pub fn is_scanning(&self) -> bool {
        self.capability() == NfcCapability::Scanning
    }

    /// Number of listeners attached to the active scan
    pub fn subscriber_count(&self) -> usize {
        lock(&self.registry).subscribers.len()
    }

    fn check_usable(&self) -> Result<()> {
        let reg = lock(&self.registry);
        if reg.disposed {
            return Err(Error::SessionDisposed);
        }
        if reg.capability == NfcCapability::Unsupported || !self.backend.is_supported() {
            return Err(Error::UnsupportedCapability);
        }
        Ok(())
    }

    fn next_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed))
    }

    /// Start scanning, or attach to the scan that is already running.
    ///
    /// The hardware scan is started at most once; every further call while
    /// scanning only registers `listener` and returns immediately.
    pub async fn start_scan(&self, listener: Option<TagListener>) -> Result<SubscriptionId> {
        let _transition = self.transition.lock().await;
        self.check_usable()?;

        let id = self.next_id();
        {
            let mut reg = lock(&self.registry);
            if reg.capability == NfcCapability::Scanning {
                if let Some(listener) = listener {
                    reg.subscribers.push((id, listener));
                }
                debug!(
                    "attached listener {:?} to running scan ({} total)",
                    id,
                    reg.subscribers.len()
                );
                return Ok(id);
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        if let Err(e) = self.backend.scan(tx).await {
            warn!("NFC scan failed to start: {}", e);
            let err = Error::from(e);
            if matches!(err, Error::UnsupportedCapability) {
                lock(&self.registry).capability = NfcCapability::Unsupported;
            }
            return Err(err);
        }

        let mut reg = lock(&self.registry);
        reg.generation += 1;
        reg.capability = NfcCapability::Scanning;
        if let Some(listener) = listener {
            reg.subscribers.push((id, listener));
        }
        let generation = reg.generation;
        reg.pump = Some(tokio::spawn(pump(
            Arc::clone(&self.registry),
            generation,
            rx,
        )));
        info!("NFC scan started (generation {})", generation);

        Ok(id)
    }

    /// Detach one listener. The scan keeps running for the others.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut reg = lock(&self.registry);
        let before = reg.subscribers.len();
        reg.subscribers.retain(|(sid, _)| *sid != id);
        reg.subscribers.len() != before
    }

    /// Stop the active scan, drop every listener and release the radio.
    ///
    /// Safe to call when not scanning.
    pub async fn stop_scan(&self) {
        let _transition = self.transition.lock().await;

        let pump = {
            let mut reg = lock(&self.registry);
            if reg.capability != NfcCapability::Scanning {
                trace!("stop_scan: not scanning");
                return;
            }
            reg.subscribers.clear();
            reg.capability = NfcCapability::Idle;
            reg.generation += 1;
            reg.pump.take()
        };

        if let Some(pump) = pump {
            pump.abort();
        }
        self.backend.stop().await;
        info!("NFC scan stopped");
    }

    /// Write `payload` to the next presented tag.
    ///
    /// Independent of any ongoing scan.
    pub async fn write_tag(&self, payload: &str) -> Result<()> {
        self.check_usable()?;
        debug!("writing {} bytes to tag", payload.len());
        self.backend.write(payload).await?;
        info!("NFC tag written");
        Ok(())
    }

    /// Emulate a card carrying `correlation_id`; resolves with the same id.
    pub async fn emulate_nfc(&self, correlation_id: &str) -> Result<String> {
        self.check_usable()?;

        let entered = {
            let mut reg = lock(&self.registry);
            if reg.capability == NfcCapability::Idle {
                reg.capability = NfcCapability::Emulating;
                true
            } else {
                false
            }
        };

        let result = match self.emulation_timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, self.backend.emulate(correlation_id)).await {
                    Ok(result) => result.map_err(Error::from),
                    Err(_) => {
                        warn!("emulation of {} timed out after {:?}", correlation_id, limit);
                        Err(Error::Timeout {
                            secs: limit.as_secs(),
                        })
                    }
                }
            }
            None => self
                .backend
                .emulate(correlation_id)
                .await
                .map_err(Error::from),
        };

        if entered {
            let mut reg = lock(&self.registry);
            if reg.capability == NfcCapability::Emulating {
                reg.capability = NfcCapability::Idle;
            }
        }

        result?;
        info!("NFC emulation completed for {}", correlation_id);
        Ok(correlation_id.to_string())
    }

    /// Deliver a synthesized tag read to every listener of the active scan.
    ///
    /// Used when no physical tag is available. Returns the number of
    /// listeners notified; zero when no scan is running.
    pub fn simulate_tag_detection(&self, serial: &str) -> usize {
        self.simulate_event(TagReadEvent::new(serial))
    }

    /// Like [`simulate_tag_detection`](Self::simulate_tag_detection) with a
    /// fully specified event.
    pub fn simulate_event(&self, event: TagReadEvent) -> usize {
        let generation = lock(&self.registry).generation;
        let delivered = dispatch(&self.registry, generation, &event);
        if delivered == 0 {
            debug!("simulated tag {} had no listeners", event.serial_number);
        } else {
            info!(
                "simulated tag {} delivered to {} listener(s)",
                event.serial_number, delivered
            );
        }
        delivered
    }

    /// Tear the session down. Further scans fail with
    /// [`Error::SessionDisposed`].
    pub async fn dispose(&self) {
        self.stop_scan().await;
        lock(&self.registry).disposed = true;
        debug!("NFC session disposed");
    }
}

impl<B> Drop for NfcSession<B> {
    fn drop(&mut self) {
        if let Some(pump) = lock(&self.registry).pump.take() {
            pump.abort();
        }
    }
}

impl<B> std::fmt::Debug for NfcSession<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reg = lock(&self.registry);
        f.debug_struct("NfcSession")
            .field("capability", &reg.capability)
            .field("subscribers", &reg.subscribers.len())
            .field("generation", &reg.generation)
            .field("disposed", &reg.disposed)
            .finish()
    }
}
