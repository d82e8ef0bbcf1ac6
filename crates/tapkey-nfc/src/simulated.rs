//! Simulated NFC backend for environments without a radio
//!
//! Scans always start, nothing is ever read unless a tag is presented with
//! [`SimulatedBackend::present_tag`] or the session's
//! `simulate_tag_detection` is used. Emulation resolves after a fixed delay
//! that stands in for hardware latency.

use std::sync::Mutex;
use std::time::Duration;

use tapkey_core::prelude::*;
use tapkey_core::TagReadEvent;

use crate::backend::{NfcBackend, PlatformError, PlatformErrorKind, TagSink};
use crate::session::DEFAULT_EMULATION_DELAY;

/// Backend used by the CLI and by development builds
#[derive(Debug)]
pub struct SimulatedBackend {
    supported: bool,
    emulation_delay: Duration,
    sink: Mutex<Option<TagSink>>,
    written: Mutex<Vec<String>>,
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self {
            supported: true,
            emulation_delay: DEFAULT_EMULATION_DELAY,
            sink: Mutex::new(None),
            written: Mutex::new(Vec::new()),
        }
    }

    /// A backend that reports no NFC capability at all
    pub fn unsupported() -> Self {
        Self {
            supported: false,
            ..Self::new()
        }
    }

    pub fn with_emulation_delay(mut self, delay: Duration) -> Self {
        self.emulation_delay = delay;
        self
    }

    /// Push a tag through the same channel a radio would use.
    ///
    /// Returns `false` when no scan is active.
    pub fn present_tag(&self, event: TagReadEvent) -> bool {
        let sink = self.sink.lock().unwrap_or_else(|p| p.into_inner());
        match sink.as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Payloads "written" so far
    pub fn written(&self) -> Vec<String> {
        self.written
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn unsupported_error() -> PlatformError {
        PlatformError::new(
            PlatformErrorKind::NotSupported,
            "simulated backend configured without NFC",
        )
    }
}

impl NfcBackend for SimulatedBackend {
    fn is_supported(&self) -> bool {
        self.supported
    }

    async fn scan(&self, sink: TagSink) -> std::result::Result<(), PlatformError> {
        if !self.supported {
            return Err(Self::unsupported_error());
        }
        debug!("simulated scan started");
        *self.sink.lock().unwrap_or_else(|p| p.into_inner()) = Some(sink);
        Ok(())
    }

    async fn stop(&self) {
        debug!("simulated scan stopped");
        self.sink.lock().unwrap_or_else(|p| p.into_inner()).take();
    }

    async fn write(&self, payload: &str) -> std::result::Result<(), PlatformError> {
        if !self.supported {
            return Err(Self::unsupported_error());
        }
        self.written
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(payload.to_string());
        Ok(())
    }

    async fn emulate(&self, correlation_id: &str) -> std::result::Result<(), PlatformError> {
        if !self.supported {
            return Err(Self::unsupported_error());
        }
        debug!(
            "simulating card emulation for {} ({:?})",
            correlation_id, self.emulation_delay
        );
        tokio::time::sleep(self.emulation_delay).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NfcSession;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_present_tag_requires_scan() {
        let backend = SimulatedBackend::new();
        assert!(!backend.present_tag(TagReadEvent::new("x")));
    }

    #[tokio::test]
    async fn test_present_tag_reaches_session_listener() {
        let session = NfcSession::new(SimulatedBackend::new());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        session
            .start_scan(Some(Arc::new(move |e: &TagReadEvent| {
                let _ = tx.send(e.serial_number.clone());
            })))
            .await
            .unwrap();

        assert!(session.backend().present_tag(TagReadEvent::new("04:11:22")));
        assert_eq!(rx.recv().await.unwrap(), "04:11:22");

        session.stop_scan().await;
        assert!(!session.backend().present_tag(TagReadEvent::new("after")));
    }

    #[tokio::test]
    async fn test_unsupported_rejects_everything() {
        let backend = SimulatedBackend::unsupported();
        assert!(!backend.is_supported());
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        assert_eq!(
            backend.scan(tx).await.unwrap_err().kind,
            PlatformErrorKind::NotSupported
        );
        assert!(backend.write("x").await.is_err());
        assert!(backend.emulate("x").await.is_err());
    }

    #[tokio::test]
    async fn test_write_records_payload() {
        let backend = SimulatedBackend::new();
        backend.write("hello").await.unwrap();
        assert_eq!(backend.written(), vec!["hello"]);
    }
}
