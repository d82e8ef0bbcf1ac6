//! Test utilities for NFC consumers
//!
//! Provides a scripted [`FakeBackend`] that counts hardware calls and can be
//! told to fail the next scan or write.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use tapkey_core::TagReadEvent;

use crate::backend::{NfcBackend, PlatformError, TagSink};

/// Backend double that records every call
#[derive(Debug)]
pub struct FakeBackend {
    supported: bool,
    scan_starts: AtomicUsize,
    stops: AtomicUsize,
    sink: Mutex<Option<TagSink>>,
    scan_failures: Mutex<VecDeque<PlatformError>>,
    write_failures: Mutex<VecDeque<PlatformError>>,
    written: Mutex<Vec<String>>,
    emulated: Mutex<Vec<String>>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBackend {
    /// Creates a supported backend with no scripted failures.
    pub fn new() -> Self {
        Self {
            supported: true,
            scan_starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            sink: Mutex::new(None),
            scan_failures: Mutex::new(VecDeque::new()),
            write_failures: Mutex::new(VecDeque::new()),
            written: Mutex::new(Vec::new()),
            emulated: Mutex::new(Vec::new()),
        }
    }

    /// Creates a backend whose capability probe reports no NFC.
    pub fn unsupported() -> Self {
        Self {
            supported: false,
            ..Self::new()
        }
    }

    /// Make the next `scan` call fail with `err`.
    pub fn fail_next_scan(&self, err: PlatformError) {
        self.scan_failures.lock().unwrap().push_back(err);
    }

    /// Make the next `write` call fail with `err`.
    pub fn fail_next_write(&self, err: PlatformError) {
        self.write_failures.lock().unwrap().push_back(err);
    }

    /// Deliver `event` as if the radio read it. Returns `false` if no scan
    /// is active.
    pub fn emit(&self, event: TagReadEvent) -> bool {
        match self.sink.lock().unwrap().as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// The sink handed over by the most recent `scan`, if still active.
    pub fn current_sink(&self) -> Option<TagSink> {
        self.sink.lock().unwrap().clone()
    }

    /// Number of hardware scans started
    pub fn scan_starts(&self) -> usize {
        self.scan_starts.load(Ordering::SeqCst)
    }

    /// Number of hardware stops requested
    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn written(&self) -> Vec<String> {
        self.written.lock().unwrap().clone()
    }

    pub fn emulated(&self) -> Vec<String> {
        self.emulated.lock().unwrap().clone()
    }
}

impl NfcBackend for FakeBackend {
    fn is_supported(&self) -> bool {
        self.supported
    }

    async fn scan(&self, sink: TagSink) -> Result<(), PlatformError> {
        // Let concurrent callers interleave like a real permission prompt
        tokio::task::yield_now().await;
        if let Some(err) = self.scan_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.scan_starts.fetch_add(1, Ordering::SeqCst);
        *self.sink.lock().unwrap() = Some(sink);
        Ok(())
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.sink.lock().unwrap().take();
    }

    async fn write(&self, payload: &str) -> Result<(), PlatformError> {
        if let Some(err) = self.write_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.written.lock().unwrap().push(payload.to_string());
        Ok(())
    }

    async fn emulate(&self, correlation_id: &str) -> Result<(), PlatformError> {
        self.emulated
            .lock()
            .unwrap()
            .push(correlation_id.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fake_backend_counts_calls() {
        let backend = FakeBackend::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        backend.scan(tx).await.unwrap();
        assert_eq!(backend.scan_starts(), 1);

        assert!(backend.emit(TagReadEvent::new("a")));
        assert_eq!(rx.recv().await.unwrap().serial_number, "a");

        backend.stop().await;
        assert_eq!(backend.stops(), 1);
        assert!(!backend.emit(TagReadEvent::new("b")));
    }

    #[tokio::test]
    async fn test_fake_backend_scripted_failure_is_consumed() {
        let backend = FakeBackend::new();
        backend.fail_next_scan(PlatformError::from_dom_name("NotAllowedError", "no"));

        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        assert!(backend.scan(tx.clone()).await.is_err());
        assert!(backend.scan(tx).await.is_ok());
        assert_eq!(backend.scan_starts(), 1);
    }
}
