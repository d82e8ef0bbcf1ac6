//! Platform NFC backend abstraction
//!
//! A backend is the only thing that talks to the radio. The
//! [`NfcSession`](crate::NfcSession) owns exactly one backend and is the only
//! caller of it.

use tapkey_core::prelude::*;
use tapkey_core::TagReadEvent;
use tokio::sync::mpsc;

/// Channel a backend pushes tag-read events into while a scan is active
pub type TagSink = mpsc::UnboundedSender<TagReadEvent>;

/// Platform failure categories, named after the browser `DOMException`s the
/// Web NFC API raises
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformErrorKind {
    /// `NotSupportedError`: no NFC adapter or API
    NotSupported,
    /// `NotAllowedError`: the user declined the permission prompt
    NotAllowed,
    /// `NotReadableError`: adapter disabled or unable to read
    NotReadable,
    /// `AbortError`: the operation was aborted by another scan/write
    Abort,
    /// `NetworkError`: the tag moved away mid-transfer
    Network,
    Other,
}

/// Error reported by a platform backend
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct PlatformError {
    pub kind: PlatformErrorKind,
    pub message: String,
}

impl PlatformError {
    pub fn new(kind: PlatformErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Build from a `DOMException` name as reported by the platform
    pub fn from_dom_name(name: &str, message: impl Into<String>) -> Self {
        let kind = match name {
            "NotSupportedError" => PlatformErrorKind::NotSupported,
            "NotAllowedError" | "SecurityError" => PlatformErrorKind::NotAllowed,
            "NotReadableError" | "InvalidStateError" => PlatformErrorKind::NotReadable,
            "AbortError" => PlatformErrorKind::Abort,
            "NetworkError" => PlatformErrorKind::Network,
            _ => PlatformErrorKind::Other,
        };
        Self::new(kind, message)
    }
}

impl From<PlatformError> for Error {
    fn from(err: PlatformError) -> Self {
        match err.kind {
            PlatformErrorKind::NotSupported => Error::UnsupportedCapability,
            PlatformErrorKind::NotAllowed => Error::permission_denied(err.message),
            PlatformErrorKind::NotReadable
            | PlatformErrorKind::Abort
            | PlatformErrorKind::Network
            | PlatformErrorKind::Other => Error::hardware_unavailable(err.message),
        }
    }
}

/// Platform NFC capability: probe, scan, stop, write and emulate.
#[trait_variant::make(NfcBackend: Send)]
pub trait LocalNfcBackend {
    /// Pure capability probe. Must not fail or block.
    fn is_supported(&self) -> bool;

    /// Start listening for tags. Events are pushed into `sink` until
    /// [`stop`](Self::stop) is called or the sink is dropped.
    async fn scan(&self, sink: TagSink) -> std::result::Result<(), PlatformError>;

    /// Stop the active scan and release the radio. Idempotent.
    async fn stop(&self);

    /// Write a text payload to the next tag presented.
    async fn write(&self, payload: &str) -> std::result::Result<(), PlatformError>;

    /// Perform host-card emulation carrying `correlation_id`.
    async fn emulate(&self, correlation_id: &str) -> std::result::Result<(), PlatformError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_dom_name() {
        let cases = [
            ("NotSupportedError", PlatformErrorKind::NotSupported),
            ("NotAllowedError", PlatformErrorKind::NotAllowed),
            ("SecurityError", PlatformErrorKind::NotAllowed),
            ("NotReadableError", PlatformErrorKind::NotReadable),
            ("AbortError", PlatformErrorKind::Abort),
            ("NetworkError", PlatformErrorKind::Network),
            ("WeirdError", PlatformErrorKind::Other),
        ];
        for (name, kind) in cases {
            assert_eq!(PlatformError::from_dom_name(name, "x").kind, kind, "{name}");
        }
    }

    #[test]
    fn test_maps_onto_error_taxonomy() {
        let err: Error = PlatformError::from_dom_name("NotSupportedError", "no adapter").into();
        assert!(matches!(err, Error::UnsupportedCapability));

        let err: Error = PlatformError::from_dom_name("NotAllowedError", "declined").into();
        assert!(matches!(err, Error::PermissionDenied { ref message } if message == "declined"));

        let err: Error = PlatformError::from_dom_name("NotReadableError", "radio off").into();
        assert!(matches!(err, Error::HardwareUnavailable { .. }));

        let err: Error = PlatformError::from_dom_name("AbortError", "busy").into();
        assert!(matches!(err, Error::HardwareUnavailable { .. }));
    }
}
