//! # tapkey-nfc - NFC Session Management
//!
//! Owns the single NFC radio of the device: capability probing, scan
//! lifecycle with listener fan-out, tag writes, host-card emulation and a
//! deterministic simulation path.
//!
//! Depends on [`tapkey_core`] for domain types and error handling.
//!
//! ## Public API
//!
//! ### Session
//! - [`NfcSession`] - Explicitly constructed owner of one backend
//! - [`NfcCapability`] - `Unsupported` / `Idle` / `Scanning` / `Emulating`
//! - [`TagListener`], [`SubscriptionId`] - Observer registration
//!
//! ### Backends
//! - [`NfcBackend`] - Platform abstraction (probe, scan, stop, write, emulate)
//! - [`PlatformError`] - Platform failures, mapped onto [`tapkey_core::Error`]
//! - [`SimulatedBackend`] - Backend for environments without NFC hardware

pub mod backend;
pub mod session;
pub mod simulated;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;

// Public API re-exports
pub use backend::{LocalNfcBackend, NfcBackend, PlatformError, PlatformErrorKind, TagSink};
pub use session::{
    NfcCapability, NfcSession, SubscriptionId, TagListener, DEFAULT_EMULATION_DELAY,
};
pub use simulated::SimulatedBackend;
