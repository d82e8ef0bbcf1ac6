//! # tapkey-app - Application Orchestration
//!
//! Pairing, lock control, sharing, per-key settings and notification
//! read-state for tapkey, on top of [`tapkey_nfc`] and two storage seams:
//! the hosted backend ([`RemoteStore`]) and device-local key-value storage
//! ([`KeyValueStore`]).
//!
//! ## Public API
//!
//! ### Engine
//! - [`Engine`] - One signed-in user's orchestration entry point
//! - [`AppEvent`] - Events broadcast to frontends
//!
//! ### Flows
//! - [`PairingFlow`], [`PairingAttempt`], [`PairingStep`] - Device pairing
//! - [`LockController`], [`LockView`] - Optimistic lock/unlock
//! - [`ReadStateService`], [`reconcile`] - Notification read-state
//! - [`AccessManager`] - Sharing keys
//! - [`KeySettingsService`], [`PinGate`] - Per-key settings and the PIN gate
//!
//! ### Storage
//! - [`RemoteStore`], [`MemoryRemoteStore`] - Backend tables
//! - [`KeyValueStore`], [`MemoryStore`], [`FileStore`] - Local storage
//!
//! ### Configuration
//! - [`config::Settings`] - `.tapkey/config.toml`

pub mod config;
pub mod engine;
pub mod engine_event;
pub mod key_settings;
pub mod lock;
pub mod notifications;
pub mod optimistic;
pub mod pairing;
pub mod pin;
pub mod sharing;
pub mod storage;
pub mod store;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;

pub use engine::{Engine, Inbox};
pub use engine_event::AppEvent;
pub use key_settings::{
    KeySettingsService, NotificationSettings, NotificationToggle, SecuritySettings,
};
pub use lock::{LockController, LockView};
pub use notifications::{reconcile, ReadStateService, SyncReport};
pub use optimistic::Optimistic;
pub use pairing::{
    PairingAttempt, PairingFailure, PairingFlow, PairingStep, DEFAULT_PAIRING_TIMEOUT,
};
pub use pin::PinGate;
pub use sharing::{
    AccessManager, EmailMessage, GrantOutcome, InvitationStatus, LocalMailer, LogMailer,
    MailError, Mailer,
};
pub use storage::{FileStore, KeyValueStore, LocalKeyValueStore, MemoryStore};
pub use store::{LocalRemoteStore, MemoryRemoteStore, RemoteStore, StoreError, StoreOp};
