//! Domain events emitted by the Engine for external consumers
//!
//! Frontends (the CLI today) subscribe via `Engine::subscribe()` and render
//! each event as it arrives.

use serde::Serialize;

use tapkey_core::{KeyPermission, KeyRecord, Notice};

use crate::lock::LockView;
use crate::pairing::PairingStep;
use crate::sharing::InvitationStatus;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AppEvent {
    // ─────────────────────────────────────────────────────────
    // Pairing
    // ─────────────────────────────────────────────────────────
    PairingStepChanged { step: PairingStep },

    /// A key record was created for a paired tag
    KeyPaired { key: KeyRecord },

    // ─────────────────────────────────────────────────────────
    // Lock control
    // ─────────────────────────────────────────────────────────
    LockChanged { view: LockView },

    // ─────────────────────────────────────────────────────────
    // Sharing
    // ─────────────────────────────────────────────────────────
    AccessGranted {
        permission: KeyPermission,
        invitation: InvitationStatus,
    },

    AccessRevoked { permission_id: String },

    // ─────────────────────────────────────────────────────────
    // Notifications
    // ─────────────────────────────────────────────────────────
    ReadStateChanged { read_count: usize },

    /// Short message for the user
    Notice { notice: Notice },

    Shutdown,
}

impl AppEvent {
    /// Short label for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::PairingStepChanged { .. } => "pairing_step_changed",
            Self::KeyPaired { .. } => "key_paired",
            Self::LockChanged { .. } => "lock_changed",
            Self::AccessGranted { .. } => "access_granted",
            Self::AccessRevoked { .. } => "access_revoked",
            Self::ReadStateChanged { .. } => "read_state_changed",
            Self::Notice { .. } => "notice",
            Self::Shutdown => "shutdown",
        }
    }
}
