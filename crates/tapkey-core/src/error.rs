//! Application error types with rich context

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Application error types organized by layer/domain
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Local storage error: {message}")]
    Storage { message: String },

    #[error("Channel closed unexpectedly")]
    ChannelClosed,

    // ─────────────────────────────────────────────────────────────
    // NFC Capability Errors
    // ─────────────────────────────────────────────────────────────
    #[error("NFC is not supported on this device")]
    UnsupportedCapability,

    #[error("NFC permission denied: {message}")]
    PermissionDenied { message: String },

    #[error("NFC hardware unavailable: {message}")]
    HardwareUnavailable { message: String },

    #[error("NFC session has been disposed")]
    SessionDisposed,

    // ─────────────────────────────────────────────────────────────
    // Flow Errors
    // ─────────────────────────────────────────────────────────────
    #[error("NFC operation timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("A lock toggle is already in flight for key {key_id}")]
    ToggleInFlight { key_id: String },

    #[error("Cannot {action} while pairing is {step}")]
    InvalidTransition { step: String, action: String },

    // ─────────────────────────────────────────────────────────────
    // Remote Store Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Remote write failed: {message}")]
    RemoteWrite { message: String },

    #[error("Remote read failed: {message}")]
    RemoteRead { message: String },

    #[error("{recipient} already has access to this key")]
    DuplicateAccess { recipient: String },

    #[error("Not found: {what}")]
    NotFound { what: String },

    // ─────────────────────────────────────────────────────────────
    // PIN / Input Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Invalid PIN: {reason}")]
    InvalidPin { reason: String },

    #[error("A PIN is required for this action")]
    PinRequired,

    #[error("Incorrect PIN")]
    PinMismatch,

    #[error("Invalid email address: {email}")]
    InvalidEmail { email: String },

    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied {
            message: message.into(),
        }
    }

    pub fn hardware_unavailable(message: impl Into<String>) -> Self {
        Self::HardwareUnavailable {
            message: message.into(),
        }
    }

    pub fn remote_write(message: impl Into<String>) -> Self {
        Self::RemoteWrite {
            message: message.into(),
        }
    }

    pub fn remote_read(message: impl Into<String>) -> Self {
        Self::RemoteRead {
            message: message.into(),
        }
    }

    pub fn duplicate_access(recipient: impl Into<String>) -> Self {
        Self::DuplicateAccess {
            recipient: recipient.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn invalid_transition(step: impl Into<String>, action: impl Into<String>) -> Self {
        Self::InvalidTransition {
            step: step.into(),
            action: action.into(),
        }
    }

    pub fn invalid_pin(reason: impl Into<String>) -> Self {
        Self::InvalidPin {
            reason: reason.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Check if this is a recoverable error
    ///
    /// Recoverable errors leave the caller in a retryable state: the user can
    /// try the same action again without restarting anything.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::PermissionDenied { .. }
                | Error::HardwareUnavailable { .. }
                | Error::Timeout { .. }
                | Error::ToggleInFlight { .. }
                | Error::RemoteWrite { .. }
                | Error::RemoteRead { .. }
                | Error::DuplicateAccess { .. }
                | Error::PinMismatch
        )
    }

    /// Check if this error should stop the current session entirely
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::UnsupportedCapability | Error::SessionDisposed | Error::ConfigNotFound { .. }
        )
    }

    /// Short human-readable notice for display to the user.
    pub fn notice(&self) -> String {
        match self {
            Error::UnsupportedCapability => "NFC is not available on this device".to_string(),
            Error::PermissionDenied { .. } => "NFC permission was denied".to_string(),
            Error::HardwareUnavailable { .. } => {
                "NFC is turned off or busy. Try again.".to_string()
            }
            Error::SessionDisposed => "NFC session closed".to_string(),
            Error::Timeout { .. } => "NFC did not respond in time. Try again.".to_string(),
            Error::ToggleInFlight { .. } => "Please wait for the lock to respond".to_string(),
            Error::RemoteWrite { .. } => {
                "Could not save changes. Check your connection.".to_string()
            }
            Error::RemoteRead { .. } => "Could not load data. Check your connection.".to_string(),
            Error::DuplicateAccess { recipient } => {
                format!("{} already has access to this key", recipient)
            }
            Error::PinRequired => "Enter your PIN to continue".to_string(),
            Error::PinMismatch => "Incorrect PIN".to_string(),
            Error::InvalidPin { reason } => reason.clone(),
            Error::InvalidEmail { email } => format!("'{}' is not a valid email", email),
            other => other.to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Context Extensions
// ─────────────────────────────────────────────────────────────────

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", context.into(), err);
            err
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", f(), err);
            err
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = Error::remote_write("connection reset");
        assert_eq!(err.to_string(), "Remote write failed: connection reset");

        let err = Error::UnsupportedCapability;
        assert!(err.to_string().contains("not supported"));

        let err = Error::Timeout { secs: 30 };
        assert_eq!(err.to_string(), "NFC operation timed out after 30s");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_error_is_fatal() {
        assert!(Error::UnsupportedCapability.is_fatal());
        assert!(Error::SessionDisposed.is_fatal());
        assert!(!Error::Timeout { secs: 30 }.is_fatal());
        assert!(!Error::remote_write("x").is_fatal());
    }

    #[test]
    fn test_error_is_recoverable() {
        assert!(Error::Timeout { secs: 30 }.is_recoverable());
        assert!(Error::permission_denied("user declined").is_recoverable());
        assert!(Error::hardware_unavailable("radio off").is_recoverable());
        assert!(Error::duplicate_access("a@b.c").is_recoverable());
        assert!(!Error::UnsupportedCapability.is_recoverable());
    }

    #[test]
    fn test_duplicate_access_notice_names_recipient() {
        let err = Error::duplicate_access("friend@example.com");
        assert_eq!(
            err.notice(),
            "friend@example.com already has access to this key"
        );
    }

    #[test]
    fn test_notice_is_short_for_every_nfc_failure() {
        let errors = [
            Error::UnsupportedCapability,
            Error::permission_denied("NotAllowedError"),
            Error::hardware_unavailable("NotReadableError"),
            Error::Timeout { secs: 30 },
        ];
        for err in errors {
            let notice = err.notice();
            assert!(!notice.is_empty());
            assert!(notice.len() < 80, "notice too long: {notice}");
        }
    }

    #[test]
    fn test_notice_falls_back_to_display() {
        let err = Error::config("bad section");
        assert_eq!(err.notice(), "Configuration error: bad section");
    }

    #[test]
    fn test_invalid_transition_message() {
        let err = Error::invalid_transition("scanning", "retry");
        assert_eq!(err.to_string(), "Cannot retry while pairing is scanning");
    }
}
