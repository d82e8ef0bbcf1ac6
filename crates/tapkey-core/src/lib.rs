//! # tapkey-core - Core Domain Types
//!
//! Foundation crate for tapkey. Provides domain types, error handling,
//! NFC event definitions and logging setup.
//!
//! This crate has **zero internal dependencies** -- it only depends on external
//! crates (serde, chrono, thiserror, tracing).
//!
//! ## Public API
//!
//! ### Domain Types (`types`)
//! - [`KeyRecord`], [`NewKey`] - Paired key rows
//! - [`ActivityEntry`], [`LockAction`] - Key activity log entries
//! - [`KeyPermission`], [`NewPermission`], [`PermissionLevel`] - Shared access
//! - [`Notification`] - Inbox notifications
//! - [`Profile`] - User profile rows
//! - [`Notice`] - Short user-facing messages
//!
//! ### Events (`events`)
//! - [`TagReadEvent`] - A tag detected by hardware or the simulation path
//! - [`NdefRecord`] - Optional structured payload of a tag
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Error taxonomy with `fatal` vs `recoverable` classification
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//! - [`ResultExt`] - Extension trait for adding error context
//!
//! ## Prelude
//!
//! Import commonly used types with:
//! ```rust
//! use tapkey_core::prelude::*;
//! ```

pub mod error;
pub mod events;
pub mod logging;
pub mod prelude;
pub mod types;

// Re-export commonly used types at crate root for convenience
pub use error::{Error, Result, ResultExt};
pub use events::{NdefRecord, TagReadEvent};
pub use types::{
    ActivityEntry, KeyId, KeyPermission, KeyRecord, LockAction, NewKey, NewPermission, Notice,
    NoticeLevel, Notification, NotificationKind, PermissionLevel, Profile, UserId,
};
