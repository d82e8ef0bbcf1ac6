//! Configuration file parsing for tapkey
//!
//! Supports `.tapkey/config.toml` with `[nfc]`, `[storage]`, `[session]` and
//! `[notifications]` sections.

pub mod settings;
pub mod types;

pub use settings::{init_config_dir, load_settings, save_settings, USER_ID_ENV_VAR};
pub use types::*;
