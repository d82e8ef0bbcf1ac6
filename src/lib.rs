//! tapkey Library
//!
//! Command-line frontend for the tapkey NFC key manager. The domain logic
//! lives in the `tapkey-*` workspace crates.

pub mod cli;
pub mod headless;

pub use cli::{run, Cli};
