//! Headless output - JSON lines on stdout
//!
//! Every line is one JSON object with an `"event"` field and a millisecond
//! `"timestamp"`.
//!
//! ```json
//! {"event":"pairing_step_changed","step":{"step":"scanning"},"timestamp":1704700001000}
//! {"event":"key_paired","key":{"id":"key-1", ...},"timestamp":1704700002000}
//! ```

use std::io::{self, Write};

use chrono::Utc;
use serde::Serialize;
use tracing::error;

use tapkey_app::AppEvent;

/// Command results that are not engine events
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CommandEvent {
    ConfigInitialized { path: String },
    TagWritten { bytes: usize },
    Emulated { correlation_id: String },
    Reconciled { read_ids: Vec<String> },
    PinSet,
    PinVerified { valid: bool },
    PinCleared,
    Error { message: String, fatal: bool },
}

#[derive(Serialize)]
struct Line<'a, T: Serialize> {
    #[serde(flatten)]
    body: &'a T,
    timestamp: i64,
}

/// Render one event as a JSON line
pub fn to_line<T: Serialize>(event: &T) -> serde_json::Result<String> {
    serde_json::to_string(&Line {
        body: event,
        timestamp: Utc::now().timestamp_millis(),
    })
}

/// Write one event to stdout and flush
pub fn emit<T: Serialize>(event: &T) {
    let json = match to_line(event) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize headless event: {}", e);
            return;
        }
    };

    let mut stdout = io::stdout().lock();
    if let Err(e) = writeln!(stdout, "{}", json) {
        error!("Failed to write headless event to stdout: {}", e);
        return;
    }
    if let Err(e) = stdout.flush() {
        error!("Failed to flush headless stdout: {}", e);
    }
}

pub fn emit_app_event(event: &AppEvent) {
    emit(event)
}

pub fn emit_error(err: &tapkey_core::Error) {
    emit(&CommandEvent::Error {
        message: err.notice(),
        fatal: err.is_fatal(),
    })
}
