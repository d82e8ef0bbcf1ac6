//! NFC event definitions

use serde::{Deserialize, Serialize};

/// One record of an NDEF message carried by a tag
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NdefRecord {
    /// Record type, e.g. `"text"`, `"url"`, `"mime"`
    pub record_type: String,
    #[serde(default)]
    pub media_type: Option<String>,
    /// Decoded record payload
    #[serde(default)]
    pub data: String,
}

impl NdefRecord {
    pub fn text(data: impl Into<String>) -> Self {
        Self {
            record_type: "text".to_string(),
            media_type: None,
            data: data.into(),
        }
    }
}

/// A tag was detected by the NFC radio.
///
/// Real hardware and the simulation path produce exactly this shape, so
/// consumers cannot tell them apart.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TagReadEvent {
    /// Hardware serial number, treated as an opaque correlation key
    pub serial_number: String,
    /// Optional structured message payload; not interpreted by the core
    #[serde(default)]
    pub records: Vec<NdefRecord>,
}

impl TagReadEvent {
    pub fn new(serial_number: impl Into<String>) -> Self {
        Self {
            serial_number: serial_number.into(),
            records: Vec::new(),
        }
    }

    pub fn with_records(mut self, records: Vec<NdefRecord>) -> Self {
        self.records = records;
        self
    }
}
