//! Chat message model
//!
//! The same JSON object is used as the log record payload and as the frame
//! pushed to clients:
//!
//! ```json
//! {"created_at":"2024-05-01T10:00:00Z","text":"hello","key":"3f2c...","user":"ana"}
//! ```
//!
//! On the read path the record's own key and log-append timestamp replace
//! whatever the payload carries; the broker's clock is authoritative. Records
//! from other producers may carry only `text`, the rest comes from the record.

use chrono::{DateTime, TimeZone, Utc};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::broker::Record;
use crate::utils::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub created_at: DateTime<Utc>,
    pub text: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

/// What the read path accepts as a record payload.
#[derive(Deserialize)]
struct RecordPayload {
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    text: String,
    key: Option<String>,
    user: Option<String>,
}

impl Message {
    pub fn new(key: String, text: impl Into<String>) -> Self {
        Self {
            created_at: Utc::now(),
            text: text.into(),
            key,
            user: None,
        }
    }

    /// Decodes a record read back from the log.
    pub fn from_record(record: &Record) -> Result<Self> {
        let value = record.value.as_deref().unwrap_or_default();
        let payload: RecordPayload = serde_json::from_slice(value)?;

        let key = record
            .key
            .as_deref()
            .filter(|k| !k.is_empty())
            .map(|k| String::from_utf8_lossy(k).into_owned())
            .or(payload.key.filter(|k| !k.is_empty()))
            .ok_or(Error::IncompleteRecord("key"))?;
        let created_at = record
            .timestamp
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .or(payload.created_at)
            .ok_or(Error::IncompleteRecord("timestamp"))?;

        Ok(Self {
            created_at,
            text: payload.text,
            key,
            user: payload.user,
        })
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Error::Encode)
    }
}

/// Generates a fresh message key: 128 bits from the OS RNG, formatted as a
/// hyphen-free UUID.
pub fn generate_key() -> Result<String> {
    let mut bytes = [0u8; 16];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| Error::IdGenerationFailed(e.to_string()))?;
    Ok(uuid::Builder::from_random_bytes(bytes)
        .into_uuid()
        .simple()
        .to_string())
}
