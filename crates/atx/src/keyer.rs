//! 🔐 RecordKeyer: turns a raw upstream item into something with a name and a birthday.
//!
//! 🧠 Knowledge graph:
//! - `content_key` = hex SHA-256 over the serialized `id` object only. Re-exporting the same
//!   event (even if the payload picked up a new etag) lands on the same key.
//! - `occurred_at` = `id.time`, parsed in the upstream's fixed `...%.3fZ` UTC format.
//! - No I/O, no clock, no state. Same input, same output.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::common::{Application, LogRecord};
use crate::errors::ExportError;

/// ⏰ The reports API timestamp layout: `2023-04-05T06:07:08.000Z`.
pub const UPSTREAM_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.fZ";

/// 🔐 Builds `LogRecord`s from raw items.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordKeyer;

impl RecordKeyer {
    /// 🧾 Key one item. Fails with `MalformedRecord` if the identity is missing or its time won't parse.
    pub fn key_item(&self, app: Application, item: &Value) -> Result<LogRecord, ExportError> {
        let identity = item.get("id").ok_or_else(|| ExportError::MalformedRecord {
            app,
            raw_identity: String::from("<missing>"),
            reason: "item has no 'id' field".to_string(),
        })?;

        let raw_identity = serde_json::to_vec(identity).map_err(|e| ExportError::MalformedRecord {
            app,
            raw_identity: identity.to_string(),
            reason: format!("identity could not be serialized: {e}"),
        })?;

        let time_str = identity
            .get("time")
            .and_then(Value::as_str)
            .ok_or_else(|| ExportError::MalformedRecord {
                app,
                raw_identity: identity.to_string(),
                reason: "identity has no string 'time' field".to_string(),
            })?;

        let occurred_at = parse_upstream_time(time_str).map_err(|reason| ExportError::MalformedRecord {
            app,
            raw_identity: identity.to_string(),
            reason,
        })?;

        let payload = serde_json::to_vec(item).map_err(|e| ExportError::MalformedRecord {
            app,
            raw_identity: identity.to_string(),
            reason: format!("item could not be serialized: {e}"),
        })?;

        Ok(LogRecord {
            payload,
            occurred_at,
            content_key: content_key(&raw_identity),
            source_app: app,
        })
    }
}

/// 🔐 Lower-hex SHA-256. 64 chars, every time.
pub fn content_key(raw_identity: &[u8]) -> String {
    hex::encode(Sha256::digest(raw_identity))
}

pub fn parse_upstream_time(time_str: &str) -> Result<DateTime<Utc>, String> {
    NaiveDateTime::parse_from_str(time_str, UPSTREAM_TIME_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| format!("failed to parse timestamp '{time_str}': {e}"))
}
