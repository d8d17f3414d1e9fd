//! 📦 Common data structures: the things that ride the channels.
//!
//! 🎬 INT. FAN-IN CHANNEL, 3:47 AM. Five fetchers are pouring records into one pipe.
//! Some of those records are records. One of them, eventually, is bad news.
//! The driver has to tell them apart without squinting at an `Option`. So: a tagged union.
//!
//! 🧠 Knowledge graph:
//! - `Application`: closed enum of upstream applications, validated at deserialization.
//! - `ApplicationWindow`: app + lookback. How far back to ask, per app.
//! - `LogRecord`: payload bytes + content key + timestamp. Immutable once built.
//! - `ExportItem`: `Record | Failure`: what the fan-in stream carries.
//! - `RunReport`: what a successful run hands back.
//!
//! 🦆

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::errors::ExportError;

// ============================================================
//  🏷️ Application: the enum of known activity reports
// ============================================================

/// 🏷️ The upstream applications we know how to ask about.
///
/// Serialized as snake_case, same names the reports API uses in its URL path.
/// Invalid names get bounced at the TOML parser, not 10 minutes into a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Application {
    AccessTransparency,
    Admin,
    Calendar,
    Chat,
    Chrome,
    ContextAwareAccess,
    DataStudio,
    Drive,
    Gcp,
    Groups,
    GroupsEnterprise,
    Jamboard,
    Keep,
    Login,
    Meet,
    Mobile,
    Rules,
    Saml,
    Token,
    UserAccounts,
}

impl Application {
    /// 🏷️ Wire name. Matches the serde names exactly; the tests hold it to that.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AccessTransparency => "access_transparency",
            Self::Admin => "admin",
            Self::Calendar => "calendar",
            Self::Chat => "chat",
            Self::Chrome => "chrome",
            Self::ContextAwareAccess => "context_aware_access",
            Self::DataStudio => "data_studio",
            Self::Drive => "drive",
            Self::Gcp => "gcp",
            Self::Groups => "groups",
            Self::GroupsEnterprise => "groups_enterprise",
            Self::Jamboard => "jamboard",
            Self::Keep => "keep",
            Self::Login => "login",
            Self::Meet => "meet",
            Self::Mobile => "mobile",
            Self::Rules => "rules",
            Self::Saml => "saml",
            Self::Token => "token",
            Self::UserAccounts => "user_accounts",
        }
    }
}

impl fmt::Display for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================
//  ⏳ ApplicationWindow: how far back each app gets queried
// ============================================================

/// ⏳ One application and its lookback.
///
/// Near-real-time apps get a short window. `login` settles slowly upstream,
/// so it gets two days. Every page of a run uses the same `[base - lookback, base]` window.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ApplicationWindow {
    pub name: Application,
    #[serde(deserialize_with = "deserialize_lookback")]
    pub lookback: Duration,
}

impl ApplicationWindow {
    pub fn new(name: Application, lookback: Duration) -> Self {
        Self { name, lookback }
    }

    /// 🪟 `[base_time - lookback, base_time]`.
    pub fn range(&self, base_time: DateTime<Utc>) -> Result<(DateTime<Utc>, DateTime<Utc>), ExportError> {
        let delta = TimeDelta::from_std(self.lookback).map_err(|e| {
            ExportError::configuration(format!(
                "lookback for '{}' does not fit in a time delta: {e}",
                self.name
            ))
        })?;
        let start = base_time.checked_sub_signed(delta).ok_or_else(|| {
            ExportError::configuration(format!(
                "lookback for '{}' reaches before the start of time",
                self.name
            ))
        })?;
        Ok((start, base_time))
    }
}

/// 📜 The lookback table the exporter has always shipped with.
pub fn default_application_windows() -> Vec<ApplicationWindow> {
    const TEN_MINUTES: Duration = Duration::from_secs(10 * 60);
    const TWO_DAYS: Duration = Duration::from_secs(48 * 60 * 60);
    vec![
        ApplicationWindow::new(Application::Admin, TEN_MINUTES),
        ApplicationWindow::new(Application::Drive, TEN_MINUTES),
        ApplicationWindow::new(Application::Mobile, TEN_MINUTES),
        ApplicationWindow::new(Application::Token, TEN_MINUTES),
        ApplicationWindow::new(Application::Login, TWO_DAYS),
    ]
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawLookback {
    Seconds(u64),
    Text(String),
}

fn deserialize_lookback<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    match RawLookback::deserialize(deserializer)? {
        RawLookback::Seconds(secs) => Ok(Duration::from_secs(secs)),
        RawLookback::Text(text) => parse_lookback(&text).map_err(serde::de::Error::custom),
    }
}

/// ⏱️ `"90s"`, `"10m"`, `"48h"`, `"2d"`, or a bare `"600"` (seconds).
pub fn parse_lookback(text: &str) -> Result<Duration, String> {
    let text = text.trim();
    let split_at = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    let (digits, unit) = text.split_at(split_at);
    let amount: u64 = digits
        .parse()
        .map_err(|_| format!("lookback '{text}' must start with a whole number"))?;
    let multiplier = match unit.trim() {
        "" | "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 24 * 60 * 60,
        other => return Err(format!("lookback '{text}' has unknown unit '{other}' (use s, m, h, d)")),
    };
    amount
        .checked_mul(multiplier)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("lookback '{text}' overflows"))
}

// ============================================================
//  🧾 LogRecord: one exported activity, ready to land
// ============================================================

/// 🧾 One exported log entry.
///
/// Built once by the fetcher, consumed once by an upload worker, never mutated in between.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// 📦 The raw item as the API returned it. Opaque. Passed through until gzip.
    pub payload: Vec<u8>,
    /// ⏰ From the item's identity. Used for partitioning only.
    pub occurred_at: DateTime<Utc>,
    /// 🔐 Hex SHA-256 of the serialized identity, not of the payload.
    pub content_key: String,
    pub source_app: Application,
}

impl LogRecord {
    /// 🗝️ `{prefix}{app}/YYYY/MM/DD/HH/YYYYMMDD_HHMMSS_{content_key}.json.gz`
    ///
    /// Same app + same second + same content key → same key. That is the dedup.
    pub fn storage_key(&self, prefix: &str) -> String {
        format!(
            "{prefix}{app}{partition}{stamp}{key}.json.gz",
            app = self.source_app,
            partition = self.occurred_at.format("/%Y/%m/%d/%H/"),
            stamp = self.occurred_at.format("%Y%m%d_%H%M%S_"),
            key = self.content_key,
        )
    }
}

/// 📨 What the fan-in stream carries: a record, or the reason a fetcher gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportItem {
    Record(LogRecord),
    Failure(ExportError),
}

// ============================================================
//  📊 RunReport: the receipt
// ============================================================

/// 📊 What a successful run reports back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub base_time: DateTime<Utc>,
    /// Records handed off to the upload queue.
    pub record_count: u64,
    pub objects_written: u64,
    /// Records whose object already existed.
    pub objects_skipped: u64,
    pub per_app: BTreeMap<Application, u64>,
}
