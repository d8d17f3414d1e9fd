//! 💀 Errors: the five ways an export run can go sideways.
//!
//! 🧠 Knowledge graph:
//! - `ExportError` is the typed core error. One variant per failure kind, each carrying
//!   enough context to write a postmortem without re-running the job.
//! - `RunError` is what the driver hands back when a run dies: the first error it saw,
//!   plus how many records made it to the upload queue before the lights went out.
//! - The edges (`run`, config loading, the CLI) speak `anyhow`. The core speaks this.
//!
//! 🦆 Nothing in here retries. The scheduler can re-run the whole job. That's its problem.

use thiserror::Error;

use crate::common::Application;

/// 🏷️ Every way a record, a page, or a bucket can disappoint us.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExportError {
    /// 🔒 Secrets, credentials, or config are bad. Nothing has been exported yet.
    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    /// 📡 The upstream API or the network between us said no while paging.
    #[error("upstream fetch failed for application '{app}': {reason}")]
    UpstreamFetch { app: Application, reason: String },

    /// 🧩 An item came back without a parseable identity or timestamp.
    #[error("malformed record from application '{app}' (identity: {raw_identity}): {reason}")]
    MalformedRecord {
        app: Application,
        raw_identity: String,
        reason: String,
    },

    /// 🔍 The existence probe failed for a reason other than "not found".
    #[error("storage probe failed for key '{key}': {reason}")]
    StorageProbe { key: String, reason: String },

    /// 🪣 The write itself failed.
    #[error("storage write failed for key '{key}': {reason}")]
    StorageWrite { key: String, reason: String },
}

impl ExportError {
    pub(crate) fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    pub(crate) fn upstream(app: Application, reason: impl std::fmt::Display) -> Self {
        Self::UpstreamFetch {
            app,
            reason: reason.to_string(),
        }
    }
}

/// ☠️ A run that ended in failure, with the damage report attached.
///
/// `record_count` is the number of records handed to the upload queue before the first
/// error was observed. No partial record list, just the number. Like a receipt with no items.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("export run failed after forwarding {record_count} records: {error}")]
pub struct RunError {
    pub record_count: u64,
    #[source]
    pub error: ExportError,
}
