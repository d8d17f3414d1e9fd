//! 🪣 UploadWorker: one of N identical minions pulling records off the work queue.
//!
//! Per record: derive the storage key, probe, and only on a confirmed miss compress and write.
//! A failed record is reported once on the failure channel and the worker keeps draining,
//! so the driver is never left shouting into a full queue nobody reads.

use std::sync::Arc;

use async_channel::{Receiver, Sender};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, trace, warn};

use super::Worker;
use crate::backends::{ObjectStore, Probe, StorageBackend};
use crate::codec;
use crate::common::LogRecord;
use crate::errors::ExportError;

/// 🎯 Where the objects go.
#[derive(Debug, Clone)]
pub(in crate::supervisors) struct UploadTarget {
    pub bucket: String,
    pub prefix: String,
}

/// 📊 One worker's tally. Summed across the pool at shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(in crate::supervisors) struct UploadStats {
    pub written: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl std::ops::AddAssign for UploadStats {
    fn add_assign(&mut self, other: Self) {
        self.written += other.written;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

enum Outcome {
    Written,
    Skipped,
}

#[derive(Debug)]
pub(in crate::supervisors) struct UploadWorker {
    id: usize,
    rx: Receiver<LogRecord>,
    failures: Sender<ExportError>,
    storage: Arc<StorageBackend>,
    target: Arc<UploadTarget>,
}

impl UploadWorker {
    pub(in crate::supervisors) fn new(
        id: usize,
        rx: Receiver<LogRecord>,
        failures: Sender<ExportError>,
        storage: Arc<StorageBackend>,
        target: Arc<UploadTarget>,
    ) -> Self {
        Self {
            id,
            rx,
            failures,
            storage,
            target,
        }
    }

    async fn upload_one(&self, record: &LogRecord) -> Result<Outcome, ExportError> {
        let key = record.storage_key(&self.target.prefix);

        match self.storage.head_exists(&self.target.bucket, &key).await? {
            Probe::Found => {
                trace!("⏭️ {key} already exported");
                Ok(Outcome::Skipped)
            }
            Probe::NotFound => {
                let body = codec::compress(&record.payload).map_err(|e| ExportError::StorageWrite {
                    key: key.clone(),
                    reason: format!("gzip failed: {e}"),
                })?;
                self.storage.put(&self.target.bucket, &key, body).await?;
                trace!("📦 {key} written");
                Ok(Outcome::Written)
            }
        }
    }

    async fn drain(self) -> UploadStats {
        debug!("🧵 upload worker {} clocking in", self.id);
        let mut stats = UploadStats::default();
        while let Ok(record) = self.rx.recv().await {
            match self.upload_one(&record).await {
                Ok(Outcome::Written) => stats.written += 1,
                Ok(Outcome::Skipped) => stats.skipped += 1,
                Err(err) => {
                    stats.failed += 1;
                    warn!("💀 upload worker {} dropped a record: {err}", self.id);
                    // ⚠️ unbounded, so this only fails once the pool itself is gone
                    let _ = self.failures.try_send(err);
                }
            }
        }
        debug!(
            "🏁 upload worker {} done: {} written, {} skipped, {} failed",
            self.id, stats.written, stats.skipped, stats.failed
        );
        stats
    }
}

impl Worker for UploadWorker {
    type Output = UploadStats;

    fn start(self) -> JoinHandle<UploadStats> {
        tokio::spawn(self.drain().in_current_span())
    }
}
