//! 🪣 DedupUploader: a fixed pool of UploadWorkers behind one bounded work queue.
//!
//! 🧠 Knowledge graph:
//! - Queue capacity is fixed at start. With W workers and capacity C, at most W + C records
//!   are held by the pool at any instant. Submitting past that waits. That wait is the
//!   back-pressure that keeps a fast upstream from eating all the memory.
//! - Failures come out on a separate unbounded channel, so a worker never blocks on
//!   reporting one.
//! - `finish` closes the queue and joins every worker. Nothing is left running.

use std::sync::Arc;

use async_channel::{Receiver, SendError, Sender};
use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::workers::{UploadStats, UploadTarget, UploadWorker, Worker};
use crate::backends::StorageBackend;
use crate::common::LogRecord;
use crate::errors::ExportError;

/// 🏁 Everything the pool has to say once it's done.
#[derive(Debug)]
pub(in crate::supervisors) struct UploadSummary {
    pub stats: UploadStats,
    /// Failures still sitting on the channel when the pool shut down.
    pub late_failures: Vec<ExportError>,
}

#[derive(Debug)]
pub(in crate::supervisors) struct DedupUploader {
    queue: Sender<LogRecord>,
    failures: Receiver<ExportError>,
    workers: Vec<JoinHandle<UploadStats>>,
}

impl DedupUploader {
    pub(in crate::supervisors) fn start(
        storage: Arc<StorageBackend>,
        target: UploadTarget,
        worker_count: usize,
        queue_capacity: usize,
    ) -> Self {
        let (queue, rx) = async_channel::bounded(queue_capacity.max(1));
        let (failures_tx, failures) = async_channel::unbounded();
        let target = Arc::new(target);

        let workers = (0..worker_count.max(1))
            .map(|id| UploadWorker::new(id, rx.clone(), failures_tx.clone(), storage.clone(), target.clone()).start())
            .collect::<Vec<_>>();
        info!(
            "🪣 started {} upload workers on a queue of {}",
            workers.len(),
            queue_capacity.max(1)
        );

        Self {
            queue,
            failures,
            workers,
        }
    }

    /// 📬 Hand a record to the pool. Waits while the queue is full.
    ///
    /// Errors only when every worker is gone, with the record handed back.
    pub(in crate::supervisors) async fn submit(&self, record: LogRecord) -> Result<(), SendError<LogRecord>> {
        self.queue.send(record).await
    }

    /// 💀 The failure channel. Closes once every worker has exited.
    pub(in crate::supervisors) fn failures(&self) -> &Receiver<ExportError> {
        &self.failures
    }

    /// 🏁 Close the queue, wait for the workers to drain it, and sum their tallies.
    pub(in crate::supervisors) async fn finish(self) -> UploadSummary {
        self.queue.close();

        let mut stats = UploadStats::default();
        let mut late_failures = Vec::new();
        for result in join_all(self.workers).await {
            match result {
                Ok(worker_stats) => stats += worker_stats,
                Err(join_err) => {
                    error!("💀 an upload worker panicked: {join_err}");
                    late_failures.push(ExportError::StorageWrite {
                        key: "<unknown>".to_string(),
                        reason: format!("upload worker died: {join_err}"),
                    });
                }
            }
        }
        while let Ok(failure) = self.failures.try_recv() {
            late_failures.push(failure);
        }

        UploadSummary { stats, late_failures }
    }
}
