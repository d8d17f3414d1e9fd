//! 🧭 ExportCoordinator: starts one FetchWorker per application and merges them all into
//! a single stream.
//!
//! The stream is an unbounded `async_channel`. Every fetch worker holds a sender clone, and
//! the coordinator's own sender is closed only after every worker has been joined. Closing
//! therefore means "every application is done", never "the first one is done".

use std::sync::Arc;

use async_channel::Receiver;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info};

use super::workers::{FetchSummary, FetchWorker, Worker};
use crate::backends::ActivityBackend;
use crate::common::{ApplicationWindow, ExportItem};

#[derive(Debug)]
pub(in crate::supervisors) struct ExportCoordinator {
    api: Arc<ActivityBackend>,
    windows: Vec<ApplicationWindow>,
    base_time: DateTime<Utc>,
    page_size: u32,
}

impl ExportCoordinator {
    pub(in crate::supervisors) fn new(
        api: Arc<ActivityBackend>,
        windows: Vec<ApplicationWindow>,
        base_time: DateTime<Utc>,
        page_size: u32,
    ) -> Self {
        Self {
            api,
            windows,
            base_time,
            page_size,
        }
    }

    /// 🚀 Fan out, fan in. Returns the merged stream and a handle that resolves once every
    /// fetch worker has finished and the stream has been closed.
    pub(in crate::supervisors) fn start(self) -> (Receiver<ExportItem>, JoinHandle<Vec<FetchSummary>>) {
        let (tx, rx) = async_channel::unbounded();

        let workers: Vec<JoinHandle<FetchSummary>> = self
            .windows
            .into_iter()
            .map(|window| {
                FetchWorker::new(self.api.clone(), window, self.base_time, self.page_size, tx.clone()).start()
            })
            .collect();
        info!("🧭 started {} fetch workers", workers.len());

        let joined = tokio::spawn(
            async move {
                let mut summaries = Vec::with_capacity(workers.len());
                for result in join_all(workers).await {
                    match result {
                        Ok(summary) => summaries.push(summary),
                        Err(join_err) => error!("💀 a fetch worker panicked: {join_err}"),
                    }
                }
                // 🚪 last sender standing; the stream ends here
                tx.close();
                summaries
            }
            .in_current_span(),
        );

        (rx, joined)
    }
}
