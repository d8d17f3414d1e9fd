//! 🎬 *[camera pans across a dimly lit bucket]*
//! 🎬 "In a world where twenty applications all talk at once..."
//! 🎬 "One supervisor dared to listen to them all."
//!
//! 📦 The Supervisor module: it wires the ExportCoordinator's merged stream into the
//! DedupUploader's work queue and decides when a run is over.
//!
//! 🧠 Knowledge graph:
//! - Stream items come in any order across applications. Records go to the queue, in the
//!   order they arrive. A full queue makes the supervisor wait, and only the supervisor.
//! - The first error seen wins, from either side: a `Failure` on the stream or a failed
//!   upload on the failure channel. After that nothing more is forwarded.
//! - Fetch workers are never cancelled. The supervisor keeps reading (and discarding)
//!   until the stream closes, so every application's own outcome still gets logged.
//! - Every spawned task is joined before `run` returns. Success or failure, no stragglers.
//!
//! ⚠️ The workers stay private. Only the plan and the entry point leave this module.

mod coordinator;
mod uploader;
mod workers;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_channel::Receiver;
use chrono::{DateTime, SubsecRound, Utc};
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use crate::app_config::AppConfig;
use crate::backends::{ActivityBackend, StorageBackend};
use crate::common::{Application, ApplicationWindow, ExportItem, RunReport};
use crate::errors::{ExportError, RunError};
use coordinator::ExportCoordinator;
use uploader::DedupUploader;
use workers::UploadTarget;

/// 📋 One run, fully decided: who, when, where, and how wide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPlan {
    pub run_id: String,
    pub base_time: DateTime<Utc>,
    pub bucket: String,
    pub prefix: String,
    pub windows: Vec<ApplicationWindow>,
    pub page_size: u32,
    pub upload_parallelism: usize,
    pub queue_capacity: usize,
}

impl RunPlan {
    /// 🔧 Fill the blanks a config may leave: a fresh run id, and `now` (to the millisecond)
    /// as the base time.
    pub fn from_config(config: &AppConfig, now: DateTime<Utc>) -> Self {
        Self {
            run_id: config
                .run_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            base_time: config.base_time.unwrap_or_else(|| now.trunc_subsecs(3)),
            bucket: config.storage_bucket.clone(),
            prefix: config.storage_prefix.clone(),
            windows: config.applications.clone(),
            page_size: config.runtime.page_size,
            upload_parallelism: config.runtime.upload_parallelism,
            queue_capacity: config.runtime.effective_queue_capacity(),
        }
    }
}

/// 🚀 Run one export against the given collaborators, inside a `run` span carrying the run id.
pub async fn run_pipeline(
    plan: RunPlan,
    api: ActivityBackend,
    storage: StorageBackend,
) -> Result<RunReport, RunError> {
    let span = info_span!("run", run_id = %plan.run_id);
    Supervisor::new(plan, api, storage).run().instrument(span).await
}

/// 🧾 What the forwarding loop managed before it stopped.
#[derive(Debug, Default)]
struct Forwarded {
    record_count: u64,
    per_app: BTreeMap<Application, u64>,
    first_error: Option<ExportError>,
}

impl Forwarded {
    fn latch(&mut self, err: ExportError) {
        error!("💀 first failure of the run, forwarding stops here: {err}");
        self.first_error = Some(err);
    }
}

/// 📦 The Supervisor: owns the plan and the collaborators for exactly one run.
pub(crate) struct Supervisor {
    plan: RunPlan,
    api: Arc<ActivityBackend>,
    storage: Arc<StorageBackend>,
}

impl Supervisor {
    pub(crate) fn new(plan: RunPlan, api: ActivityBackend, storage: StorageBackend) -> Self {
        Self {
            plan,
            api: Arc::new(api),
            storage: Arc::new(storage),
        }
    }

    pub(crate) async fn run(self) -> Result<RunReport, RunError> {
        let plan = self.plan;
        info!(
            "🚀 export starting: {} applications, base time {}, {} upload workers",
            plan.windows.len(),
            plan.base_time,
            plan.upload_parallelism
        );

        // 🪟 a window that can't be computed is a bad config, not a bad fetch
        if let Some(error) = plan.windows.iter().find_map(|w| w.range(plan.base_time).err()) {
            error!("💀 export refused before it started: {error}");
            return Err(RunError { record_count: 0, error });
        }

        let uploader = DedupUploader::start(
            self.storage,
            UploadTarget {
                bucket: plan.bucket.clone(),
                prefix: plan.prefix.clone(),
            },
            plan.upload_parallelism,
            plan.queue_capacity,
        );
        let (stream, fetchers) =
            ExportCoordinator::new(self.api, plan.windows.clone(), plan.base_time, plan.page_size).start();

        let mut forwarded = forward(&stream, &uploader).await;
        if forwarded.first_error.is_some() {
            let discarded = discard_rest(&stream).await;
            if discarded > 0 {
                warn!("🗑️ discarded {discarded} records that arrived after the first failure");
            }
        }

        match fetchers.await {
            Ok(summaries) => {
                for summary in summaries.iter().filter(|s| s.failed) {
                    warn!("⚠️ '{}' stopped early after {} records", summary.app, summary.records);
                }
            }
            Err(join_err) => error!("💀 the coordinator task died: {join_err}"),
        }

        let uploads = uploader.finish().await;
        for failure in uploads.late_failures {
            if forwarded.first_error.is_none() {
                forwarded.latch(failure);
            } else {
                warn!("⚠️ another upload failure: {failure}");
            }
        }

        if let Some(error) = forwarded.first_error {
            error!(
                "💀 export failed after forwarding {} records ({} written, {} skipped)",
                forwarded.record_count, uploads.stats.written, uploads.stats.skipped
            );
            return Err(RunError {
                record_count: forwarded.record_count,
                error,
            });
        }

        info!(
            "✅ export finished: {} records, {} written, {} already there",
            forwarded.record_count, uploads.stats.written, uploads.stats.skipped
        );
        Ok(RunReport {
            run_id: plan.run_id,
            base_time: plan.base_time,
            record_count: forwarded.record_count,
            objects_written: uploads.stats.written,
            objects_skipped: uploads.stats.skipped,
            per_app: forwarded.per_app,
        })
    }
}

/// 🔄 Move records from the stream to the work queue until the stream ends or something fails.
///
/// While waiting on a full queue, the failure channel is still watched, so a dying pool
/// can't leave this loop parked forever.
async fn forward(stream: &Receiver<ExportItem>, uploader: &DedupUploader) -> Forwarded {
    let mut forwarded = Forwarded::default();
    loop {
        tokio::select! {
            biased;
            Ok(failure) = uploader.failures().recv() => {
                forwarded.latch(failure);
                break;
            }
            item = stream.recv() => match item {
                Err(_) => break,
                Ok(ExportItem::Failure(err)) => {
                    forwarded.latch(err);
                    break;
                }
                Ok(ExportItem::Record(record)) => {
                    let app = record.source_app;
                    tokio::select! {
                        biased;
                        Ok(failure) = uploader.failures().recv() => {
                            forwarded.latch(failure);
                            break;
                        }
                        sent = uploader.submit(record) => {
                            if sent.is_err() {
                                forwarded.latch(ExportError::StorageWrite {
                                    key: "<unknown>".to_string(),
                                    reason: "every upload worker has exited".to_string(),
                                });
                                break;
                            }
                            forwarded.record_count += 1;
                            *forwarded.per_app.entry(app).or_default() += 1;
                        }
                    }
                }
            }
        }
    }
    forwarded
}

/// 🗑️ Read the stream to its end without forwarding anything. Later failures are logged.
async fn discard_rest(stream: &Receiver<ExportItem>) -> u64 {
    let mut discarded = 0;
    while let Ok(item) = stream.recv().await {
        match item {
            ExportItem::Record(_) => discarded += 1,
            ExportItem::Failure(err) => warn!("⚠️ another failure after the first: {err}"),
        }
    }
    discarded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::InMemoryStore;
    use chrono::TimeZone;

    fn a_record(n: usize, app: Application) -> ExportItem {
        ExportItem::Record(crate::common::LogRecord {
            payload: format!("{{\"n\":{n}}}").into_bytes(),
            occurred_at: Utc.with_ymd_and_hms(2023, 4, 5, 6, 7, 8).unwrap(),
            content_key: format!("{n:04}"),
            source_app: app,
        })
    }

    fn an_uploader(store: &InMemoryStore) -> DedupUploader {
        DedupUploader::start(
            Arc::new(StorageBackend::InMemory(store.clone())),
            UploadTarget {
                bucket: "bucket".to_string(),
                prefix: String::new(),
            },
            2,
            4,
        )
    }

    #[tokio::test]
    async fn the_one_where_four_records_and_then_a_failure_means_four() {
        let (tx, rx) = async_channel::unbounded();
        for n in 0..4 {
            tx.send(a_record(n, Application::Drive)).await.expect("💀 send");
        }
        tx.send(ExportItem::Failure(ExportError::upstream(Application::Login, "503")))
            .await
            .expect("💀 send");
        for n in 4..9 {
            tx.send(a_record(n, Application::Drive)).await.expect("💀 send");
        }
        tx.close();

        let store = InMemoryStore::new();
        let uploader = an_uploader(&store);
        let forwarded = forward(&rx, &uploader).await;

        assert_eq!(forwarded.record_count, 4);
        assert_eq!(forwarded.per_app.get(&Application::Drive), Some(&4));
        assert!(matches!(
            forwarded.first_error,
            Some(ExportError::UpstreamFetch { app: Application::Login, .. })
        ));
        // 🛑 the five after the failure were never touched
        assert_eq!(discard_rest(&rx).await, 5);

        let summary = uploader.finish().await;
        assert_eq!(summary.stats.written, 4);
        assert_eq!(store.keys("bucket").await.len(), 4);
    }

    #[tokio::test]
    async fn the_one_where_a_clean_stream_is_forwarded_in_full() {
        let (tx, rx) = async_channel::unbounded();
        for n in 0..3 {
            tx.send(a_record(n, Application::Admin)).await.expect("💀 send");
        }
        for n in 3..5 {
            tx.send(a_record(n, Application::Token)).await.expect("💀 send");
        }
        tx.close();

        let uploader = an_uploader(&InMemoryStore::new());
        let forwarded = forward(&rx, &uploader).await;
        assert_eq!(forwarded.record_count, 5);
        assert_eq!(
            forwarded.per_app.into_iter().collect::<Vec<_>>(),
            vec![(Application::Admin, 3), (Application::Token, 2)]
        );
        assert!(forwarded.first_error.is_none());
        uploader.finish().await;
    }

    #[test]
    fn the_one_where_the_plan_fills_in_the_blanks() {
        let mut config = AppConfig::new("arn", "us-east-1", "bucket", "p/");
        let now = Utc.with_ymd_and_hms(2023, 4, 5, 6, 7, 8).unwrap() + chrono::TimeDelta::microseconds(123_456);

        let plan = RunPlan::from_config(&config, now);
        assert_eq!(plan.base_time, Utc.with_ymd_and_hms(2023, 4, 5, 6, 7, 8).unwrap() + chrono::TimeDelta::milliseconds(123));
        assert!(Uuid::parse_str(&plan.run_id).is_ok());
        assert_eq!(plan.upload_parallelism, 16);
        assert_eq!(plan.queue_capacity, 32);

        config.run_id = Some("nightly".to_string());
        config.base_time = Some(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap());
        let plan = RunPlan::from_config(&config, now);
        assert_eq!(plan.run_id, "nightly");
        assert_eq!(plan.base_time, Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap());
    }
}
