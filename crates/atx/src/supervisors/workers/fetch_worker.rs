//! 🎬 *[a page arrives. then another. then a token that says "there's more".]*
//!
//! 📡 The FetchWorker module: one per application, paging the activity API until it
//! runs out of continuation tokens, keying every item on the way past.
//!
//! 🧠 Knowledge graph:
//! - Every page uses the same `[base - lookback, base]` window. Only the token changes.
//! - Items become `ExportItem::Record` via `RecordKeyer`.
//! - The first error (page fetch or keying) is sent as a single `ExportItem::Failure`,
//!   and the worker stops. No retries. Other applications carry on without it.
//! - The fan-in stream is unbounded, so sends here never wait on slow uploads.

use std::sync::Arc;

use async_channel::Sender;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, warn};

use super::Worker;
use crate::backends::{ActivityApi, ActivityBackend, ActivityQuery};
use crate::common::{Application, ApplicationWindow, ExportItem};
use crate::keyer::RecordKeyer;

/// 📊 What one application's fetch loop did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(in crate::supervisors) struct FetchSummary {
    pub app: Application,
    pub pages: u64,
    pub records: u64,
    pub failed: bool,
}

#[derive(Debug)]
pub(in crate::supervisors) struct FetchWorker {
    api: Arc<ActivityBackend>,
    window: ApplicationWindow,
    base_time: DateTime<Utc>,
    page_size: u32,
    tx: Sender<ExportItem>,
}

impl FetchWorker {
    pub(in crate::supervisors) fn new(
        api: Arc<ActivityBackend>,
        window: ApplicationWindow,
        base_time: DateTime<Utc>,
        page_size: u32,
        tx: Sender<ExportItem>,
    ) -> Self {
        Self {
            api,
            window,
            base_time,
            page_size,
            tx,
        }
    }

    async fn fetch_all(self) -> FetchSummary {
        let app = self.window.name;
        let mut summary = FetchSummary {
            app,
            pages: 0,
            records: 0,
            failed: false,
        };

        let (start_time, end_time) = match self.window.range(self.base_time) {
            Ok(range) => range,
            Err(err) => {
                summary.failed = true;
                self.emit_failure(err).await;
                return summary;
            }
        };
        info!("📡 fetching '{app}' activity from {start_time} to {end_time}");

        let keyer = RecordKeyer;
        let mut page_token: Option<String> = None;
        loop {
            let query = ActivityQuery {
                app,
                start_time,
                end_time,
                page_token: page_token.take(),
                max_results: self.page_size,
            };

            let page = match self.api.list_activities(&query).await {
                Ok(page) => page,
                Err(err) => {
                    summary.failed = true;
                    self.emit_failure(err).await;
                    return summary;
                }
            };
            summary.pages += 1;
            debug!("📄 '{app}' page {} carried {} items", summary.pages, page.items.len());

            for item in &page.items {
                let record = match keyer.key_item(app, item) {
                    Ok(record) => record,
                    Err(err) => {
                        summary.failed = true;
                        self.emit_failure(err).await;
                        return summary;
                    }
                };
                if self.tx.send(ExportItem::Record(record)).await.is_err() {
                    // 🚪 nobody is listening anymore; no point paging further
                    warn!("🚪 fan-in stream closed under '{app}', stopping early");
                    return summary;
                }
                summary.records += 1;
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        info!("✅ '{app}' done: {} records over {} pages", summary.records, summary.pages);
        summary
    }

    async fn emit_failure(&self, err: crate::errors::ExportError) {
        warn!("💀 '{}' fetch loop giving up: {err}", self.window.name);
        // ⚠️ if the stream is already closed the driver has stopped caring, which is fine
        let _ = self.tx.send(ExportItem::Failure(err)).await;
    }
}

impl Worker for FetchWorker {
    type Output = FetchSummary;

    fn start(self) -> JoinHandle<FetchSummary> {
        tokio::spawn(self.fetch_all().in_current_span())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::InMemoryActivityApi;
    use crate::errors::ExportError;
    use chrono::TimeZone;
    use serde_json::{Value, json};
    use std::time::Duration;

    fn an_item(n: usize) -> Value {
        json!({ "id": { "time": "2023-04-05T05:55:00.000Z", "uniqueQualifier": n.to_string() } })
    }

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 4, 5, 6, 0, 0).unwrap()
    }

    async fn drain(rx: async_channel::Receiver<ExportItem>) -> Vec<ExportItem> {
        let mut items = Vec::new();
        while let Ok(item) = rx.recv().await {
            items.push(item);
        }
        items
    }

    #[tokio::test]
    async fn the_one_where_every_page_is_followed_to_the_end() {
        let api = InMemoryActivityApi::new().with_pages(
            Application::Drive,
            vec![vec![an_item(1), an_item(2)], vec![an_item(3)], vec![an_item(4)]],
        );
        let (tx, rx) = async_channel::unbounded();
        let worker = FetchWorker::new(
            Arc::new(ActivityBackend::InMemory(api.clone())),
            ApplicationWindow::new(Application::Drive, Duration::from_secs(600)),
            base_time(),
            2,
            tx,
        );

        let summary = worker.start().await.expect("💀 worker should not panic");
        assert_eq!(summary, FetchSummary { app: Application::Drive, pages: 3, records: 4, failed: false });

        let items = drain(rx).await;
        assert_eq!(items.len(), 4);
        assert!(items.iter().all(|i| matches!(i, ExportItem::Record(r) if r.source_app == Application::Drive)));

        let requests = api.requests().await;
        assert_eq!(requests.len(), 3);
        // 🪟 same window on every page, only the token moves
        assert!(requests.iter().all(|q| q.start_time == Utc.with_ymd_and_hms(2023, 4, 5, 5, 50, 0).unwrap()));
        assert!(requests.iter().all(|q| q.end_time == base_time() && q.max_results == 2));
        assert_eq!(
            requests.iter().map(|q| q.page_token.clone()).collect::<Vec<_>>(),
            vec![None, Some("page-1".to_string()), Some("page-2".to_string())]
        );
    }

    #[tokio::test]
    async fn the_one_where_a_page_failure_is_the_last_word() {
        let api = InMemoryActivityApi::new()
            .with_pages(Application::Login, vec![vec![an_item(1)], vec![an_item(2)], vec![an_item(3)]])
            .failing_on_page(Application::Login, 1, "503 backend error");
        let (tx, rx) = async_channel::unbounded();
        let worker = FetchWorker::new(
            Arc::new(ActivityBackend::InMemory(api.clone())),
            ApplicationWindow::new(Application::Login, Duration::from_secs(3600)),
            base_time(),
            1000,
            tx,
        );

        let summary = worker.start().await.expect("💀 worker should not panic");
        assert!(summary.failed);
        assert_eq!(summary.records, 1);

        let items = drain(rx).await;
        assert_eq!(items.len(), 2);
        assert!(matches!(items[0], ExportItem::Record(_)));
        assert!(matches!(
            &items[1],
            ExportItem::Failure(ExportError::UpstreamFetch { app: Application::Login, .. })
        ));
        // 🛑 no third request after the failure
        assert_eq!(api.requests().await.len(), 2);
    }

    #[tokio::test]
    async fn the_one_where_a_malformed_item_stops_the_loop() {
        let api = InMemoryActivityApi::new().with_pages(
            Application::Admin,
            vec![vec![an_item(1), json!({ "id": { "time": "yesterday-ish" } }), an_item(3)]],
        );
        let (tx, rx) = async_channel::unbounded();
        let worker = FetchWorker::new(
            Arc::new(ActivityBackend::InMemory(api)),
            ApplicationWindow::new(Application::Admin, Duration::from_secs(600)),
            base_time(),
            1000,
            tx,
        );

        let summary = worker.start().await.expect("💀 worker should not panic");
        assert!(summary.failed);

        let items = drain(rx).await;
        assert_eq!(items.len(), 2);
        assert!(matches!(&items[1], ExportItem::Failure(ExportError::MalformedRecord { .. })));
    }
}
