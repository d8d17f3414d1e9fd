//! 🧵 Workers: the ones who actually do the work while the Supervisor takes all the credit
//! in the sprint retro.
//!
//! - `FetchWorker`: one per application, pages the upstream API into the fan-in stream.
//! - `UploadWorker`: N of them, drain the work queue into the bucket.
//!
//! ⚠️ Workers are the supervisor's private minions. They don't leave this module tree.

use tokio::task::JoinHandle;

mod fetch_worker;
mod upload_worker;

pub(in crate::supervisors) use fetch_worker::{FetchSummary, FetchWorker};
pub(in crate::supervisors) use upload_worker::{UploadStats, UploadTarget, UploadWorker};

/// 🏗️ A background worker, that does work. duh.
///
/// Returns a `JoinHandle` because somebody has to wait for it. Always. No leaked tasks.
pub(crate) trait Worker {
    type Output: Send + 'static;

    fn start(self) -> JoinHandle<Self::Output>;
}
