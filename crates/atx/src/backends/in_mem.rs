//! # Previously, on atx...
//!
//! 🎬 The upstream was rate-limited. The bucket was in another account. The secrets were
//! in a vault nobody had the keys to. Someone had to stand in for all three.
//!
//! That someone was this module.
//!
//! `in_mem` provides in-memory stand-ins for every collaborator:
//! - [`InMemoryActivityApi`]: canned pages per application, with a trapdoor on page N.
//! - [`InMemoryStore`]: a `HashMap` bucket that counts probes, puts, and how many writes
//!   were in flight at once. Writes can be slowed down or held at a gate.
//! - [`InMemorySecrets`]: a map from secret ref to secret string.
//!
//! All of them are `Clone` and share their state through `Arc`s, so a test can keep a handle
//! after handing a copy to the pipeline and peek inside afterwards.
//!
//! ⚠️ Not for production. For tests and dry runs. If you deploy this to prod,
//! please also deploy a therapist. 🦆

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, Semaphore};

use crate::backends::{
    ActivityApi, ActivityPage, ActivityQuery, ObjectStore, Probe, SecretStore,
};
use crate::common::Application;
use crate::errors::ExportError;

// ============================================================
//  📡 InMemoryActivityApi
// ============================================================

/// 📡 Canned activity pages. Page tokens are `"page-{n}"`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryActivityApi {
    pages: Arc<HashMap<Application, Vec<Vec<Value>>>>,
    failures: Arc<HashMap<Application, (usize, String)>>,
    requests: Arc<Mutex<Vec<ActivityQuery>>>,
}

impl InMemoryActivityApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// 📄 Every page `app` will ever serve, in order.
    pub fn with_pages(mut self, app: Application, pages: Vec<Vec<Value>>) -> Self {
        Arc::make_mut(&mut self.pages).insert(app, pages);
        self
    }

    /// 💀 Page `page_index` (zero-based) of `app` fails instead of answering.
    pub fn failing_on_page(mut self, app: Application, page_index: usize, reason: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.failures).insert(app, (page_index, reason.into()));
        self
    }

    /// 🧾 Every query received so far, in arrival order.
    pub async fn requests(&self) -> Vec<ActivityQuery> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl ActivityApi for InMemoryActivityApi {
    async fn list_activities(&self, query: &ActivityQuery) -> Result<ActivityPage, ExportError> {
        self.requests.lock().await.push(query.clone());

        let page_index = match query.page_token.as_deref() {
            None => 0,
            Some(token) => token
                .strip_prefix("page-")
                .and_then(|n| n.parse::<usize>().ok())
                .ok_or_else(|| ExportError::upstream(query.app, format!("unknown page token '{token}'")))?,
        };

        if let Some((failing_index, reason)) = self.failures.get(&query.app) {
            if *failing_index == page_index {
                return Err(ExportError::upstream(query.app, reason));
            }
        }

        let pages = self.pages.get(&query.app).map(Vec::as_slice).unwrap_or_default();
        let items = pages.get(page_index).cloned().unwrap_or_default();
        let next_page_token = (page_index + 1 < pages.len()).then(|| format!("page-{}", page_index + 1));
        Ok(ActivityPage {
            items,
            next_page_token,
        })
    }
}

// ============================================================
//  🪣 InMemoryStore
// ============================================================

/// 🪣 A bucket that lives in RAM and keeps score.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    objects: Arc<Mutex<HashMap<(String, String), Vec<u8>>>>,
    probes: Arc<AtomicU64>,
    puts: Arc<AtomicU64>,
    writes_in_flight: Arc<AtomicUsize>,
    peak_writes_in_flight: Arc<AtomicUsize>,
    write_delay: Option<Duration>,
    write_gate: Option<Arc<Semaphore>>,
    failing_probes: Option<String>,
    failing_writes: Option<String>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 🐢 Every put sleeps this long before landing.
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }

    /// 🚧 Puts block until `release_writes` lets them through, one permit per write.
    pub fn with_write_gate(mut self) -> Self {
        self.write_gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    /// 💀 Probes for keys containing `needle` fail with a non-404 error.
    pub fn failing_probes_matching(mut self, needle: impl Into<String>) -> Self {
        self.failing_probes = Some(needle.into());
        self
    }

    /// 💀 Writes for keys containing `needle` fail.
    pub fn failing_writes_matching(mut self, needle: impl Into<String>) -> Self {
        self.failing_writes = Some(needle.into());
        self
    }

    /// 🚦 Let `count` gated writes through.
    pub fn release_writes(&self, count: usize) {
        if let Some(gate) = &self.write_gate {
            gate.add_permits(count);
        }
    }

    /// 🌱 Pre-populate an object, as if an earlier run wrote it.
    pub async fn seed(&self, bucket: &str, key: &str, body: Vec<u8>) {
        self.objects
            .lock()
            .await
            .insert((bucket.to_string(), key.to_string()), body);
    }

    pub async fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .await
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// 🗝️ Every key in `bucket`, sorted.
    pub async fn keys(&self, bucket: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .lock()
            .await
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn probe_count(&self) -> u64 {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn put_count(&self) -> u64 {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn peak_writes_in_flight(&self) -> usize {
        self.peak_writes_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn head_exists(&self, bucket: &str, key: &str) -> Result<Probe, ExportError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.failing_probes.as_deref().is_some_and(|needle| key.contains(needle)) {
            return Err(ExportError::StorageProbe {
                key: key.to_string(),
                reason: "403 Forbidden (injected)".to_string(),
            });
        }
        let exists = self
            .objects
            .lock()
            .await
            .contains_key(&(bucket.to_string(), key.to_string()));
        Ok(if exists { Probe::Found } else { Probe::NotFound })
    }

    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), ExportError> {
        let now_in_flight = self.writes_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_writes_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);

        if let Some(gate) = &self.write_gate {
            // 🚧 a closed semaphore never happens here; treat it like an open gate
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }

        let result = if self.failing_writes.as_deref().is_some_and(|needle| key.contains(needle)) {
            Err(ExportError::StorageWrite {
                key: key.to_string(),
                reason: "503 Slow Down (injected)".to_string(),
            })
        } else {
            self.puts.fetch_add(1, Ordering::SeqCst);
            self.objects
                .lock()
                .await
                .insert((bucket.to_string(), key.to_string()), body);
            Ok(())
        };

        self.writes_in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

// ============================================================
//  🔒 InMemorySecrets
// ============================================================

/// 🔒 Secret ref → secret string.
#[derive(Debug, Clone, Default)]
pub struct InMemorySecrets {
    secrets: Arc<HashMap<String, String>>,
}

impl InMemorySecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, secret_ref: impl Into<String>, value: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.secrets).insert(secret_ref.into(), value.into());
        self
    }
}

#[async_trait]
impl SecretStore for InMemorySecrets {
    async fn fetch(&self, secret_ref: &str) -> Result<String, ExportError> {
        self.secrets
            .get(secret_ref)
            .cloned()
            .ok_or_else(|| ExportError::configuration(format!("no secret stored under '{secret_ref}'")))
    }
}
