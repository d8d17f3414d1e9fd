//! 🔌 Backends: where the real I/O happens.
//!
//! 📡 The activity API pours records in. 🪣 The object store swallows them.
//! 🔒 The secret store knows the password. Everybody else is just moving bytes around.
//!
//! 🎭 Same casting agency as always: a trait per concern, a concrete impl per vendor,
//! and an enum that dispatches so the supervisor never has to care who's on the other end.
//! Each collaborator also has an in-memory understudy for tests and dry runs.
//!
//! ⚠️ All three are shared across tasks behind an `Arc`, so every method takes `&self`.
//! The clients inside (reqwest, the AWS SDK) are already fine with that.
//!
//! 🦆 The duck is here because every file must have one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::common::Application;
use crate::errors::ExportError;

pub mod in_mem;
pub mod reports;
pub mod s3;
pub mod secrets_manager;

pub use in_mem::{InMemoryActivityApi, InMemorySecrets, InMemoryStore};
pub use reports::{ReportsApi, ReportsApiConfig};
pub use s3::S3Store;
pub use secrets_manager::SecretsManagerStore;

// ===== Activity API =====

/// 📄 One page request: which app, which window, which continuation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityQuery {
    pub app: Application,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub page_token: Option<String>,
    pub max_results: u32,
}

/// 📄 One page back. `next_page_token == None` means the well is dry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActivityPage {
    pub items: Vec<Value>,
    pub next_page_token: Option<String>,
}

/// 📡 The upstream audit-activity API.
///
/// # Contract
/// - One call = one page. No retries in here; a failure is an `UpstreamFetch` and that's final.
/// - The token in the returned page is opaque. Hand it back verbatim to get the next page.
#[async_trait]
pub trait ActivityApi: std::fmt::Debug + Send + Sync {
    async fn list_activities(&self, query: &ActivityQuery) -> Result<ActivityPage, ExportError>;
}

#[derive(Debug)]
pub enum ActivityBackend {
    Reports(ReportsApi),
    InMemory(InMemoryActivityApi),
}

#[async_trait]
impl ActivityApi for ActivityBackend {
    async fn list_activities(&self, query: &ActivityQuery) -> Result<ActivityPage, ExportError> {
        match self {
            ActivityBackend::Reports(api) => api.list_activities(query).await,
            ActivityBackend::InMemory(api) => api.list_activities(query).await,
        }
    }
}

// ===== Object Store =====

/// 🔍 What the existence probe found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    Found,
    NotFound,
}

/// 🪣 Write-path object storage.
///
/// # Contract
/// - `head_exists` distinguishes "not there" (`Ok(Probe::NotFound)`) from "couldn't tell" (`Err`).
/// - `put` creates or overwrites. Overwriting with identical bytes is harmless, which is the
///   whole reason two racing workers are allowed to both write.
#[async_trait]
pub trait ObjectStore: std::fmt::Debug + Send + Sync {
    async fn head_exists(&self, bucket: &str, key: &str) -> Result<Probe, ExportError>;
    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), ExportError>;
}

#[derive(Debug)]
pub enum StorageBackend {
    S3(S3Store),
    InMemory(InMemoryStore),
}

#[async_trait]
impl ObjectStore for StorageBackend {
    async fn head_exists(&self, bucket: &str, key: &str) -> Result<Probe, ExportError> {
        match self {
            StorageBackend::S3(store) => store.head_exists(bucket, key).await,
            StorageBackend::InMemory(store) => store.head_exists(bucket, key).await,
        }
    }

    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), ExportError> {
        match self {
            StorageBackend::S3(store) => store.put(bucket, key, body).await,
            StorageBackend::InMemory(store) => store.put(bucket, key, body).await,
        }
    }
}

// ===== Secret Store =====

/// 🔒 Hands back the secret string for an identifier. Any failure is a `Configuration` error.
#[async_trait]
pub trait SecretStore: std::fmt::Debug + Send + Sync {
    async fn fetch(&self, secret_ref: &str) -> Result<String, ExportError>;
}

#[derive(Debug)]
pub enum SecretBackend {
    SecretsManager(SecretsManagerStore),
    InMemory(InMemorySecrets),
}

#[async_trait]
impl SecretStore for SecretBackend {
    async fn fetch(&self, secret_ref: &str) -> Result<String, ExportError> {
        match self {
            SecretBackend::SecretsManager(store) => store.fetch(secret_ref).await,
            SecretBackend::InMemory(store) => store.fetch(secret_ref).await,
        }
    }
}
