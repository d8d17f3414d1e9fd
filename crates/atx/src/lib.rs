//! 📦 atx: audit trail export.
//!
//! Pages admin activity logs per application, keys every item by its identity, and drops each
//! one into object storage as gzipped JSON, exactly once per key. Run it again and it only
//! writes what's new.
//!
//! 🧠 Knowledge graph:
//! - `run` is the production entry point: secrets → credentials → reports API + S3 → pipeline.
//! - `run_pipeline` is the same pipeline with the collaborators handed in, which is what tests use.

pub mod app_config;
pub mod backends;
pub mod codec;
pub mod common;
pub mod credentials;
pub mod errors;
pub mod keyer;
mod supervisors;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{Instrument, info, info_span};

use crate::app_config::AppConfig;
use crate::backends::{ActivityBackend, S3Store, SecretBackend, SecretsManagerStore, StorageBackend};
use crate::common::RunReport;
use crate::credentials::bootstrap_reports_api;

pub use supervisors::{RunPlan, run_pipeline};

/// 🚀 One full export run against the real collaborators.
pub async fn run(app_config: AppConfig) -> Result<RunReport> {
    app_config
        .validate()
        .context("💀 The configuration was rejected before anything started")?;
    let plan = RunPlan::from_config(&app_config, Utc::now());

    let (api, storage) = async {
        info!("🔑 bootstrapping credentials from {}", app_config.secret_ref);
        let api = bootstrap_reports_api(
            &SecretBackend::SecretsManager(SecretsManagerStore::new()),
            &app_config.secret_ref,
            &app_config.runtime.api_base_url,
            Utc::now(),
        )
        .await
        .context("💀 Failed to build the reports API client from the stored credentials")?;
        let storage = S3Store::from_env(&app_config.storage_region).await;
        anyhow::Ok((api, storage))
    }
    .instrument(info_span!("bootstrap", run_id = %plan.run_id))
    .await?;

    let report = run_pipeline(plan, ActivityBackend::Reports(api), StorageBackend::S3(storage)).await?;
    Ok(report)
}
