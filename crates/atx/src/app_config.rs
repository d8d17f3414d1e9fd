//! 🔧 App Configuration: the sacred TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." (every on-call engineer at 3am) 🦆
//!
//! 🏗️ Powered by Figment: `ATX_*` environment variables, optionally merged with a TOML file.
//! The old deployment names (`secret_arn`, `s3_region`, `s3_bucket`, `s3_prefix`) still work
//! as aliases, because the scheduler templates outlive everyone.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

use crate::backends::reports::DEFAULT_API_BASE_URL;
use crate::common::{ApplicationWindow, default_application_windows};
use crate::errors::ExportError;

/// 📦 Everything one export run needs to know about itself.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// 🔒 Secrets store identifier (a Secrets Manager ARN) holding the OAuth client + token.
    #[serde(alias = "secret_arn")]
    pub secret_ref: String,
    #[serde(alias = "s3_region")]
    pub storage_region: String,
    #[serde(alias = "s3_bucket")]
    pub storage_bucket: String,
    /// 🗂️ Prepended verbatim to every object key. Bring your own trailing slash.
    #[serde(default, alias = "s3_prefix")]
    pub storage_prefix: String,
    /// ⏰ The instant every window is anchored to. Absent means "now".
    #[serde(default)]
    pub base_time: Option<DateTime<Utc>>,
    /// 🆔 Correlates every log line of a run. Absent means a fresh UUID.
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default = "default_application_windows")]
    pub applications: Vec<ApplicationWindow>,
}

/// 🎛️ Knobs for the pipeline itself.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// 🧵 Upload workers.
    #[serde(default = "default_upload_parallelism", alias = "num_upload_workers")]
    pub upload_parallelism: usize,
    /// 📬 Work queue slots. Absent means twice the worker count.
    #[serde(default)]
    pub queue_capacity: Option<usize>,
    /// 📄 `maxResults` per page request.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
}

/// ⏳ No application looks further back than this. The activity API only keeps about six months.
pub const MAX_LOOKBACK: Duration = Duration::from_secs(400 * 86_400);

fn default_upload_parallelism() -> usize {
    16
}

fn default_page_size() -> u32 {
    1000
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            upload_parallelism: default_upload_parallelism(),
            queue_capacity: None,
            page_size: default_page_size(),
            api_base_url: default_api_base_url(),
        }
    }
}

impl RuntimeConfig {
    pub fn effective_queue_capacity(&self) -> usize {
        self.queue_capacity
            .unwrap_or_else(|| self.upload_parallelism.saturating_mul(2))
    }
}

impl AppConfig {
    /// 🏗️ A config with the default runtime and application table.
    pub fn new(
        secret_ref: impl Into<String>,
        storage_region: impl Into<String>,
        storage_bucket: impl Into<String>,
        storage_prefix: impl Into<String>,
    ) -> Self {
        Self {
            secret_ref: secret_ref.into(),
            storage_region: storage_region.into(),
            storage_bucket: storage_bucket.into(),
            storage_prefix: storage_prefix.into(),
            base_time: None,
            run_id: None,
            runtime: RuntimeConfig::default(),
            applications: default_application_windows(),
        }
    }

    /// 🔒 Reject configs that can't possibly work, before anything touches the network.
    pub fn validate(&self) -> Result<(), ExportError> {
        if self.storage_bucket.trim().is_empty() {
            return Err(ExportError::configuration("storage_bucket must not be empty"));
        }
        if self.runtime.upload_parallelism == 0 {
            return Err(ExportError::configuration("runtime.upload_parallelism must be at least 1"));
        }
        if self.runtime.effective_queue_capacity() == 0 {
            return Err(ExportError::configuration("runtime.queue_capacity must be at least 1"));
        }
        if self.runtime.page_size == 0 {
            return Err(ExportError::configuration("runtime.page_size must be at least 1"));
        }
        if self.applications.is_empty() {
            return Err(ExportError::configuration("at least one application must be configured"));
        }
        let mut seen = std::collections::BTreeSet::new();
        for window in &self.applications {
            if !seen.insert(window.name) {
                return Err(ExportError::configuration(format!(
                    "application '{}' is configured more than once",
                    window.name
                )));
            }
            if window.lookback > MAX_LOOKBACK {
                return Err(ExportError::configuration(format!(
                    "lookback for '{}' is {}s, more than the {}s maximum",
                    window.name,
                    window.lookback.as_secs(),
                    MAX_LOOKBACK.as_secs()
                )));
            }
            if let Some(base_time) = self.base_time {
                window.range(base_time)?;
            }
        }
        Ok(())
    }
}

/// 🚀 Load the config from `ATX_*` env vars, plus a TOML file if one was given.
///
/// - `None` → env vars only.
/// - `Some(path)` → env vars + TOML, merged. TOML wins on conflicts.
///
/// Nested keys use a double underscore: `ATX_RUNTIME__UPLOAD_PARALLELISM=8`.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {}",
        config_file_name.map(|p| p.display().to_string()).unwrap_or_else(|| "<env only>".to_string())
    );

    let config = Figment::new().merge(Env::prefixed("ATX_").split("__"));
    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (ATX_*).",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (ATX_*). \
                 No file was provided, so this one's all on the environment."
            .to_string(),
    };

    config.extract().context(context_msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Application;
    use std::io::Write;
    use std::time::Duration;

    fn write_test_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("💀 temp file");
        file.write_all(contents.as_bytes()).expect("💀 write temp config");
        file
    }

    #[test]
    fn the_one_where_a_full_toml_lands_in_the_struct() {
        let file = write_test_config(
            r#"
            secret_ref = "arn:aws:secretsmanager:us-east-1:1:secret:gsuite"
            storage_region = "us-east-1"
            storage_bucket = "audit-bucket"
            storage_prefix = "logs/"
            base_time = "2023-04-05T06:00:00Z"
            run_id = "manual-backfill"

            [runtime]
            upload_parallelism = 4
            page_size = 500

            [[applications]]
            name = "login"
            lookback = "2d"

            [[applications]]
            name = "drive"
            lookback = 600
            "#,
        );

        let config = load_config(Some(file.path())).expect("💀 full config should parse");
        assert_eq!(config.storage_bucket, "audit-bucket");
        assert_eq!(config.storage_prefix, "logs/");
        assert_eq!(config.run_id.as_deref(), Some("manual-backfill"));
        assert_eq!(config.base_time.map(|t| t.to_rfc3339()), Some("2023-04-05T06:00:00+00:00".to_string()));
        assert_eq!(config.runtime.upload_parallelism, 4);
        assert_eq!(config.runtime.effective_queue_capacity(), 8);
        assert_eq!(config.runtime.page_size, 500);
        assert_eq!(
            config.applications,
            vec![
                ApplicationWindow::new(Application::Login, Duration::from_secs(2 * 86_400)),
                ApplicationWindow::new(Application::Drive, Duration::from_secs(600)),
            ]
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn the_one_where_defaults_show_up_uninvited_but_helpful() {
        let file = write_test_config(
            r#"
            secret_arn = "arn:aws:secretsmanager:us-east-1:1:secret:gsuite"
            s3_region = "ap-northeast-1"
            s3_bucket = "legacy-bucket"
            "#,
        );

        let config: AppConfig = Figment::new()
            .merge(Toml::file(file.path()))
            .extract()
            .expect("💀 legacy names should parse");
        assert_eq!(config.storage_region, "ap-northeast-1");
        assert_eq!(config.storage_bucket, "legacy-bucket");
        assert_eq!(config.storage_prefix, "");
        assert_eq!(config.base_time, None);
        assert_eq!(config.runtime, RuntimeConfig::default());
        assert_eq!(config.runtime.effective_queue_capacity(), 32);
        assert_eq!(config.applications, default_application_windows());
    }

    #[test]
    fn the_one_where_an_unknown_application_fails_to_load() {
        let file = write_test_config(
            r#"
            secret_ref = "x"
            storage_region = "r"
            storage_bucket = "b"

            [[applications]]
            name = "friendster"
            lookback = "10m"
            "#,
        );
        assert!(load_config(Some(file.path())).is_err());
    }

    #[test]
    fn the_one_where_validation_catches_the_obvious() {
        let good = AppConfig::new("x", "r", "b", "");
        assert!(good.validate().is_ok());

        let mut no_bucket = good.clone();
        no_bucket.storage_bucket = " ".to_string();
        assert!(no_bucket.validate().is_err());

        let mut no_workers = good.clone();
        no_workers.runtime.upload_parallelism = 0;
        assert!(no_workers.validate().is_err());

        let mut no_queue = good.clone();
        no_queue.runtime.queue_capacity = Some(0);
        assert!(no_queue.validate().is_err());

        let mut no_apps = good.clone();
        no_apps.applications.clear();
        assert!(no_apps.validate().is_err());

        let mut twins = good.clone();
        twins.applications.push(ApplicationWindow::new(Application::Login, Duration::from_secs(1)));
        assert!(matches!(twins.validate(), Err(ExportError::Configuration { .. })));
    }

    #[test]
    fn the_one_where_an_absurd_lookback_never_gets_past_validation() {
        let mut config = AppConfig::new("x", "r", "b", "");
        config.applications = vec![
            ApplicationWindow::new(Application::Admin, Duration::from_secs(600)),
            ApplicationWindow::new(Application::Login, Duration::from_secs(u64::MAX / 2)),
        ];
        match config.validate() {
            Err(ExportError::Configuration { reason }) => assert!(reason.contains("'login'")),
            other => panic!("💀 expected a configuration error, got {other:?}"),
        }

        // 📏 right at the cap is still fine
        config.applications[1].lookback = MAX_LOOKBACK;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn the_one_where_the_window_falls_off_the_start_of_time() {
        let mut config = AppConfig::new("x", "r", "b", "");
        config.base_time = Some(DateTime::<Utc>::MIN_UTC + chrono::TimeDelta::days(1));
        config.applications = vec![ApplicationWindow::new(Application::Drive, Duration::from_secs(2 * 86_400))];
        assert!(matches!(config.validate(), Err(ExportError::Configuration { .. })));
    }
}
