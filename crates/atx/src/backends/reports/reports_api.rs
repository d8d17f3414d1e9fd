//! 📡🧾 Reports API: paging through who-did-what-when.
//!
//! COLD OPEN. EXT. SOMEBODY ELSE'S DATA CENTER, 3:47 AM
//!
//! The activity list endpoint returns up to a thousand items and, if there are more,
//! a `nextPageToken`. We hand the token back. It hands us more. Repeat until it stops
//! handing us tokens. Nobody retries. If it says no, it means no.

use std::time::Duration;

use async_trait::async_trait;
use chrono::SecondsFormat;
use serde::Deserialize;
use serde_json::Value;
use tracing::trace;

use crate::backends::{ActivityApi, ActivityPage, ActivityQuery};
use crate::errors::ExportError;

pub const DEFAULT_API_BASE_URL: &str = "https://admin.googleapis.com";

/// 🔧 Where to send requests and what to show the bouncer.
#[derive(Debug, Clone)]
pub struct ReportsApiConfig {
    pub base_url: String,
    pub access_token: String,
}

/// 📡 `reqwest`-backed activity API. Clone-cheap, share-happy.
#[derive(Clone)]
pub struct ReportsApi {
    client: reqwest::Client,
    config: ReportsApiConfig,
}

// 🐛 manual Debug so the bearer token never shows up in a log line
impl std::fmt::Debug for ReportsApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportsApi")
            .field("base_url", &self.config.base_url)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActivitiesResponse {
    #[serde(default)]
    items: Vec<Value>,
    #[serde(default)]
    next_page_token: Option<String>,
}

impl ReportsApi {
    /// 🚀 Build the client. 10s to connect, 60s for a page; big pages of login events are chonky.
    pub fn new(config: ReportsApiConfig) -> Result<Self, ExportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| ExportError::configuration(format!("failed to build HTTP client for the reports API: {e}")))?;
        Ok(Self { client, config })
    }

    fn activities_url(&self, query: &ActivityQuery) -> String {
        format!(
            "{}/admin/reports/v1/activity/users/all/applications/{}",
            self.config.base_url.trim_end_matches('/'),
            query.app
        )
    }
}

/// ⏰ `2023-04-05T06:07:08.000Z`: millis, UTC, trailing `Z`. The API is picky.
pub(crate) fn format_api_time(time: chrono::DateTime<chrono::Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[async_trait]
impl ActivityApi for ReportsApi {
    async fn list_activities(&self, query: &ActivityQuery) -> Result<ActivityPage, ExportError> {
        let mut params = vec![
            ("startTime", format_api_time(query.start_time)),
            ("endTime", format_api_time(query.end_time)),
            ("maxResults", query.max_results.to_string()),
        ];
        if let Some(token) = &query.page_token {
            params.push(("pageToken", token.clone()));
        }

        let response = self
            .client
            .get(self.activities_url(query))
            .bearer_auth(&self.config.access_token)
            .query(&params)
            .send()
            .await
            .map_err(|e| ExportError::upstream(query.app, format!("request never made it: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExportError::upstream(
                query.app,
                format!("reports API answered {status}: {body}"),
            ));
        }

        let parsed: ActivitiesResponse = response
            .json()
            .await
            .map_err(|e| ExportError::upstream(query.app, format!("reports API sent back something that isn't an activity list: {e}")))?;

        trace!(
            "📄 {} items from '{}', more pages: {}",
            parsed.items.len(),
            query.app,
            parsed.next_page_token.is_some()
        );

        Ok(ActivityPage {
            items: parsed.items,
            // 🧹 an empty token means "done", same as no token
            next_page_token: parsed.next_page_token.filter(|t| !t.is_empty()),
        })
    }
}
