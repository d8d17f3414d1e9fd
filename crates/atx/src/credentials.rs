//! 🔑 Credentials: from a secret blob to a bearer token.
//!
//! 🎬 The secret store holds two JSON documents stuffed into one JSON document:
//! the OAuth client config (as downloaded from the cloud console) and a token that a human
//! minted once with the consent screen. We unpack both, and if the access token is stale
//! we trade the refresh token for a fresh one. That's the whole OAuth story told here.
//!
//! 💀 Every failure in this module is a `Configuration` error. Nothing has been exported yet,
//! so there's nothing to clean up.

use std::time::Duration;

use chrono::{DateTime, Datelike, TimeDelta, Utc};
use serde::Deserialize;
use tracing::{debug, info};

use crate::backends::{ReportsApi, ReportsApiConfig, SecretBackend, SecretStore};
use crate::errors::ExportError;

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

// ⏳ treat tokens this close to expiry as already expired
const EXPIRY_SLACK_SECS: i64 = 10;

/// 📦 The secret string's shape.
#[derive(Debug, Deserialize)]
struct SecretValues {
    gsuite_client: String,
    gsuite_token: String,
}

#[derive(Debug, Deserialize)]
struct ClientConfigFile {
    installed: Option<ClientConfig>,
    web: Option<ClientConfig>,
}

/// 🪪 The OAuth client: who we are when we ask for tokens.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// 🎟️ A stored token. `expiry` may be missing or the zero time, both of which mean "never".
#[derive(Debug, Clone, Deserialize)]
pub struct StoredToken {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
}

impl StoredToken {
    fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        if self.access_token.is_empty() {
            return false;
        }
        match self.expiry {
            // 🕳️ 0001-01-01 is how "no expiry" gets written down
            Some(expiry) if expiry.year() > 1 => expiry - TimeDelta::seconds(EXPIRY_SLACK_SECS) > now,
            _ => true,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
}

/// 🔑 Everything needed to talk to the reports API on someone's behalf.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub client: ClientConfig,
    pub token: StoredToken,
}

impl Credentials {
    /// 📦 Unpack the secret string: `{"gsuite_client": "<json>", "gsuite_token": "<json>"}`.
    pub fn from_secret(secret: &str) -> Result<Self, ExportError> {
        let values: SecretValues = serde_json::from_str(secret)
            .map_err(|e| ExportError::configuration(format!("failed to parse secret values as JSON: {e}")))?;

        let file: ClientConfigFile = serde_json::from_str(&values.gsuite_client)
            .map_err(|e| ExportError::configuration(format!("unable to parse client secret to config: {e}")))?;
        let client = file.installed.or(file.web).ok_or_else(|| {
            ExportError::configuration("client secret has neither an 'installed' nor a 'web' section")
        })?;

        let token: StoredToken = serde_json::from_str(&values.gsuite_token)
            .map_err(|e| ExportError::configuration(format!("failed to parse oauth token data: {e}")))?;

        Ok(Self { client, token })
    }

    /// 🎟️ A usable access token: the stored one if still fresh, otherwise a refreshed one.
    pub async fn access_token(&self, http: &reqwest::Client, now: DateTime<Utc>) -> Result<String, ExportError> {
        if self.token.is_usable_at(now) {
            debug!("🎟️ stored access token is still fresh");
            return Ok(self.token.access_token.clone());
        }

        let refresh_token = self.token.refresh_token.as_deref().filter(|t| !t.is_empty()).ok_or_else(|| {
            ExportError::configuration("access token is expired and there is no refresh token")
        })?;

        info!("🔄 access token is stale, refreshing at {}", self.client.token_uri);
        let response = http
            .post(&self.client.token_uri)
            .form(&[
                ("client_id", self.client.client_id.as_str()),
                ("client_secret", self.client.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| ExportError::configuration(format!("token refresh request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExportError::configuration(format!(
                "token endpoint answered {status}: {body}"
            )));
        }

        let refreshed: RefreshResponse = response
            .json()
            .await
            .map_err(|e| ExportError::configuration(format!("token endpoint sent an unreadable response: {e}")))?;
        Ok(refreshed.access_token)
    }
}

/// 🚀 Secret ref in, ready-to-page `ReportsApi` out.
pub async fn bootstrap_reports_api(
    secrets: &SecretBackend,
    secret_ref: &str,
    api_base_url: &str,
    now: DateTime<Utc>,
) -> Result<ReportsApi, ExportError> {
    let secret = secrets.fetch(secret_ref).await?;
    let credentials = Credentials::from_secret(&secret)?;

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| ExportError::configuration(format!("failed to build HTTP client for the token endpoint: {e}")))?;
    let access_token = credentials.access_token(&http, now).await?;

    ReportsApi::new(ReportsApiConfig {
        base_url: api_base_url.to_string(),
        access_token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::InMemorySecrets;
    use chrono::TimeZone;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 4, 5, 6, 0, 0).unwrap()
    }

    fn a_secret(token_uri: &str, token: serde_json::Value) -> String {
        json!({
            "gsuite_client": json!({
                "installed": {
                    "client_id": "cid.apps.example.com",
                    "client_secret": "shh",
                    "token_uri": token_uri
                }
            }).to_string(),
            "gsuite_token": token.to_string()
        })
        .to_string()
    }

    #[tokio::test]
    async fn the_one_where_a_fresh_token_is_used_as_is() {
        let credentials = Credentials::from_secret(&a_secret(
            "http://127.0.0.1:1/token",
            json!({ "access_token": "fresh", "refresh_token": "r", "expiry": "2023-04-05T16:00:00+09:00" }),
        ))
        .expect("💀 secret should parse");
        let token = credentials
            .access_token(&reqwest::Client::new(), now())
            .await
            .expect("💀 fresh token");
        assert_eq!(token, "fresh");
    }

    #[tokio::test]
    async fn the_one_where_the_zero_expiry_means_forever() {
        let credentials = Credentials::from_secret(&a_secret(
            "http://127.0.0.1:1/token",
            json!({ "access_token": "ageless", "expiry": "0001-01-01T00:00:00Z" }),
        ))
        .expect("💀 secret should parse");
        let token = credentials
            .access_token(&reqwest::Client::new(), now())
            .await
            .expect("💀 ageless token");
        assert_eq!(token, "ageless");
    }

    #[tokio::test]
    async fn the_one_where_a_stale_token_gets_refreshed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=r3fr3sh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "brand-new",
                "expires_in": 3599,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let credentials = Credentials::from_secret(&a_secret(
            &format!("{}/token", server.uri()),
            json!({ "access_token": "old", "refresh_token": "r3fr3sh", "expiry": "2023-04-05T05:00:00Z" }),
        ))
        .expect("💀 secret should parse");
        let token = credentials
            .access_token(&reqwest::Client::new(), now())
            .await
            .expect("💀 refreshed token");
        assert_eq!(token, "brand-new");
    }

    #[tokio::test]
    async fn the_one_where_the_token_endpoint_says_no() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({ "error": "invalid_grant" })))
            .mount(&server)
            .await;

        let credentials = Credentials::from_secret(&a_secret(
            &format!("{}/token", server.uri()),
            json!({ "access_token": "", "refresh_token": "revoked" }),
        ))
        .expect("💀 secret should parse");
        let err = credentials
            .access_token(&reqwest::Client::new(), now())
            .await
            .expect_err("💀 invalid_grant should fail");
        match err {
            ExportError::Configuration { reason } => assert!(reason.contains("invalid_grant")),
            other => panic!("💀 expected Configuration, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn the_one_where_stale_and_unrefreshable_is_a_config_error() {
        let credentials = Credentials::from_secret(&a_secret(
            "http://127.0.0.1:1/token",
            json!({ "access_token": "old", "expiry": "2020-01-01T00:00:00Z" }),
        ))
        .expect("💀 secret should parse");
        assert!(matches!(
            credentials.access_token(&reqwest::Client::new(), now()).await,
            Err(ExportError::Configuration { .. })
        ));
    }

    #[test]
    fn the_one_where_broken_secrets_are_config_errors() {
        for broken in [
            "not json",
            r#"{"gsuite_client": "{}", "gsuite_token": "{}"}"#,
            r#"{"gsuite_client": "{\"installed\":{\"client_id\":\"a\",\"client_secret\":\"b\"}}", "gsuite_token": "nope"}"#,
            r#"{"gsuite_token": "{}"}"#,
        ] {
            assert!(
                matches!(Credentials::from_secret(broken), Err(ExportError::Configuration { .. })),
                "secret {broken:?} should be rejected"
            );
        }
    }

    #[test]
    fn the_one_where_web_clients_work_too_and_token_uri_has_a_default() {
        let secret = json!({
            "gsuite_client": json!({ "web": { "client_id": "a", "client_secret": "b" } }).to_string(),
            "gsuite_token": json!({ "access_token": "t" }).to_string()
        })
        .to_string();
        let credentials = Credentials::from_secret(&secret).expect("💀 web client should parse");
        assert_eq!(credentials.client.token_uri, DEFAULT_TOKEN_URI);
    }

    #[tokio::test]
    async fn the_one_where_bootstrap_goes_from_ref_to_client() {
        let secrets = SecretBackend::InMemory(InMemorySecrets::new().with_secret(
            "arn:aws:secretsmanager:us-east-1:1:secret:x",
            a_secret("http://127.0.0.1:1/token", json!({ "access_token": "ok" })),
        ));
        let api = bootstrap_reports_api(
            &secrets,
            "arn:aws:secretsmanager:us-east-1:1:secret:x",
            "https://admin.example.com",
            now(),
        )
        .await
        .expect("💀 bootstrap should succeed");
        assert!(format!("{api:?}").contains("admin.example.com"));
        assert!(!format!("{api:?}").contains("ok\""));

        let missing = bootstrap_reports_api(&secrets, "arn:nope", "https://admin.example.com", now()).await;
        assert!(matches!(missing, Err(ExportError::Configuration { .. })));
    }
}
