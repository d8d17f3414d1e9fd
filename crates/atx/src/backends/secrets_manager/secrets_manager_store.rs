//! 🔒 Secrets Manager Store: one `GetSecretValue` per run, in the region the ARN names.
//!
//! The secret is the JSON blob holding the OAuth client and its token. Anything the SDK
//! says no to becomes a `Configuration` error, since a run without credentials can't start.

use async_trait::async_trait;
use aws_sdk_secretsmanager::error::DisplayErrorContext;
use tracing::debug;

use crate::backends::SecretStore;
use crate::errors::ExportError;

/// 🔒 AWS Secrets Manager behind the `SecretStore` trait.
///
/// Stateless on purpose: each fetch builds a client for the region named in the ARN.
/// It runs once per export, before anything else, so the extra handshake is noise.
#[derive(Debug, Clone, Default)]
pub struct SecretsManagerStore;

impl SecretsManagerStore {
    pub fn new() -> Self {
        Self
    }
}

/// 🌎 `arn:aws:secretsmanager:ap-northeast-1:1234567890:secret:mytest` → `ap-northeast-1`.
pub fn region_from_arn(secret_arn: &str) -> Result<&str, ExportError> {
    let parts: Vec<&str> = secret_arn.split(':').collect();
    match parts.as_slice() {
        [_, _, _, region, _, _, _] if !region.is_empty() => Ok(*region),
        _ => Err(ExportError::configuration(format!(
            "invalid Secrets Manager ARN format: '{secret_arn}'"
        ))),
    }
}

#[async_trait]
impl SecretStore for SecretsManagerStore {
    async fn fetch(&self, secret_ref: &str) -> Result<String, ExportError> {
        let region = region_from_arn(secret_ref)?;
        debug!("🔒 fetching secret from Secrets Manager in {region}");

        let the_aws_config = aws_config::from_env()
            .region(aws_sdk_secretsmanager::config::Region::new(region.to_string()))
            .load()
            .await;
        let client = aws_sdk_secretsmanager::Client::new(&the_aws_config);

        let output = client
            .get_secret_value()
            .secret_id(secret_ref)
            .send()
            .await
            .map_err(|err| {
                ExportError::configuration(format!(
                    "failed to retrieve secret values: {}",
                    DisplayErrorContext(&err)
                ))
            })?;

        output
            .secret_string()
            .map(str::to_string)
            .ok_or_else(|| ExportError::configuration("secret has no string value (binary secrets are not supported)"))
    }
}
