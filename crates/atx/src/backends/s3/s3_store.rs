//! 🪣📡 S3 Store: probe first, write second, never ask twice.
//!
//! The probe is a `HeadObject`. A modeled `NotFound` or a bare 404 means "go ahead and write".
//! Anything else (403, 500, a DNS hiccup) means we cannot tell, and "cannot tell" is not
//! "not there". That one becomes a `StorageProbe` error and the record is not written.

use async_trait::async_trait;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::operation::head_object::HeadObjectError;
use aws_sdk_s3::primitives::ByteStream;
use tracing::trace;

use crate::backends::{ObjectStore, Probe};
use crate::errors::ExportError;

/// 🪣 AWS S3 behind the `ObjectStore` trait. The SDK client is already `Clone + Send + Sync`.
#[derive(Debug, Clone)]
pub struct S3Store {
    client: aws_sdk_s3::Client,
}

impl S3Store {
    /// 🔧 Build from the ambient AWS environment (env vars, profile, role), pinned to `region`.
    pub async fn from_env(region: &str) -> Self {
        let the_aws_config = aws_config::from_env()
            .region(aws_sdk_s3::config::Region::new(region.to_string()))
            .load()
            .await;
        Self::from_client(aws_sdk_s3::Client::new(&the_aws_config))
    }

    pub fn from_client(client: aws_sdk_s3::Client) -> Self {
        Self { client }
    }
}

/// 🔍 404 in any costume: the modeled `NotFound` or the raw HTTP status.
fn is_not_found(err: &SdkError<HeadObjectError, HttpResponse>) -> bool {
    err.as_service_error().is_some_and(HeadObjectError::is_not_found)
        || err.raw_response().is_some_and(|raw| raw.status().as_u16() == 404)
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn head_exists(&self, bucket: &str, key: &str) -> Result<Probe, ExportError> {
        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(_) => {
                trace!("🔍 s3://{bucket}/{key} already exists");
                Ok(Probe::Found)
            }
            Err(err) if is_not_found(&err) => Ok(Probe::NotFound),
            Err(err) => Err(ExportError::StorageProbe {
                key: key.to_string(),
                reason: DisplayErrorContext(&err).to_string(),
            }),
        }
    }

    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), ExportError> {
        let size = body.len();
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|err| ExportError::StorageWrite {
                key: key.to_string(),
                reason: DisplayErrorContext(&err).to_string(),
            })?;
        trace!("🪣 wrote {size} bytes to s3://{bucket}/{key}");
        Ok(())
    }
}
