//! Bucket-backed object store over the S3-compatible XML API.
//!
//! Google Cloud Storage accepts S3 requests at `storage.googleapis.com` with
//! HMAC interoperability credentials, so the same client serves both.

use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::primitives::ByteStream;

use super::object_store::{ObjectStore, StoreError};

pub const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";
/// Region the interoperability endpoint expects when none is configured.
pub const FALLBACK_REGION: &str = "auto";

pub struct S3ObjectStore {
    bucket: String,
    client: aws_sdk_s3::Client,
}

impl S3ObjectStore {
    pub fn new(bucket: impl Into<String>, client: aws_sdk_s3::Client) -> Self {
        Self {
            bucket: bucket.into(),
            client,
        }
    }

    /// Client from the ambient credential chain. `OBJECT_STORE_ENDPOINT`
    /// overrides the endpoint; set it to an empty string to use AWS S3.
    /// Every call, retries included, is bounded by `timeout`.
    pub async fn from_env(bucket: impl Into<String>, timeout: Duration) -> Self {
        let shared = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let endpoint = std::env::var("OBJECT_STORE_ENDPOINT")
            .unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());
        let mut builder = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(true)
            .timeout_config(timeout_config(timeout));
        if shared.region().is_none() {
            builder = builder.region(Region::new(FALLBACK_REGION));
        }
        if !endpoint.trim().is_empty() {
            builder = builder.endpoint_url(endpoint);
        }
        Self::new(bucket, aws_sdk_s3::Client::from_conf(builder.build()))
    }

    fn backend(operation: &'static str, key: &str, error: impl std::fmt::Display) -> StoreError {
        StoreError::Backend {
            operation,
            key: key.to_string(),
            message: error.to_string(),
        }
    }
}

/// Bounds a whole operation and each attempt within it, connect included.
pub fn timeout_config(timeout: Duration) -> TimeoutConfig {
    TimeoutConfig::builder()
        .connect_timeout(timeout)
        .operation_timeout(timeout)
        .operation_attempt_timeout(timeout)
        .build()
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StoreError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(body))
            .send()
            .await
            .map(|_| ())
            .map_err(|error| Self::backend("put", key, aws_sdk_s3::error::DisplayErrorContext(error)))
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let page = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|error| {
                    Self::backend("list", prefix, aws_sdk_s3::error::DisplayErrorContext(error))
                })?;
            keys.extend(
                page.contents()
                    .iter()
                    .filter_map(|object| object.key().map(str::to_string)),
            );
            match page.next_continuation_token() {
                Some(token) if page.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let output = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => output,
            Err(error) => {
                let missing = error
                    .as_service_error()
                    .is_some_and(|service| service.is_no_such_key());
                if missing {
                    return Err(StoreError::NotFound {
                        key: key.to_string(),
                    });
                }
                return Err(Self::backend(
                    "get",
                    key,
                    aws_sdk_s3::error::DisplayErrorContext(error),
                ));
            }
        };
        let bytes = output
            .body
            .collect()
            .await
            .map_err(|error| Self::backend("read", key, error))?;
        Ok(bytes.into_bytes().to_vec())
    }

    async fn delete_object(&self, key: &str) -> Result<(), StoreError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map(|_| ())
            .map_err(|error| {
                Self::backend("delete", key, aws_sdk_s3::error::DisplayErrorContext(error))
            })
    }

    fn describe(&self, key: &str) -> String {
        format!("gs://{}/{key}", self.bucket)
    }
}
