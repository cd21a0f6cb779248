//! S3-compatible repository backend.
//!
//! Works against AWS S3 as well as S3-compatible services (MinIO, Backblaze
//! B2, Tigris, ...) via a custom endpoint. The repository name is the
//! bucket; keys map one-to-one onto object keys.
//!
//! # Credentials
//!
//! Credentials are read from the conventional `AWS_ACCESS_KEY_ID` /
//! `AWS_SECRET_ACCESS_KEY` environment variables. Region defaults to
//! `us-east-1` unless `AWS_REGION` is set; S3-compatible services usually
//! ignore it.

use crate::error::{ErrorKind, Result};
use crate::{VersionedBackend, key, validate_path};
use async_trait::async_trait;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region, retry::RetryConfig};
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Generous default for concurrent S3 requests.
const DEFAULT_CONCURRENT_REQUESTS: usize = 100;

/// S3-compatible repository backend.
///
/// # Examples
///
/// ```no_run
/// use mediathek_storage::backend::S3Backend;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = S3Backend::new(
///     "audb-public",
///     "audb-public",
///     Some("https://s3.dualstack.eu-north-1.amazonaws.com".to_string()),
///     "key-id",
///     "key-secret",
/// )?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct S3Backend {
    name: String,
    client: Client,
    bucket: String,
    /// Rate limiter for concurrent S3 requests.
    rate_limiter: Arc<Semaphore>,
}

impl S3Backend {
    /// Create a new S3 repository backend.
    ///
    /// # Arguments
    /// * `name` - A name for this backend (used in display/logging)
    /// * `bucket` - S3 bucket name (the repository name)
    /// * `endpoint` - Custom endpoint URL for S3-compatible services
    /// * `key_id` - AWS/provider access key ID
    /// * `key_secret` - AWS/provider secret access key
    pub fn new(
        name: impl Into<String>,
        bucket: impl Into<String>,
        endpoint: Option<impl Into<String>>,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
    ) -> Result<Self> {
        let region = std::env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string());
        let credentials = Credentials::new(key_id, key_secret, None, None, "mediathek-config");
        let mut config_builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new(region))
            // Exponential backoff with 1 initial attempt + 3 retries
            .retry_config(RetryConfig::standard().with_max_attempts(4))
            // Stuck requests are cut off; large archive transfers get
            // their overall ceiling from the caller.
            .timeout_config(
                TimeoutConfig::builder().operation_attempt_timeout(std::time::Duration::from_secs(60)).build(),
            )
            // Path-style addressing for compatibility with MinIO and
            // friends
            .force_path_style(true);
        if let Some(endpoint_url) = endpoint {
            config_builder = config_builder.endpoint_url(endpoint_url);
        }
        let client = Client::from_conf(config_builder.build());
        Ok(Self {
            name: name.into(),
            client,
            bucket: bucket.into(),
            rate_limiter: Arc::new(Semaphore::new(DEFAULT_CONCURRENT_REQUESTS)),
        })
    }

    /// Acquire a rate limiter permit before making an S3 API call.
    async fn acquire_permit(&self) -> OwnedSemaphorePermit {
        // unwrap is safe: semaphore is never closed
        self.rate_limiter.clone().acquire_owned().await.unwrap()
    }

    fn object_key(&self, object_key: &str, version: &str) -> Result<String> {
        let physical = key::versioned(object_key, version);
        let validated = validate_path(&physical)?;
        validated
            .to_str()
            .map(|s| s.to_string())
            .ok_or_else(|| exn::Exn::from(ErrorKind::InvalidPath(validated.clone())))
    }
}

/// Translate an SDK error into a storage error kind.
fn map_sdk_error<E, R>(err: SdkError<E, R>, object: &str) -> ErrorKind
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    if matches!(err, SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) | SdkError::ResponseError(_)) {
        return ErrorKind::Network(err.to_string());
    }
    match err.code() {
        Some("NoSuchKey") | Some("NotFound") | Some("NoSuchBucket") => ErrorKind::NotFound(object.to_string()),
        Some(code @ ("AccessDenied" | "InvalidAccessKeyId" | "SignatureDoesNotMatch" | "ExpiredToken")) => {
            ErrorKind::Auth(code.to_string())
        },
        _ => ErrorKind::Backend(err.to_string()),
    }
}

#[async_trait]
impl VersionedBackend for S3Backend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self, object_key: &str, version: &str) -> Result<bool> {
        let object = self.object_key(object_key, version)?;
        let _permit = self.acquire_permit().await;
        match self.client.head_object().bucket(&self.bucket).key(&object).send().await {
            Ok(_) => Ok(true),
            Err(SdkError::ServiceError(ctx)) if ctx.err().is_not_found() => Ok(false),
            Err(e) => Err(exn::Exn::from(map_sdk_error(e, &object))),
        }
    }

    async fn get(&self, object_key: &str, version: &str, dest: &Path) -> Result<()> {
        let object = self.object_key(object_key, version)?;
        let _permit = self.acquire_permit().await;
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&object)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, &object))?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(ErrorKind::Io)?;
        }
        let mut reader = output.body.into_async_read();
        let mut file = tokio::fs::File::create(dest).await.map_err(ErrorKind::Io)?;
        tokio::io::copy(&mut reader, &mut file).await.map_err(ErrorKind::Io)?;
        file.flush().await.map_err(ErrorKind::Io)?;
        Ok(())
    }

    async fn put(&self, source: &Path, object_key: &str, version: &str) -> Result<()> {
        let object = self.object_key(object_key, version)?;
        let _permit = self.acquire_permit().await;
        let body = ByteStream::from_path(source).await.map_err(|e| ErrorKind::Backend(e.to_string()))?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&object)
            .body(body)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, &object))?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let _permit = self.acquire_permit().await;
        let mut request = self.client.list_objects_v2().bucket(&self.bucket);
        if !prefix.is_empty() {
            request = request.prefix(format!("{}/", prefix.trim_end_matches('/')));
        }
        let mut keys = Vec::new();
        let mut pages = request.into_paginator().send();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| map_sdk_error(e, prefix))?;
            for object in page.contents() {
                if let Some(object_key) = object.key() {
                    keys.push(object_key.to_string());
                }
            }
        }
        keys.sort_unstable();
        Ok(keys)
    }

    async fn ls_versions(&self, name: &str) -> Result<Vec<String>> {
        let suffix = format!("/{}", key::HEADER_FILE);
        let prefix = format!("{name}/");
        let mut versions: Vec<String> = self
            .list(name)
            .await?
            .into_iter()
            .filter_map(|object_key| {
                let rest = object_key.strip_prefix(&prefix)?;
                let version = rest.strip_suffix(&suffix)?;
                // Exactly `<name>/<version>/db.yaml`, nothing deeper.
                (!version.is_empty() && !version.contains('/')).then(|| version.to_string())
            })
            .collect();
        versions.sort_unstable();
        Ok(versions)
    }

    async fn delete(&self, object_key: &str, version: &str) -> Result<()> {
        if !self.exists(object_key, version).await? {
            exn::bail!(ErrorKind::NotFound(key::versioned(object_key, version)));
        }
        let object = self.object_key(object_key, version)?;
        let _permit = self.acquire_permit().await;
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&object)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, &object))?;
        Ok(())
    }
}
