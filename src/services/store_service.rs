//! src/services/store_service.rs
//!
//! The request-to-object-store translation layer. Every HTTP operation maps
//! onto one idempotent, streaming, error-normalized call against an
//! S3-compatible store. The store is consumed through the [`ObjectStore`]
//! trait so handlers can be exercised against an in-memory fake; the
//! production implementation ([`S3Store`]) wraps the AWS SDK client with
//! path-style addressing for MinIO compatibility.

use crate::models::{
    object::{ObjectMeta, StoredObject},
    presign::PresignedGrant,
};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::{
    error::{ProvideErrorMetadata, SdkError},
    presigning::PresigningConfig,
    primitives::ByteStream,
    types::{CompletedMultipartUpload, CompletedPart},
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{StreamExt, stream::BoxStream};
use std::{io, sync::Arc, time::Duration};
use thiserror::Error;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

/// A bounded-memory byte stream flowing to or from the store.
pub type ByteSource = BoxStream<'static, io::Result<Bytes>>;

/// Parts are staged in buffers of this size before being flushed to the
/// store; uploads never hold more than one part in memory.
const PART_SIZE: usize = 8 * 1024 * 1024;

/// Chunk size for streaming downloads back to the client.
const DOWNLOAD_CHUNK: usize = 8 * 1024;

const MAX_OBJECT_KEY_LEN: usize = 1024;

/// Normalized store failure taxonomy. SDK error types never cross this
/// boundary.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("invalid object key")]
    InvalidKey,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("access denied by object store")]
    AccessDenied,
    #[error("object store unavailable: {0}")]
    Unavailable(String),
    #[error("object store error: {0}")]
    Internal(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Basic key validation to avoid trivial path traversal vectors.
///
/// Rejects empty or oversized keys, keys that begin with `/` or contain
/// `..`, and keys with control characters or backslashes.
pub fn ensure_key_safe(key: &str) -> StoreResult<()> {
    if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
        return Err(StoreError::InvalidKey);
    }
    if key.starts_with('/') || key.contains("..") {
        return Err(StoreError::InvalidKey);
    }
    if key
        .bytes()
        .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
    {
        return Err(StoreError::InvalidKey);
    }
    Ok(())
}

/// Object store operations the bridge depends on.
///
/// One instance is constructed at process start and shared across requests;
/// implementations must be safe for concurrent use.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stream-upload an object, replacing any existing object at `key`.
    async fn put_stream(
        &self,
        key: &str,
        content_type: &str,
        body: ByteSource,
    ) -> StoreResult<StoredObject>;

    /// Fetch an object's metadata together with a stream of its bytes.
    async fn get_stream(&self, key: &str) -> StoreResult<(ObjectMeta, ByteSource)>;

    /// Fetch only an object's metadata.
    async fn stat(&self, key: &str) -> StoreResult<ObjectMeta>;

    /// Delete an object. Deleting a key that does not exist is success.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Issue a signed PUT URL bound to `key`, the given content type and
    /// exact length. No store round trip.
    async fn presign_put(
        &self,
        key: &str,
        content_type: &str,
        content_length: i64,
        expires_in: Duration,
    ) -> StoreResult<PresignedGrant>;

    /// Issue a signed GET URL bound to `key`. Existence is not checked;
    /// the store rejects unknown keys at use time.
    async fn presign_get(&self, key: &str, expires_in: Duration) -> StoreResult<PresignedGrant>;

    /// Cheap reachability probe against the configured bucket.
    async fn health(&self) -> StoreResult<()>;
}

/// Shared application state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ObjectStore>,
    pub presign: crate::config::PresignLimits,
}

/// Build an SDK client for an S3-compatible endpoint.
///
/// Path-style addressing is forced; virtual-hosted addressing does not work
/// against MinIO behind a plain hostname.
pub async fn s3_client(
    endpoint: &str,
    region: &str,
    access_key: &str,
    secret_key: &str,
) -> aws_sdk_s3::Client {
    let credentials =
        aws_sdk_s3::config::Credentials::new(access_key, secret_key, None, None, "bucketbridge");
    let sdk_config = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(region.to_string()))
        .endpoint_url(endpoint)
        .credentials_provider(credentials)
        .load()
        .await;
    let config = aws_sdk_s3::config::Builder::from(&sdk_config)
        .force_path_style(true)
        .build();
    aws_sdk_s3::Client::from_conf(config)
}

/// Production [`ObjectStore`] backed by one bucket of an S3-compatible
/// store. Cloning shares the underlying connection pool.
#[derive(Clone)]
pub struct S3Store {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3Store {
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Build the client from application credentials and wrap the
    /// configured bucket.
    pub async fn connect(cfg: &crate::config::AppConfig) -> Self {
        let client = s3_client(&cfg.endpoint, &cfg.region, &cfg.access_key, &cfg.secret_key).await;
        Self::new(client, cfg.bucket.clone())
    }

    /// Flush one staged part of a multipart upload.
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        part: Vec<u8>,
    ) -> StoreResult<CompletedPart> {
        let resp = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(part))
            .send()
            .await
            .map_err(|err| classify("upload part", err))?;

        Ok(CompletedPart::builder()
            .part_number(part_number)
            .set_e_tag(resp.e_tag().map(str::to_string))
            .build())
    }

    /// Best-effort abort of a failed multipart upload so the store does not
    /// accumulate orphaned parts.
    async fn abort_upload(&self, key: &str, upload_id: &str) {
        let result = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await;
        if let Err(err) = result {
            warn!("failed to abort multipart upload for `{key}`: {err}");
        }
    }
}

/// One upload destination for the staging loop. Parts arrive in order
/// starting at 1; `abort` is invoked at most once, after a failure.
#[async_trait]
trait PartSink: Send {
    /// Write a payload that fits in a single part.
    async fn put_single(&mut self, data: Vec<u8>) -> StoreResult<Option<String>>;
    /// Start a multipart upload.
    async fn begin(&mut self) -> StoreResult<()>;
    /// Write one full or final part.
    async fn write_part(&mut self, part_number: i32, data: Vec<u8>) -> StoreResult<()>;
    /// Finish a multipart upload, returning the etag.
    async fn complete(&mut self) -> StoreResult<Option<String>>;
    /// Best-effort cleanup of a failed multipart upload.
    async fn abort(&mut self);
}

/// Stage `body` into parts of at most `part_size` bytes and feed them to
/// the sink. Payloads that fit in one part go through a single write;
/// larger payloads begin a multipart upload, which is aborted on any
/// mid-stream or sink failure. Returns total bytes and the etag.
async fn drive_upload<S: PartSink>(
    sink: &mut S,
    mut body: ByteSource,
    part_size: usize,
) -> StoreResult<(i64, Option<String>)> {
    let mut staged: Vec<u8> = Vec::new();
    let mut total: i64 = 0;
    let mut parts_written: i32 = 0;

    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => {
                if parts_written > 0 {
                    sink.abort().await;
                }
                return Err(StoreError::Internal(format!("upload stream failed: {err}")));
            }
        };
        total += chunk.len() as i64;
        staged.extend_from_slice(&chunk);

        while staged.len() >= part_size {
            if parts_written == 0 {
                sink.begin().await?;
            }
            parts_written += 1;
            let part: Vec<u8> = staged.drain(..part_size).collect();
            if let Err(err) = sink.write_part(parts_written, part).await {
                sink.abort().await;
                return Err(err);
            }
        }
    }

    if parts_written == 0 {
        let etag = sink.put_single(std::mem::take(&mut staged)).await?;
        return Ok((total, etag));
    }

    if !staged.is_empty() {
        parts_written += 1;
        let remainder = std::mem::take(&mut staged);
        if let Err(err) = sink.write_part(parts_written, remainder).await {
            sink.abort().await;
            return Err(err);
        }
    }
    match sink.complete().await {
        Ok(etag) => Ok((total, etag)),
        Err(err) => {
            sink.abort().await;
            Err(err)
        }
    }
}

/// [`PartSink`] over the SDK client: PutObject below one part, multipart
/// upload above it.
struct S3PartSink<'a> {
    store: &'a S3Store,
    key: &'a str,
    content_type: &'a str,
    upload_id: Option<String>,
    parts: Vec<CompletedPart>,
}

#[async_trait]
impl PartSink for S3PartSink<'_> {
    async fn put_single(&mut self, data: Vec<u8>) -> StoreResult<Option<String>> {
        let resp = self
            .store
            .client
            .put_object()
            .bucket(&self.store.bucket)
            .key(self.key)
            .content_type(self.content_type)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|err| classify("put object", err))?;
        Ok(trim_etag(resp.e_tag()))
    }

    async fn begin(&mut self) -> StoreResult<()> {
        let created = self
            .store
            .client
            .create_multipart_upload()
            .bucket(&self.store.bucket)
            .key(self.key)
            .content_type(self.content_type)
            .send()
            .await
            .map_err(|err| classify("create multipart upload", err))?;
        let id = created.upload_id().unwrap_or_default().to_string();
        if id.is_empty() {
            return Err(StoreError::Internal(
                "store returned no multipart upload id".into(),
            ));
        }
        self.upload_id = Some(id);
        Ok(())
    }

    async fn write_part(&mut self, part_number: i32, data: Vec<u8>) -> StoreResult<()> {
        let id = self
            .upload_id
            .clone()
            .ok_or_else(|| StoreError::Internal("multipart upload not begun".into()))?;
        let completed = self
            .store
            .upload_part(self.key, &id, part_number, data)
            .await?;
        self.parts.push(completed);
        Ok(())
    }

    async fn complete(&mut self) -> StoreResult<Option<String>> {
        let id = self
            .upload_id
            .clone()
            .ok_or_else(|| StoreError::Internal("multipart upload not begun".into()))?;
        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(std::mem::take(&mut self.parts)))
            .build();
        let resp = self
            .store
            .client
            .complete_multipart_upload()
            .bucket(&self.store.bucket)
            .key(self.key)
            .upload_id(&id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|err| classify("complete multipart upload", err))?;
        Ok(trim_etag(resp.e_tag()))
    }

    async fn abort(&mut self) {
        if let Some(id) = self.upload_id.take() {
            self.store.abort_upload(self.key, &id).await;
        }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put_stream(
        &self,
        key: &str,
        content_type: &str,
        body: ByteSource,
    ) -> StoreResult<StoredObject> {
        ensure_key_safe(key)?;

        let mut sink = S3PartSink {
            store: self,
            key,
            content_type,
            upload_id: None,
            parts: Vec::new(),
        };
        let (total, etag) = drive_upload(&mut sink, body, PART_SIZE).await?;

        debug!("stored `{key}` ({total} bytes)");
        Ok(StoredObject {
            key: key.to_string(),
            size_bytes: total,
            etag,
            content_type: content_type.to_string(),
        })
    }

    async fn get_stream(&self, key: &str) -> StoreResult<(ObjectMeta, ByteSource)> {
        ensure_key_safe(key)?;
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| match err.as_service_error() {
                Some(svc) if svc.is_no_such_key() => StoreError::NotFound(key.to_string()),
                _ => classify("get object", err),
            })?;

        let meta = ObjectMeta {
            key: key.to_string(),
            content_length: resp.content_length().unwrap_or(0),
            content_type: resp.content_type().map(str::to_string),
            etag: trim_etag(resp.e_tag()),
            last_modified: resp.last_modified().and_then(to_chrono),
        };
        let reader = resp.body.into_async_read();
        let stream = ReaderStream::with_capacity(reader, DOWNLOAD_CHUNK).boxed();
        Ok((meta, stream))
    }

    async fn stat(&self, key: &str) -> StoreResult<ObjectMeta> {
        ensure_key_safe(key)?;
        let resp = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| match err.as_service_error() {
                Some(svc) if svc.is_not_found() => StoreError::NotFound(key.to_string()),
                _ => classify("head object", err),
            })?;

        Ok(ObjectMeta {
            key: key.to_string(),
            content_length: resp.content_length().unwrap_or(0),
            content_type: resp.content_type().map(str::to_string),
            etag: trim_etag(resp.e_tag()),
            last_modified: resp.last_modified().and_then(to_chrono),
        })
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        ensure_key_safe(key)?;
        // DeleteObject succeeds for absent keys; the idempotent-delete
        // contract falls straight out of the store semantics.
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| classify("delete object", err))?;
        debug!("deleted `{key}`");
        Ok(())
    }

    async fn presign_put(
        &self,
        key: &str,
        content_type: &str,
        content_length: i64,
        expires_in: Duration,
    ) -> StoreResult<PresignedGrant> {
        ensure_key_safe(key)?;
        let presigning = presigning_config(expires_in)?;
        let presigned = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .content_length(content_length)
            .presigned(presigning)
            .await
            .map_err(|err| classify("presign put", err))?;

        Ok(grant_from_presigned(&presigned, expires_in))
    }

    async fn presign_get(&self, key: &str, expires_in: Duration) -> StoreResult<PresignedGrant> {
        ensure_key_safe(key)?;
        let presigning = presigning_config(expires_in)?;
        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|err| classify("presign get", err))?;

        Ok(grant_from_presigned(&presigned, expires_in))
    }

    async fn health(&self) -> StoreResult<()> {
        // The cheapest authenticated operation scoped to the bucket.
        self.client
            .list_objects_v2()
            .bucket(&self.bucket)
            .max_keys(1)
            .send()
            .await
            .map_err(|err| classify("list objects", err))?;
        Ok(())
    }
}

fn presigning_config(expires_in: Duration) -> StoreResult<PresigningConfig> {
    PresigningConfig::expires_in(expires_in)
        .map_err(|err| StoreError::InvalidArgument(format!("presign expiry: {err}")))
}

fn grant_from_presigned(
    presigned: &aws_sdk_s3::presigning::PresignedRequest,
    expires_in: Duration,
) -> PresignedGrant {
    PresignedGrant {
        url: presigned.uri().to_string(),
        method: presigned.method().to_string(),
        headers: presigned
            .headers()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect(),
        expires_in: expires_in.as_secs(),
    }
}

/// Collapse an SDK error into the bridge taxonomy. Callers handle
/// operation-specific not-found variants before delegating here.
pub(crate) fn classify<E, R>(op: &str, err: SdkError<E, R>) -> StoreError
where
    E: ProvideErrorMetadata,
{
    match &err {
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => {
            StoreError::Unavailable(format!("{op}: {err}"))
        }
        SdkError::ServiceError(_) => match err.code() {
            Some("AccessDenied") | Some("InvalidAccessKeyId") | Some("SignatureDoesNotMatch") => {
                StoreError::AccessDenied
            }
            Some("SlowDown") | Some("ServiceUnavailable") => {
                StoreError::Unavailable(format!("{op}: store asked to back off"))
            }
            _ => StoreError::Internal(format!(
                "{op}: {}",
                err.message().unwrap_or("unclassified service error")
            )),
        },
        _ => StoreError::Internal(format!("{op}: {err}")),
    }
}

/// Store ETags arrive wrapped in quotes; keep them bare internally and add
/// quotes back only when emitting headers.
fn trim_etag(etag: Option<&str>) -> Option<String> {
    etag.map(|e| e.trim_matches('"').to_string())
}

fn to_chrono(ts: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(ts.secs(), ts.subsec_nanos())
}
