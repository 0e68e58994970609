//! src/services/provisioner.rs
//!
//! One-shot startup provisioning: wait for the object store to accept
//! administrative connections, then idempotently create the bucket, the
//! application identity, and a least-privilege read/write policy scoped to
//! that bucket, and attach the policy to the identity.
//!
//! This is a pure startup gate. The three states (waiting, provisioning,
//! done or failed) run strictly in sequence; it has no steady-state
//! responsibilities once it exits. The admin surface of the store is an
//! opaque capability behind [`StoreAdmin`].

use crate::services::store_service::{
    ObjectStore, S3Store, StoreError, StoreResult, classify, s3_client,
};
use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sigv4::{
    http_request::{
        PayloadChecksumKind, SignableBody, SignableRequest, SigningSettings, sign,
    },
    sign::v4,
};
use serde_json::json;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

/// Typed outcome of the startup readiness gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    TimedOut { attempts: u32 },
}

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("object store not ready after {attempts} attempts")]
    TimedOut { attempts: u32 },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A cheap "is the store answering us" check.
#[async_trait]
pub trait ReadyProbe: Send + Sync {
    async fn probe(&self) -> StoreResult<()>;
}

/// The bridge's startup gate probes the store through its health check.
#[async_trait]
impl ReadyProbe for S3Store {
    async fn probe(&self) -> StoreResult<()> {
        self.health().await
    }
}

/// Poll `probe` on a fixed interval until it succeeds or `max_attempts` is
/// exhausted. Never retries beyond the bound; callers decide what a
/// [`Readiness::TimedOut`] means (for both startup gates: exit non-zero).
pub async fn wait_until_ready<P: ReadyProbe + ?Sized>(
    probe: &P,
    max_attempts: u32,
    interval: Duration,
) -> Readiness {
    for attempt in 1..=max_attempts {
        match probe.probe().await {
            Ok(()) => {
                debug!("object store ready after {attempt} attempt(s)");
                return Readiness::Ready;
            }
            Err(err) => {
                warn!("object store not ready (attempt {attempt}/{max_attempts}): {err}");
            }
        }
        if attempt < max_attempts {
            tokio::time::sleep(interval).await;
        }
    }
    Readiness::TimedOut {
        attempts: max_attempts,
    }
}

/// Administrative operations consumed by the provisioning sequence.
///
/// Every operation is repeat-safe: "already exists" is success.
#[async_trait]
pub trait StoreAdmin: Send + Sync {
    async fn ensure_bucket(&self, bucket: &str) -> StoreResult<()>;
    async fn ensure_user(&self, access_key: &str, secret_key: &str) -> StoreResult<()>;
    async fn ensure_policy(&self, name: &str, document: &str) -> StoreResult<()>;
    async fn attach_policy(&self, policy: &str, access_key: &str) -> StoreResult<()>;
}

/// What to provision: the bucket and the application identity that the
/// bridge will use, plus the name of the policy binding them together.
#[derive(Debug, Clone)]
pub struct ProvisionPlan {
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub policy_name: String,
}

/// Render the least-privilege policy for one bucket: object read/write
/// inside it, listing on the bucket itself, nothing else.
pub fn access_policy_document(bucket: &str) -> String {
    json!({
        "Version": "2012-10-17",
        "Statement": [
            {
                "Effect": "Allow",
                "Action": ["s3:GetObject", "s3:PutObject", "s3:DeleteObject"],
                "Resource": [format!("arn:aws:s3:::{bucket}/*")]
            },
            {
                "Effect": "Allow",
                "Action": ["s3:ListBucket"],
                "Resource": [format!("arn:aws:s3:::{bucket}")]
            }
        ]
    })
    .to_string()
}

/// Drives the waiting → provisioning → done|failed sequence against a
/// [`StoreAdmin`]. Single-instance by construction: it owns the admin
/// handle and runs strictly sequentially.
pub struct Provisioner<A> {
    admin: A,
    plan: ProvisionPlan,
    max_attempts: u32,
    interval: Duration,
}

impl<A: StoreAdmin + ReadyProbe> Provisioner<A> {
    pub fn new(admin: A, plan: ProvisionPlan, max_attempts: u32, interval: Duration) -> Self {
        Self {
            admin,
            plan,
            max_attempts,
            interval,
        }
    }

    pub async fn run(&self) -> Result<(), ProvisionError> {
        info!("waiting for object store admin handshake");
        match wait_until_ready(&self.admin, self.max_attempts, self.interval).await {
            Readiness::Ready => {}
            Readiness::TimedOut { attempts } => {
                return Err(ProvisionError::TimedOut { attempts });
            }
        }

        info!("provisioning bucket `{}`", self.plan.bucket);
        self.admin.ensure_bucket(&self.plan.bucket).await?;

        info!("provisioning identity `{}`", self.plan.access_key);
        self.admin
            .ensure_user(&self.plan.access_key, &self.plan.secret_key)
            .await?;

        info!("provisioning policy `{}`", self.plan.policy_name);
        let document = access_policy_document(&self.plan.bucket);
        self.admin
            .ensure_policy(&self.plan.policy_name, &document)
            .await?;
        self.admin
            .attach_policy(&self.plan.policy_name, &self.plan.access_key)
            .await?;

        info!("provisioning done");
        Ok(())
    }
}

/// Production [`StoreAdmin`] for MinIO: the bucket goes through the S3 API
/// with admin credentials, identity and policy go through the admin REST
/// endpoints with SigV4-signed requests.
pub struct MinioAdmin {
    s3: aws_sdk_s3::Client,
    http: reqwest::Client,
    endpoint: Url,
    region: String,
    credentials: Credentials,
}

impl MinioAdmin {
    pub async fn connect(
        endpoint: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
    ) -> anyhow::Result<Self> {
        let base = Url::parse(endpoint)?;
        let s3 = s3_client(endpoint, region, access_key, secret_key).await;
        Ok(Self {
            s3,
            http: reqwest::Client::new(),
            endpoint: base,
            region: region.to_string(),
            credentials: Credentials::new(access_key, secret_key, None, None, "bucketbridge-admin"),
        })
    }

    /// Sign a request for the admin REST surface. MinIO validates admin
    /// calls with the same SigV4 scheme as its S3 surface (service `s3`),
    /// including a payload hash header.
    fn signed_request(
        &self,
        method: reqwest::Method,
        url: Url,
        body: Vec<u8>,
    ) -> StoreResult<reqwest::Request> {
        let identity = self.credentials.clone().into();
        let mut settings = SigningSettings::default();
        settings.payload_checksum_kind = PayloadChecksumKind::XAmzSha256;
        let params = v4::SigningParams::builder()
            .identity(&identity)
            .region(&self.region)
            .name("s3")
            .time(SystemTime::now())
            .settings(settings)
            .build()
            .map_err(|err| StoreError::Internal(format!("signing params: {err}")))?;

        let host = host_header(&url);
        let headers = [("host", host.as_str())];
        let signable = SignableRequest::new(
            method.as_str(),
            url.as_str(),
            headers.iter().map(|(name, value)| (*name, *value)),
            SignableBody::Bytes(&body),
        )
        .map_err(|err| StoreError::Internal(format!("signable request: {err}")))?;

        let (instructions, _signature) = sign(signable, &params.into())
            .map_err(|err| StoreError::Internal(format!("request signing: {err}")))?
            .into_parts();

        let mut builder = self.http.request(method, url).header("host", &host);
        for (name, value) in instructions.headers() {
            builder = builder.header(name, value);
        }
        builder
            .body(body)
            .build()
            .map_err(|err| StoreError::Internal(format!("admin request build: {err}")))
    }

    /// Issue one signed PUT against an admin endpoint and normalize the
    /// outcome. 409 means the entity already exists, which is success.
    async fn admin_put(
        &self,
        path: &str,
        query: &[(&str, &str)],
        body: Vec<u8>,
    ) -> StoreResult<()> {
        let mut url = self
            .endpoint
            .join(path)
            .map_err(|err| StoreError::Internal(format!("admin url: {err}")))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query.iter().copied());
        }

        let request = self.signed_request(reqwest::Method::PUT, url, body)?;
        let response = self.http.execute(request).await.map_err(|err| {
            if err.is_connect() || err.is_timeout() {
                StoreError::Unavailable(format!("admin endpoint: {err}"))
            } else {
                StoreError::Internal(format!("admin endpoint: {err}"))
            }
        })?;

        let status = response.status();
        match status {
            s if s.is_success() => Ok(()),
            reqwest::StatusCode::CONFLICT => {
                debug!("admin entity at `{path}` already exists");
                Ok(())
            }
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
                Err(StoreError::AccessDenied)
            }
            s if s.is_server_error() => {
                Err(StoreError::Unavailable(format!("admin endpoint returned {s}")))
            }
            s => Err(StoreError::Internal(format!("admin endpoint returned {s}"))),
        }
    }
}

#[async_trait]
impl ReadyProbe for MinioAdmin {
    /// Administrative handshake: the cheapest call requiring admin
    /// credentials on the S3 surface.
    async fn probe(&self) -> StoreResult<()> {
        self.s3
            .list_buckets()
            .send()
            .await
            .map_err(|err| classify("list buckets", err))?;
        Ok(())
    }
}

#[async_trait]
impl StoreAdmin for MinioAdmin {
    async fn ensure_bucket(&self, bucket: &str) -> StoreResult<()> {
        match self.s3.create_bucket().bucket(bucket).send().await {
            Ok(_) => {
                info!("created bucket `{bucket}`");
                Ok(())
            }
            Err(err) => match err.as_service_error() {
                Some(svc)
                    if svc.is_bucket_already_owned_by_you() || svc.is_bucket_already_exists() =>
                {
                    debug!("bucket `{bucket}` already exists");
                    Ok(())
                }
                _ => Err(classify("create bucket", err)),
            },
        }
    }

    async fn ensure_user(&self, access_key: &str, secret_key: &str) -> StoreResult<()> {
        let body = serde_json::to_vec(&json!({
            "secretKey": secret_key,
            "status": "enabled",
        }))
        .map_err(|err| StoreError::Internal(format!("user payload: {err}")))?;
        self.admin_put(
            "/minio/admin/v3/add-user",
            &[("accessKey", access_key)],
            body,
        )
        .await
    }

    async fn ensure_policy(&self, name: &str, document: &str) -> StoreResult<()> {
        self.admin_put(
            "/minio/admin/v3/add-canned-policy",
            &[("name", name)],
            document.as_bytes().to_vec(),
        )
        .await
    }

    async fn attach_policy(&self, policy: &str, access_key: &str) -> StoreResult<()> {
        self.admin_put(
            "/minio/admin/v3/set-user-or-group-policy",
            &[
                ("policyName", policy),
                ("userOrGroup", access_key),
                ("isGroup", "false"),
            ],
            Vec::new(),
        )
        .await
    }
}

fn host_header(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}
