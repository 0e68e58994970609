//! Presigned URL request and grant payloads.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// JSON body accepted by `POST /presign/upload`.
#[derive(Deserialize, Clone, Debug)]
pub struct PresignUploadRequest {
    /// Key the caller intends to upload to.
    pub key: String,

    /// Content type the upload must carry; signed into the URL.
    pub content_type: String,

    /// Exact payload length in bytes; signed into the URL.
    pub content_length: i64,

    /// Requested validity in seconds. Falls back to the configured default.
    pub expires_in: Option<u64>,
}

/// JSON body accepted by `POST /presign/download`.
#[derive(Deserialize, Clone, Debug)]
pub struct PresignDownloadRequest {
    pub key: String,
    pub expires_in: Option<u64>,
}

/// A short-lived, single-operation signed URL.
///
/// Computed locally from the signing credentials; the bridge neither
/// contacts the store nor persists anything to issue one. The store
/// enforces validity from the signature embedded in the URL.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PresignedGrant {
    /// The signed URL.
    pub url: String,

    /// HTTP method the grant is valid for (`PUT` or `GET`).
    pub method: String,

    /// Headers the caller must send exactly as issued.
    pub headers: BTreeMap<String, String>,

    /// Validity in seconds from the moment of issue.
    pub expires_in: u64,
}
