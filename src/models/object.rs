//! Object metadata and operation confirmations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata describing a stored object, as reported by the object store.
///
/// Returned verbatim by the metadata endpoint and used to populate the
/// `Content-Type`, `Content-Length`, `ETag`, and `Last-Modified` headers on
/// downloads.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ObjectMeta {
    /// Object key (path-like identifier within the bucket).
    pub key: String,

    /// Size in bytes.
    pub content_length: i64,

    /// Content type (MIME type), if the store recorded one.
    pub content_type: Option<String>,

    /// Checksum recorded by the store, without surrounding quotes.
    pub etag: Option<String>,

    /// Timestamp when the object was last written.
    pub last_modified: Option<DateTime<Utc>>,
}

/// Confirmation returned by the store after a successful upload.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct StoredObject {
    /// Key the object was stored under.
    pub key: String,

    /// Total number of bytes written.
    pub size_bytes: i64,

    /// Checksum reported by the store, without surrounding quotes.
    pub etag: Option<String>,

    /// Content type recorded at upload time.
    pub content_type: String,
}

/// JSON body returned by `POST /files/upload`.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct UploadResponse {
    pub message: String,
    pub key: String,
    /// Original filename from the multipart field, if the client sent one.
    pub filename: Option<String>,
    pub content_type: String,
    pub size_bytes: i64,
    pub etag: Option<String>,
}

/// JSON body returned by `DELETE /files/{key}`.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DeleteResponse {
    pub message: String,
    pub key: String,
}
