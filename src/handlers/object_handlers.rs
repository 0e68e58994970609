//! HTTP handlers for object and presign operations.
//! Streams object bodies in both directions and delegates every storage
//! concern to the shared [`ObjectStore`].

use crate::{
    errors::AppError,
    models::{
        object::{DeleteResponse, ObjectMeta, UploadResponse},
        presign::{PresignDownloadRequest, PresignUploadRequest, PresignedGrant},
    },
    services::store_service::{AppState, ensure_key_safe},
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::{io, time::Duration};

/// Chunks in flight between the inbound multipart stream and the store
/// client; keeps a slow store back-pressuring the client instead of
/// buffering.
const UPLOAD_CHANNEL_DEPTH: usize = 8;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Query params accepted by `POST /files/upload`.
#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    /// Optional object key; falls back to the uploaded filename.
    pub key: Option<String>,
}

/// Upload an object from a multipart form field named `file`.
///
/// The field is bridged chunk-by-chunk into the store upload through a
/// bounded channel; a failure on either side fails the whole operation.
pub async fn upload_object(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(format!("malformed multipart body: {err}")))?
    else {
        return Err(AppError::bad_request("missing multipart field `file`"));
    };
    if field.name() != Some("file") {
        return Err(AppError::bad_request("expected multipart field `file`"));
    }

    let filename = field.file_name().map(str::to_string);
    let key = match query.key.clone().or_else(|| filename.clone()) {
        Some(key) => key,
        None => {
            return Err(AppError::bad_request(
                "no filename provided and no key specified",
            ));
        }
    };
    ensure_key_safe(&key)?;
    let content_type = field
        .content_type()
        .map(str::to_string)
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

    let (mut tx, rx) = futures::channel::mpsc::channel::<io::Result<Bytes>>(UPLOAD_CHANNEL_DEPTH);
    let put = state.store.put_stream(&key, &content_type, rx.boxed());
    let feed = async move {
        loop {
            match field.chunk().await {
                Ok(Some(chunk)) => {
                    // Send fails only when the store side already gave up;
                    // its error is what the client will see.
                    if tx.send(Ok(chunk)).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    let _ = tx.send(Err(io::Error::other(err))).await;
                    break;
                }
            }
        }
    };
    let (stored, ()) = tokio::join!(put, feed);
    let stored = stored?;

    Ok(Json(UploadResponse {
        message: "file uploaded successfully".into(),
        key: stored.key,
        filename,
        content_type: stored.content_type,
        size_bytes: stored.size_bytes,
        etag: stored.etag,
    }))
}

/// Download an object as a streaming response.
///
/// A trailing `/metadata` segment on the captured key switches to the JSON
/// metadata view; the wildcard route cannot coexist with a dedicated
/// metadata route, so dispatch happens here. An object whose key itself
/// ends in `/metadata` is still reachable through HEAD and presigned GET.
pub async fn download_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response, AppError> {
    if let Some(target) = key.strip_suffix("/metadata") {
        let meta = state.store.stat(target).await?;
        return Ok(Json(meta).into_response());
    }

    let (meta, stream) = state.store.get_stream(&key).await?;

    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), &meta);
    Ok(response)
}

/// HEAD variant of download: same headers, no body.
pub async fn head_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response, AppError> {
    let meta = state.store.stat(&key).await?;
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), &meta);
    Ok(response)
}

/// Delete an object. Deleting a key that does not exist is success; the
/// operation is idempotent by contract.
pub async fn delete_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    state.store.delete(&key).await?;
    Ok(Json(DeleteResponse {
        message: "file deleted successfully".into(),
        key,
    }))
}

/// Issue a signed PUT URL for a direct-to-store upload.
pub async fn presign_upload(
    State(state): State<AppState>,
    Json(req): Json<PresignUploadRequest>,
) -> Result<Json<PresignedGrant>, AppError> {
    ensure_key_safe(&req.key)?;
    if req.content_length <= 0 {
        return Err(AppError::bad_request("content_length must be positive"));
    }
    let expires_in = effective_expiry(req.expires_in, &state)?;
    let grant = state
        .store
        .presign_put(&req.key, &req.content_type, req.content_length, expires_in)
        .await?;
    Ok(Json(grant))
}

/// Issue a signed GET URL. Key existence is deliberately not checked;
/// the store rejects unknown keys when the URL is used, which avoids a
/// race between check and use.
pub async fn presign_download(
    State(state): State<AppState>,
    Json(req): Json<PresignDownloadRequest>,
) -> Result<Json<PresignedGrant>, AppError> {
    ensure_key_safe(&req.key)?;
    let expires_in = effective_expiry(req.expires_in, &state)?;
    let grant = state.store.presign_get(&req.key, expires_in).await?;
    Ok(Json(grant))
}

fn effective_expiry(requested: Option<u64>, state: &AppState) -> Result<Duration, AppError> {
    let secs = requested.unwrap_or(state.presign.default_expiry_secs);
    if secs == 0 || secs > state.presign.max_expiry_secs {
        return Err(AppError::bad_request(format!(
            "expires_in must be between 1 and {} seconds",
            state.presign.max_expiry_secs
        )));
    }
    Ok(Duration::from_secs(secs))
}

fn set_object_headers(headers: &mut HeaderMap, meta: &ObjectMeta) {
    let content_type = meta
        .content_type
        .clone()
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.into());
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_CONTENT_TYPE)),
    );

    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&meta.content_length.max(0).to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("0")),
    );

    if let Some(etag) = meta.etag.as_ref() {
        let quoted = format!("\"{}\"", etag);
        if let Ok(value) = HeaderValue::from_str(&quoted) {
            headers.insert(header::ETAG, value);
        }
    }

    if let Some(last_modified) = meta.last_modified.as_ref() {
        if let Ok(value) = HeaderValue::from_str(&last_modified.to_rfc2822()) {
            headers.insert(header::LAST_MODIFIED, value);
        }
    }

    let filename = meta.key.rsplit('/').next().unwrap_or(&meta.key);
    let disposition = format!("attachment; filename=\"{}\"", filename.replace('"', ""));
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
}
