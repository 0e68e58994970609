//! Defines routes for the bridge API.
//!
//! ## Structure
//! - **Object endpoints**
//!   - `POST   /files/upload`          -> multipart upload (optional `?key=`)
//!   - `GET    /files/{*key}`          -> streaming download (HEAD returns headers only)
//!   - `DELETE /files/{*key}`          -> idempotent delete
//!   - `GET    /files/{*key}/metadata` -> metadata as JSON (trailing segment
//!     dispatched inside the download handler)
//!
//! - **Presign endpoints**
//!   - `POST /presign/upload`   -> signed PUT URL
//!   - `POST /presign/download` -> signed GET URL
//!
//! - **Health endpoints**
//!   - `GET /healthz` -> liveness
//!   - `GET /readyz`  -> object-store reachability
//!
//! The wildcard `{*key}` allows nested keys like `photos/2025/img.jpg`;
//! static routes take priority over it. The router cannot hold a dedicated
//! metadata route next to the wildcard, so the download handler peels a
//! trailing `/metadata` segment off the captured key.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        object_handlers::{
            delete_object, download_object, head_object, presign_download, presign_upload,
            upload_object,
        },
    },
    services::store_service::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Build and return the router for the whole bridge surface.
///
/// The router carries shared state ([`AppState`]) to all handlers. The
/// upload route lifts the default body limit; upload memory is bounded by
/// streaming, not by a body cap.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // object endpoints
        .route(
            "/files/upload",
            post(upload_object).layer(DefaultBodyLimit::disable()),
        )
        .route(
            "/files/{*key}",
            get(download_object).head(head_object).delete(delete_object),
        )
        // presign endpoints
        .route("/presign/upload", post(presign_upload))
        .route("/presign/download", post(presign_download))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::PresignLimits,
        models::{
            object::{DeleteResponse, ObjectMeta, StoredObject, UploadResponse},
            presign::PresignedGrant,
        },
        services::store_service::{ByteSource, ObjectStore, StoreError, StoreResult},
    };
    use async_trait::async_trait;
    use axum::{
        body::Body,
        http::{Request, Response, StatusCode, header},
    };
    use bytes::Bytes;
    use chrono::Utc;
    use futures::StreamExt;
    use std::{
        collections::HashMap,
        sync::{
            Arc, Mutex,
            atomic::{AtomicBool, Ordering},
        },
        time::Duration,
    };
    use tower::ServiceExt;

    /// In-memory stand-in for the object store.
    #[derive(Default)]
    struct FakeStore {
        objects: Mutex<HashMap<String, (String, Bytes)>>,
        healthy: AtomicBool,
    }

    impl FakeStore {
        fn new() -> Self {
            Self {
                objects: Mutex::new(HashMap::new()),
                healthy: AtomicBool::new(true),
            }
        }
    }

    #[async_trait]
    impl ObjectStore for FakeStore {
        async fn put_stream(
            &self,
            key: &str,
            content_type: &str,
            mut body: ByteSource,
        ) -> StoreResult<StoredObject> {
            let mut bytes = Vec::new();
            while let Some(chunk) = body.next().await {
                let chunk =
                    chunk.map_err(|err| StoreError::Internal(format!("upload stream: {err}")))?;
                bytes.extend_from_slice(&chunk);
            }
            let etag = format!("{:x}", md5::compute(&bytes));
            let size = bytes.len() as i64;
            self.objects.lock().unwrap().insert(
                key.to_string(),
                (content_type.to_string(), Bytes::from(bytes)),
            );
            Ok(StoredObject {
                key: key.to_string(),
                size_bytes: size,
                etag: Some(etag),
                content_type: content_type.to_string(),
            })
        }

        async fn get_stream(&self, key: &str) -> StoreResult<(ObjectMeta, ByteSource)> {
            let (content_type, bytes) = self
                .objects
                .lock()
                .unwrap()
                .get(key)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
            let meta = ObjectMeta {
                key: key.to_string(),
                content_length: bytes.len() as i64,
                content_type: Some(content_type),
                etag: Some(format!("{:x}", md5::compute(&bytes))),
                last_modified: Some(Utc::now()),
            };
            let stream = futures::stream::iter(vec![Ok(bytes)]).boxed();
            Ok((meta, stream))
        }

        async fn stat(&self, key: &str) -> StoreResult<ObjectMeta> {
            let (content_type, bytes) = self
                .objects
                .lock()
                .unwrap()
                .get(key)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
            Ok(ObjectMeta {
                key: key.to_string(),
                content_length: bytes.len() as i64,
                content_type: Some(content_type),
                etag: Some(format!("{:x}", md5::compute(&bytes))),
                last_modified: Some(Utc::now()),
            })
        }

        async fn delete(&self, key: &str) -> StoreResult<()> {
            // Absent keys are success, mirroring DeleteObject semantics.
            self.objects.lock().unwrap().remove(key);
            Ok(())
        }

        async fn presign_put(
            &self,
            key: &str,
            content_type: &str,
            content_length: i64,
            expires_in: Duration,
        ) -> StoreResult<PresignedGrant> {
            let mut headers = std::collections::BTreeMap::new();
            headers.insert("content-type".to_string(), content_type.to_string());
            headers.insert("content-length".to_string(), content_length.to_string());
            Ok(PresignedGrant {
                url: format!(
                    "http://store.test/demo/{key}?X-Amz-Expires={}",
                    expires_in.as_secs()
                ),
                method: "PUT".into(),
                headers,
                expires_in: expires_in.as_secs(),
            })
        }

        async fn presign_get(
            &self,
            key: &str,
            expires_in: Duration,
        ) -> StoreResult<PresignedGrant> {
            Ok(PresignedGrant {
                url: format!(
                    "http://store.test/demo/{key}?X-Amz-Expires={}",
                    expires_in.as_secs()
                ),
                method: "GET".into(),
                headers: std::collections::BTreeMap::new(),
                expires_in: expires_in.as_secs(),
            })
        }

        async fn health(&self) -> StoreResult<()> {
            if self.healthy.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(StoreError::Unavailable("store is down".into()))
            }
        }
    }

    fn test_app(store: Arc<FakeStore>) -> Router {
        routes().with_state(AppState {
            store,
            presign: PresignLimits {
                default_expiry_secs: 900,
                max_expiry_secs: 604_800,
            },
        })
    }

    async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
        app.clone().oneshot(request).await.unwrap()
    }

    async fn body_bytes(response: Response<Body>) -> Bytes {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
    }

    const BOUNDARY: &str = "bridge-test-boundary";

    fn multipart_request(uri: &str, filename: Option<&str>, payload: &[u8]) -> Request<Body> {
        let disposition = match filename {
            Some(name) => format!("form-data; name=\"file\"; filename=\"{name}\""),
            None => "form-data; name=\"file\"".to_string(),
        };
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(
            format!("Content-Disposition: {disposition}\r\nContent-Type: text/plain\r\n\r\n")
                .as_bytes(),
        );
        body.extend_from_slice(payload);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn json_request(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn delete_request(uri: &str) -> Request<Body> {
        Request::builder()
            .method("DELETE")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn upload_then_download_round_trips() {
        let app = test_app(Arc::new(FakeStore::new()));

        let response = send(
            &app,
            multipart_request("/files/upload", Some("hello.txt"), b"hi"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let uploaded: UploadResponse =
            serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(uploaded.key, "hello.txt");
        assert_eq!(uploaded.size_bytes, 2);
        assert_eq!(uploaded.content_type, "text/plain");
        assert!(uploaded.etag.is_some());

        let response = send(&app, get_request("/files/hello.txt")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE].to_str().unwrap(),
            "text/plain"
        );
        assert_eq!(
            response.headers()[header::CONTENT_LENGTH].to_str().unwrap(),
            "2"
        );
        assert!(
            response.headers()[header::CONTENT_DISPOSITION]
                .to_str()
                .unwrap()
                .contains("hello.txt")
        );
        assert_eq!(&body_bytes(response).await[..], b"hi");
    }

    #[tokio::test]
    async fn metadata_reports_uploaded_length() {
        let app = test_app(Arc::new(FakeStore::new()));
        send(
            &app,
            multipart_request("/files/upload", Some("hello.txt"), b"hi"),
        )
        .await;

        let response = send(&app, get_request("/files/hello.txt/metadata")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let meta: ObjectMeta = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(meta.key, "hello.txt");
        assert_eq!(meta.content_length, 2);
        assert_eq!(meta.content_type.as_deref(), Some("text/plain"));
        assert!(meta.last_modified.is_some());
    }

    #[tokio::test]
    async fn end_to_end_scenario() {
        // upload "hello.txt" with "hi" → metadata length 2 → download "hi"
        // → delete → download is not-found
        let app = test_app(Arc::new(FakeStore::new()));

        let response = send(
            &app,
            multipart_request("/files/upload", Some("hello.txt"), b"hi"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = send(&app, get_request("/files/hello.txt/metadata")).await;
        let meta: ObjectMeta = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(meta.content_length, 2);

        let response = send(&app, get_request("/files/hello.txt")).await;
        assert_eq!(&body_bytes(response).await[..], b"hi");

        let response = send(&app, delete_request("/files/hello.txt")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let deleted: DeleteResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(deleted.key, "hello.txt");

        let response = send(&app, get_request("/files/hello.txt")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn nested_keys_round_trip() {
        let app = test_app(Arc::new(FakeStore::new()));

        let response = send(
            &app,
            multipart_request(
                "/files/upload?key=photos/2025/img.jpg",
                Some("img.jpg"),
                b"jpeg-bytes",
            ),
        )
        .await;
        let uploaded: UploadResponse =
            serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(uploaded.key, "photos/2025/img.jpg");

        let response = send(&app, get_request("/files/photos/2025/img.jpg")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(&body_bytes(response).await[..], b"jpeg-bytes");
    }

    #[tokio::test]
    async fn metadata_addresses_nested_keys() {
        let app = test_app(Arc::new(FakeStore::new()));
        send(
            &app,
            multipart_request(
                "/files/upload?key=photos/2025/img.jpg",
                Some("img.jpg"),
                b"jpeg-bytes",
            ),
        )
        .await;

        let response = send(&app, get_request("/files/photos/2025/img.jpg/metadata")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let meta: ObjectMeta = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(meta.key, "photos/2025/img.jpg");
        assert_eq!(meta.content_length, 10);
    }

    #[tokio::test]
    async fn head_returns_headers_without_a_body() {
        let app = test_app(Arc::new(FakeStore::new()));
        send(
            &app,
            multipart_request("/files/upload?key=docs/readme.md", Some("readme.md"), b"hi"),
        )
        .await;

        let request = Request::builder()
            .method("HEAD")
            .uri("/files/docs/readme.md")
            .body(Body::empty())
            .unwrap();
        let response = send(&app, request).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_LENGTH].to_str().unwrap(),
            "2"
        );
        assert!(body_bytes(response).await.is_empty());
    }

    #[tokio::test]
    async fn delete_of_missing_key_is_success() {
        let app = test_app(Arc::new(FakeStore::new()));
        let response = send(&app, delete_request("/files/never-existed.bin")).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn download_of_missing_key_is_not_found() {
        let app = test_app(Arc::new(FakeStore::new()));
        let response = send(&app, get_request("/files/missing.txt")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = send(&app, get_request("/files/missing.txt/metadata")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn upload_without_filename_or_key_is_rejected() {
        let app = test_app(Arc::new(FakeStore::new()));
        let response = send(&app, multipart_request("/files/upload", None, b"hi")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn upload_with_traversal_key_is_rejected() {
        let app = test_app(Arc::new(FakeStore::new()));
        let response = send(
            &app,
            multipart_request("/files/upload?key=..%2Fevil", Some("evil.txt"), b"x"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn upload_key_query_overrides_filename() {
        let app = test_app(Arc::new(FakeStore::new()));
        let response = send(
            &app,
            multipart_request("/files/upload?key=renamed.txt", Some("hello.txt"), b"hi"),
        )
        .await;
        let uploaded: UploadResponse =
            serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(uploaded.key, "renamed.txt");
        assert_eq!(uploaded.filename.as_deref(), Some("hello.txt"));
    }

    #[tokio::test]
    async fn presign_upload_issues_a_put_grant() {
        let app = test_app(Arc::new(FakeStore::new()));
        let response = send(
            &app,
            json_request(
                "/presign/upload",
                serde_json::json!({
                    "key": "hello.txt",
                    "content_type": "text/plain",
                    "content_length": 2,
                    "expires_in": 600
                }),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let grant: PresignedGrant = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(grant.method, "PUT");
        assert_eq!(grant.expires_in, 600);
        assert!(grant.url.contains("hello.txt"));
        assert_eq!(grant.headers.get("content-type").unwrap(), "text/plain");
    }

    #[tokio::test]
    async fn presign_upload_validates_arguments() {
        let app = test_app(Arc::new(FakeStore::new()));

        // zero expiry
        let response = send(
            &app,
            json_request(
                "/presign/upload",
                serde_json::json!({
                    "key": "a.txt", "content_type": "text/plain",
                    "content_length": 2, "expires_in": 0
                }),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // expiry above the configured maximum
        let response = send(
            &app,
            json_request(
                "/presign/upload",
                serde_json::json!({
                    "key": "a.txt", "content_type": "text/plain",
                    "content_length": 2, "expires_in": 605_000
                }),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // non-positive length
        let response = send(
            &app,
            json_request(
                "/presign/upload",
                serde_json::json!({
                    "key": "a.txt", "content_type": "text/plain",
                    "content_length": 0, "expires_in": 60
                }),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn presign_download_defaults_expiry_and_skips_existence_check() {
        let app = test_app(Arc::new(FakeStore::new()));
        let response = send(
            &app,
            json_request(
                "/presign/download",
                serde_json::json!({ "key": "not-uploaded-yet.txt" }),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let grant: PresignedGrant = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(grant.method, "GET");
        assert_eq!(grant.expires_in, 900);
    }

    #[tokio::test]
    async fn readiness_tracks_store_reachability() {
        let store = Arc::new(FakeStore::new());
        let app = test_app(store.clone());

        let response = send(&app, get_request("/readyz")).await;
        assert_eq!(response.status(), StatusCode::OK);

        store.healthy.store(false, Ordering::SeqCst);
        let response = send(&app, get_request("/readyz")).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        // Probe detail stays in the log; the body carries a fixed message.
        let body = String::from_utf8(body_bytes(response).await.to_vec()).unwrap();
        assert!(body.contains("object store unreachable"));
        assert!(!body.contains("store is down"));

        // liveness never flips
        let response = send(&app, get_request("/healthz")).await;
        assert_eq!(response.status(), StatusCode::OK);

        store.healthy.store(true, Ordering::SeqCst);
        let response = send(&app, get_request("/readyz")).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
