//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness reflecting object-store reachability

use crate::services::store_service::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;

/// `GET /healthz`
///
/// Very small liveness probe that always returns 200 OK with a plain JSON
/// body. This endpoint should be cheap and never perform I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Readiness probe that runs a cheap operation against the object store.
/// HTTP 200 while the store is reachable, HTTP 503 when it is not.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    // Probe detail goes to the log; clients only see a fixed message.
    let store_check = match state.store.health().await {
        Ok(()) => (true, None::<String>),
        Err(err) => {
            tracing::warn!("readiness check failed: {err}");
            (false, Some("object store unreachable".to_string()))
        }
    };

    let ok = store_check.0;
    let mut checks = HashMap::new();
    checks.insert(
        "object_store",
        CheckStatus {
            ok,
            error: store_check.1,
        },
    );

    let body = ReadyResponse {
        status: if ok { "ok".into() } else { "error".into() },
        checks,
    };
    let status = if ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}
