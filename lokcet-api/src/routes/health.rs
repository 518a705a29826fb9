use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::sync::Arc;

use lokcet_shared::collections::{self, SERVER_TIME};
use lokcet_shared::{HealthCheck, HealthResponse};

use crate::AppState;

/// Checks the document store and the cache. The cache only holds feed
/// checkpoints, so losing it degrades the service instead of failing it.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Response {
    let server_time_doc = collections::doc(SERVER_TIME, "now");
    let (store, cache) = tokio::join!(
        state.store.get(&server_time_doc),
        state.kv.ping(),
    );
    let checks = vec![
        match store {
            Ok(_) => HealthCheck::pass("document_store"),
            Err(e) => HealthCheck::fail("document_store", e),
        },
        match cache {
            Ok(()) => HealthCheck::pass("cache"),
            Err(e) => HealthCheck::degraded("cache", e),
        },
    ];

    let response = HealthResponse::from_checks("lokcet-api", env!("CARGO_PKG_VERSION"), checks);
    let status = if response.is_serving() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response)).into_response()
}

/// Returns Prometheus metrics.
pub async fn metrics(State(state): State<Arc<AppState>>) -> String {
    state.metrics_handle.render()
}
