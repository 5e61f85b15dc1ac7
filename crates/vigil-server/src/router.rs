//! HTTP surface: tenant-scoped routing plus the internal replication API.
//!
//! Tenant identity arrives in the `X-Tenant-Id` header, injected by an
//! upstream auth layer. All paths under the external URL fall through to the
//! controller, which dispatches to the tenant's engine (or the fallback).
//! The replication endpoints are instance-to-instance only.

use std::sync::Arc;

use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

use crate::controller::MultitenantController;
use crate::replication::StatePart;

/// Header carrying the tenant identity.
pub const TENANT_HEADER: &str = "x-tenant-id";

/// Upper bound on buffered request bodies.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Builds the HTTP router for one controller.
pub fn api_router(controller: Arc<MultitenantController>) -> Router {
    Router::new()
        .route(
            "/api/v1/replication/:tenant/state",
            get(read_state).post(update_state),
        )
        .route("/healthz", get(healthz))
        .fallback(serve_tenant)
        .layer(TraceLayer::new_for_http())
        .with_state(controller)
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "up"}))
}

async fn update_state(
    State(controller): State<Arc<MultitenantController>>,
    Path(tenant): Path<String>,
    Json(part): Json<StatePart>,
) -> Response {
    match controller.update_state(&tenant, part).await {
        Ok(()) => Json(serde_json::json!({})).into_response(),
        Err(e) if e.is_not_found() => (StatusCode::NOT_FOUND, format!("{e}\n")).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, format!("{e}\n")).into_response(),
    }
}

async fn read_state(
    State(controller): State<Arc<MultitenantController>>,
    Path(tenant): Path<String>,
) -> Response {
    match controller.read_state(&tenant) {
        Ok(state) => Json(state).into_response(),
        Err(e) if e.is_not_found() => (StatusCode::NOT_FOUND, format!("{e}\n")).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, format!("{e}\n")).into_response(),
    }
}

async fn serve_tenant(
    State(controller): State<Arc<MultitenantController>>,
    request: Request,
) -> Response {
    let (parts, body) = request.into_parts();

    let Some(tenant) = parts
        .headers
        .get(TENANT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|t| !t.is_empty())
    else {
        return (StatusCode::UNAUTHORIZED, "no tenant ID provided\n").into_response();
    };
    let tenant = tenant.to_string();

    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return (StatusCode::PAYLOAD_TOO_LARGE, "request body too large\n").into_response();
        }
    };

    controller
        .serve_tenant_request(&tenant, &parts.method, parts.uri.path(), &body)
        .await
}

/// Serves the router on the given listener until `shutdown` resolves.
///
/// # Errors
///
/// Returns the underlying I/O error when the server fails.
pub async fn serve(
    listener: tokio::net::TcpListener,
    controller: Arc<MultitenantController>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let router = api_router(controller);
    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await
}
