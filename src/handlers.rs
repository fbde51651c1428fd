// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! HTTP surface for the blog API.
//!
//! Handlers only route: they map the method and path to an [`Operation`]
//! and hand it to the [`Pipeline`], which owns every decision after that.

use crate::config::Config;
use crate::error::ApiError;
use crate::links::API_PREFIX;
use crate::models::Kind;
use crate::pipeline::{Operation, Pipeline, RequestContext};
use axum::{
    extract::{DefaultBodyLimit, Path, Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::error;

/// Shared application state.
pub struct AppState {
    pub pipeline: Pipeline,
    pub config: Config,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    let media = state.pipeline.media();
    let media_files = ServeDir::new(media.root());
    let media_mount = media.mount_path().to_string();

    let mut router = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route(API_PREFIX, get(api_root).fallback(method_not_allowed))
        .route(
            &format!("{API_PREFIX}/status"),
            get(status).fallback(method_not_allowed),
        )
        .route(
            &format!("{API_PREFIX}/:collection"),
            get(list).post(create).fallback(method_not_allowed),
        )
        .route(
            &format!("{API_PREFIX}/:collection/:id"),
            get(retrieve)
                .put(replace)
                .patch(partial_update)
                .delete(destroy)
                .fallback(method_not_allowed),
        );

    if state.config.metrics.enabled {
        router = router.route(&state.config.metrics.path, get(metrics));
    }

    router = router
        .nest_service(&media_mount, media_files)
        .layer(DefaultBodyLimit::max(state.config.media.max_upload_bytes));

    if let Some(cors) = cors_layer(&state.config.allowed_origins) {
        router = router.layer(cors);
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

/// CORS restricted to the configured origins, if any.
fn cors_layer(allowed_origins: &[String]) -> Option<CorsLayer> {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    if origins.is_empty() {
        return None;
    }

    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::PATCH,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT]),
    )
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "blog-api",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Prometheus scrape endpoint.
pub async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match state.pipeline.metrics().gather() {
        Ok(text) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Cannot encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn status(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let (parts, _) = request.into_parts();
    state.pipeline.status(&RequestContext::from_parts(&parts))
}

async fn api_root(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let (parts, _) = request.into_parts();
    state
        .pipeline
        .handle(RequestContext::from_parts(&parts), Operation::Root)
        .await
}

async fn list(
    State(state): State<Arc<AppState>>,
    Path(collection): Path<String>,
    request: Request,
) -> Response {
    let (parts, _) = request.into_parts();
    let ctx = RequestContext::from_parts(&parts);
    match Kind::from_segment(&collection) {
        Some(kind) => state.pipeline.handle(ctx, Operation::List(kind)).await,
        None => state.pipeline.reject(&ctx, ApiError::NotFound),
    }
}

async fn create(
    State(state): State<Arc<AppState>>,
    Path(collection): Path<String>,
    request: Request,
) -> Response {
    let (parts, body) = request.into_parts();
    let ctx = RequestContext::from_parts(&parts);
    match Kind::from_segment(&collection) {
        Some(kind) => {
            let body = Request::from_parts(parts, body);
            state.pipeline.handle(ctx, Operation::Create(kind, body)).await
        }
        None => state.pipeline.reject(&ctx, ApiError::NotFound),
    }
}

async fn retrieve(
    State(state): State<Arc<AppState>>,
    Path((collection, id)): Path<(String, String)>,
    request: Request,
) -> Response {
    let (parts, _) = request.into_parts();
    let ctx = RequestContext::from_parts(&parts);
    match target(&collection, &id) {
        Some((kind, id)) => state.pipeline.handle(ctx, Operation::Retrieve(kind, id)).await,
        None => state.pipeline.reject(&ctx, ApiError::NotFound),
    }
}

async fn replace(
    State(state): State<Arc<AppState>>,
    Path((collection, id)): Path<(String, String)>,
    request: Request,
) -> Response {
    update(state, &collection, &id, request, false).await
}

async fn partial_update(
    State(state): State<Arc<AppState>>,
    Path((collection, id)): Path<(String, String)>,
    request: Request,
) -> Response {
    update(state, &collection, &id, request, true).await
}

async fn update(
    state: Arc<AppState>,
    collection: &str,
    id: &str,
    request: Request,
    partial: bool,
) -> Response {
    let (parts, body) = request.into_parts();
    let ctx = RequestContext::from_parts(&parts);
    match target(collection, id) {
        Some((kind, id)) => {
            let body = Request::from_parts(parts, body);
            let op = Operation::Update {
                kind,
                id,
                body,
                partial,
            };
            state.pipeline.handle(ctx, op).await
        }
        None => state.pipeline.reject(&ctx, ApiError::NotFound),
    }
}

async fn destroy(
    State(state): State<Arc<AppState>>,
    Path((collection, id)): Path<(String, String)>,
    request: Request,
) -> Response {
    let (parts, _) = request.into_parts();
    let ctx = RequestContext::from_parts(&parts);
    match target(&collection, &id) {
        Some((kind, id)) => state.pipeline.handle(ctx, Operation::Delete(kind, id)).await,
        None => state.pipeline.reject(&ctx, ApiError::NotFound),
    }
}

async fn method_not_allowed(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let (parts, _) = request.into_parts();
    let ctx = RequestContext::from_parts(&parts);
    let err = ApiError::MethodNotAllowed(parts.method.to_string());
    state.pipeline.reject(&ctx, err)
}

/// Resolve a `/{collection}/{id}` path.
fn target(collection: &str, id: &str) -> Option<(Kind, u64)> {
    let kind = Kind::from_segment(collection)?;
    let id = id.parse::<u64>().ok().filter(|id| *id > 0)?;
    Some((kind, id))
}
