pub mod config;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;

use axum::{
    http::{header, HeaderName, HeaderValue, Method, Request},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use service_core::middleware::{metrics_middleware, request_id_middleware, REQUEST_ID_HEADER};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::{GuardConfig, CSRF_HEADER};
use crate::middleware::{csrf_guard_middleware, identity_middleware};
use crate::services::{AuditRecorder, AuditStore, CsrfTokenStore};

#[derive(Clone)]
pub struct AppState {
    pub config: GuardConfig,
    pub tokens: CsrfTokenStore,
    pub audit: AuditRecorder,
    pub audit_store: Arc<dyn AuditStore>,
}

/// Router with only this service's own endpoints.
pub fn build_router(state: AppState) -> Router {
    build_router_with(state, Router::new())
}

/// Mount `app_routes` behind the identity and anti-forgery layers together
/// with the session, audit and observability endpoints.
pub fn build_router_with(state: AppState, app_routes: Router<AppState>) -> Router {
    let cors = cors_layer(&state.config.security.allowed_origins);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics::metrics))
        .route("/api/session/token", post(handlers::issue_token))
        .route("/api/session/logout", post(handlers::logout))
        .route("/api/audit/events", get(handlers::list_audit_events))
        .merge(app_routes)
        .layer(from_fn_with_state(state.clone(), csrf_guard_middleware))
        .layer(from_fn(identity_middleware))
        .with_state(state)
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
            let request_id = request
                .headers()
                .get(REQUEST_ID_HEADER)
                .and_then(|value| value.to_str().ok())
                .unwrap_or("-");

            tracing::info_span!(
                "http_request",
                request_id = %request_id,
                method = %request.method(),
                uri = %request.uri(),
                user_id = tracing::field::Empty,
            )
        }))
        .layer(from_fn(request_id_middleware))
        .layer(cors)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static(CSRF_HEADER),
            HeaderName::from_static(REQUEST_ID_HEADER),
        ])
        .expose_headers([HeaderName::from_static(CSRF_HEADER)]);

    // Rejected in prod by config validation.
    if allowed_origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!("Invalid CORS origin '{}': {}. Skipping.", o, e);
                None
            }
        })
        .collect();

    layer.allow_origin(origins)
}
