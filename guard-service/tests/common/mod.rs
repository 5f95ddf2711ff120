//! Shared setup for guard-service integration tests.
//!
//! Builds the full router over an in-memory audit store and a manual clock,
//! with one protected business route mounted at `/api/orders`.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::Response,
    routing::post,
    Router,
};
use chrono::Duration;
use guard_service::{
    build_router_with,
    config::{
        AuditConfig, CsrfConfig, Environment, GuardConfig, MongoConfig, SecurityConfig,
        CSRF_HEADER,
    },
    models::{AuditEvent, AuditEventKind, AuditQuery},
    services::{AuditRecorder, AuditStore, CsrfTokenStore, InMemoryAuditStore, ManualClock},
    AppState,
};
use http_body_util::BodyExt;
use std::sync::Arc;
use tower::ServiceExt;

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<InMemoryAuditStore>,
    pub clock: ManualClock,
}

pub fn test_config() -> GuardConfig {
    GuardConfig {
        common: service_core::config::Config::default(),
        environment: Environment::Dev,
        service_name: "guard-service-test".to_string(),
        service_version: "0.0.0".to_string(),
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        mongodb: MongoConfig {
            uri: "mongodb://unused".to_string(),
            database: "guard_test".to_string(),
        },
        csrf: CsrfConfig::default(),
        audit: AuditConfig::default(),
        security: SecurityConfig {
            allowed_origins: vec!["http://localhost:3000".to_string()],
        },
    }
}

impl TestApp {
    pub fn new() -> Self {
        let config = test_config();
        let clock = ManualClock::default();
        let store = Arc::new(InMemoryAuditStore::new(
            config.audit.retention(),
            Arc::new(clock.clone()),
        ));
        let tokens = CsrfTokenStore::with_clock(config.csrf.token_ttl(), Arc::new(clock.clone()));
        let audit = AuditRecorder::with_clock(store.clone(), Arc::new(clock.clone()));

        let state = AppState {
            config,
            tokens,
            audit,
            audit_store: store.clone(),
        };

        let orders = Router::new().route(
            "/api/orders",
            post(|| async { (StatusCode::CREATED, "order created") }),
        );
        let router = build_router_with(state.clone(), orders);

        Self {
            router,
            state,
            store,
            clock,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Issue a token for `user_id` through the HTTP endpoint.
    pub async fn sign_in(&self, user_id: &str) -> String {
        let response = self
            .send(
                Request::post("/api/session/token")
                    .header("x-user-id", user_id)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        response
            .headers()
            .get(CSRF_HEADER)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string()
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }
}

/// Let background audit writes run, then return the events of `kind`.
pub async fn settled_events(
    app: &TestApp,
    kind: AuditEventKind,
    expected: usize,
) -> Vec<AuditEvent> {
    for _ in 0..100 {
        let events = app.store.query(&AuditQuery::for_kind(kind)).await.unwrap();
        if events.len() >= expected {
            return events;
        }
        tokio::task::yield_now().await;
    }
    app.store.query(&AuditQuery::for_kind(kind)).await.unwrap()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}
