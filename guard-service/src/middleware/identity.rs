//! Identity asserted by the upstream gateway.
//!
//! The BFF authenticates the caller and forwards the result as `x-user-id`,
//! `x-user-email` and `x-org-id`. This service trusts those headers and never
//! authenticates on its own.

use axum::{
    async_trait,
    extract::{FromRequestParts, Request},
    http::{request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use service_core::{error::AppError, middleware::RequestId, utils::ClientNetwork};
use std::convert::Infallible;

use crate::models::ActorContext;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_EMAIL_HEADER: &str = "x-user-email";
pub const ORG_ID_HEADER: &str = "x-org-id";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: String,
    pub email: Option<String>,
    pub org_id: Option<String>,
}

impl AuthUser {
    /// `None` unless a non-empty `x-user-id` is present.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let user_id = header_value(headers, USER_ID_HEADER)?;
        Some(Self {
            user_id,
            email: header_value(headers, USER_EMAIL_HEADER),
            org_id: header_value(headers, ORG_ID_HEADER),
        })
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

/// Attach [`AuthUser`] to the request extensions when the gateway supplied one.
pub async fn identity_middleware(mut req: Request, next: Next) -> Response {
    if let Some(user) = AuthUser::from_headers(req.headers()) {
        tracing::Span::current().record("user_id", user.user_id.as_str());
        req.extensions_mut().insert(user);
    }
    next.run(req).await
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Authentication required")))
    }
}

/// Actor context for audit records, built from whatever the request carries.
#[derive(Debug, Clone)]
pub struct Actor(pub ActorContext);

impl Actor {
    pub fn from_parts(parts: &Parts) -> Self {
        Self(actor_context(
            &parts.headers,
            &parts.extensions,
            parts.method.as_str(),
            parts.uri.path(),
        ))
    }
}

pub(crate) fn actor_context(
    headers: &HeaderMap,
    extensions: &axum::http::Extensions,
    method: &str,
    path: &str,
) -> ActorContext {
    let mut actor = ActorContext::anonymous(
        ClientNetwork::from_request(headers, extensions),
        method,
        path,
    );
    actor.request_id = extensions.get::<RequestId>().map(|id| id.as_str().to_string());

    if let Some(user) = extensions.get::<AuthUser>() {
        actor.user_id = Some(user.user_id.clone());
        actor.email = user.email.clone();
        actor.org_id = user.org_id.clone();
    }
    actor
}

#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Actor::from_parts(parts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_identity_requires_user_id() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_EMAIL_HEADER, HeaderValue::from_static("a@example.com"));
        assert_eq!(AuthUser::from_headers(&headers), None);

        headers.insert(USER_ID_HEADER, HeaderValue::from_static("  "));
        assert_eq!(AuthUser::from_headers(&headers), None);

        headers.insert(USER_ID_HEADER, HeaderValue::from_static("u1"));
        headers.insert(ORG_ID_HEADER, HeaderValue::from_static("acme"));
        let user = AuthUser::from_headers(&headers).unwrap();
        assert_eq!(user.user_id, "u1");
        assert_eq!(user.email.as_deref(), Some("a@example.com"));
        assert_eq!(user.org_id.as_deref(), Some("acme"));
    }

    #[test]
    fn test_actor_context_collects_identity_and_network() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("198.51.100.4, 10.0.0.1"));
        headers.insert("user-agent", HeaderValue::from_static("curl/8.0"));

        let mut extensions = axum::http::Extensions::new();
        extensions.insert(RequestId("req-1".to_string()));
        extensions.insert(AuthUser {
            user_id: "u1".to_string(),
            email: None,
            org_id: Some("acme".to_string()),
        });

        let actor = actor_context(&headers, &extensions, "DELETE", "/api/orders/1");
        assert_eq!(actor.user_id.as_deref(), Some("u1"));
        assert_eq!(actor.org_id.as_deref(), Some("acme"));
        assert_eq!(actor.network.ip_address, "198.51.100.4");
        assert_eq!(actor.network.user_agent, "curl/8.0");
        assert_eq!(actor.request_method, "DELETE");
        assert_eq!(actor.request_path, "/api/orders/1");
        assert_eq!(actor.request_id.as_deref(), Some("req-1"));
    }

    #[test]
    fn test_anonymous_actor_has_unknown_network() {
        let actor = actor_context(
            &HeaderMap::new(),
            &axum::http::Extensions::new(),
            "POST",
            "/api/auth/signin",
        );
        assert_eq!(actor.user_id, None);
        assert_eq!(actor.network.ip_address, "unknown");
    }
}
