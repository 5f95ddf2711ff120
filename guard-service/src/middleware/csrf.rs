//! Anti-forgery guard for state-changing requests.
//!
//! Consulted only when the request carries an authenticated identity, uses a
//! non-safe method and targets a path outside the pre-authentication set.
//! Rejections are recorded as `CSRF_VIOLATION` before the 403 is returned.

use axum::{
    extract::{Request, State},
    http::Method,
    middleware::Next,
    response::Response,
};
use service_core::error::{AppError, CsrfRejection};

use super::identity::{actor_context, AuthUser};
use crate::config::{CSRF_EXEMPT_PATHS, CSRF_HEADER};
use crate::AppState;

/// Token issuance endpoint. Reaching it is how a caller obtains its first token.
pub const TOKEN_BOOTSTRAP_PATH: &str = "/api/session/token";

fn is_safe_method(method: &Method) -> bool {
    *method == Method::GET || *method == Method::HEAD || *method == Method::OPTIONS
}

/// Whether a request with this method and path must present a token.
pub fn requires_token(method: &Method, path: &str) -> bool {
    !is_safe_method(method) && path != TOKEN_BOOTSTRAP_PATH && !CSRF_EXEMPT_PATHS.contains(&path)
}

pub async fn csrf_guard_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if !requires_token(req.method(), req.uri().path()) {
        return Ok(next.run(req).await);
    }

    // No identity, nothing to bind against. Authentication is enforced upstream.
    let Some(user_id) = req.extensions().get::<AuthUser>().map(|u| u.user_id.clone()) else {
        return Ok(next.run(req).await);
    };

    // A header that is present but not visible ASCII cannot match any issued token.
    let presented = req
        .headers()
        .get(CSRF_HEADER)
        .map(|v| v.to_str().map(str::trim));

    let rejection = match presented {
        None | Some(Ok("")) => Some(CsrfRejection::Missing),
        Some(Err(_)) => Some(CsrfRejection::Invalid),
        Some(Ok(token)) if !state.tokens.validate(token, &user_id) => {
            Some(CsrfRejection::Invalid)
        }
        Some(Ok(_)) => None,
    };

    let Some(rejection) = rejection else {
        return Ok(next.run(req).await);
    };

    let actor = actor_context(
        req.headers(),
        req.extensions(),
        req.method().as_str(),
        req.uri().path(),
    );
    tracing::warn!(
        user_id = %user_id,
        method = %req.method(),
        path = %req.uri().path(),
        ip = %actor.network.ip_address,
        code = rejection.code(),
        "CSRF check failed"
    );
    state
        .audit
        .csrf_violation(&actor, rejection.message())
        .await;

    Err(AppError::CsrfRejected(rejection))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_methods_never_require_token() {
        for method in [Method::GET, Method::HEAD, Method::OPTIONS] {
            assert!(!requires_token(&method, "/api/orders"));
        }
    }

    #[test]
    fn test_state_changing_methods_require_token() {
        for method in [Method::POST, Method::PUT, Method::PATCH, Method::DELETE] {
            assert!(requires_token(&method, "/api/orders"));
        }
    }

    #[test]
    fn test_pre_auth_routes_are_exempt() {
        for path in CSRF_EXEMPT_PATHS {
            assert!(!requires_token(&Method::POST, path));
        }
        assert!(!requires_token(&Method::POST, TOKEN_BOOTSTRAP_PATH));
        // exact match only
        assert!(requires_token(&Method::POST, "/api/auth/signin/extra"));
        assert!(requires_token(&Method::POST, "/api/session/logout"));
    }
}
