use axum::{
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use service_core::error::AppError;

use crate::config::CSRF_HEADER;
use crate::middleware::{Actor, AuthUser};
use crate::models::{AuditEventKind, Severity};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct CsrfTokenResponse {
    pub csrf_token: String,
    pub expires_at: DateTime<Utc>,
}

/// Mint a token for the authenticated caller. Called by the gateway right
/// after sign-in; the token comes back both as `x-csrf-token` and in the body.
pub async fn issue_token(
    State(state): State<AppState>,
    user: AuthUser,
    Actor(actor): Actor,
) -> Result<impl IntoResponse, AppError> {
    let token = state.tokens.issue(&user.user_id);
    let expires_at = state.tokens.now() + state.tokens.ttl();

    let header = HeaderValue::from_str(&token)
        .map_err(|e| AppError::InternalError(anyhow::anyhow!("Invalid token header: {}", e)))?;

    state.audit.login_success(&actor).await;

    let mut headers = HeaderMap::new();
    headers.insert(CSRF_HEADER, header);

    Ok((
        StatusCode::CREATED,
        headers,
        Json(CsrfTokenResponse {
            csrf_token: token,
            expires_at,
        }),
    ))
}

/// End the session bound to the presented token.
///
/// The guard has already validated the token by the time this runs. The
/// LOGOUT record is written in the background so the response never waits on
/// the audit store.
pub async fn logout(
    State(state): State<AppState>,
    user: AuthUser,
    Actor(actor): Actor,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    if let Some(token) = headers.get(CSRF_HEADER).and_then(|v| v.to_str().ok()) {
        state.tokens.invalidate(token.trim());
    }

    tracing::info!(user_id = %user.user_id, "Session ended");
    state
        .audit
        .record_detached(AuditEventKind::Logout, Severity::Info, &actor, json!({}));

    Ok(StatusCode::NO_CONTENT)
}
