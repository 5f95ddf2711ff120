use axum::{
    extract::{Query, State},
    Json,
};
use service_core::error::AppError;

use crate::middleware::AuthUser;
use crate::models::{AuditEventResponse, AuditQuery};
use crate::AppState;

/// Read the audit trail, newest first.
///
/// Callers that belong to an organization only ever see that organization's
/// events. Callers without one only see their own.
pub async fn list_audit_events(
    State(state): State<AppState>,
    user: AuthUser,
    Query(mut query): Query<AuditQuery>,
) -> Result<Json<Vec<AuditEventResponse>>, AppError> {
    match user.org_id {
        Some(org_id) => query.org_id = Some(org_id),
        None => query.user_id = Some(user.user_id),
    }

    let events = state.audit_store.query(&query).await.map_err(|e| {
        tracing::error!(error = %e, "Audit query failed");
        e
    })?;

    Ok(Json(events.into_iter().map(AuditEventResponse::from).collect()))
}
