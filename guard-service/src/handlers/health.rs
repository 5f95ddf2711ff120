use axum::{extract::State, Json};
use serde_json::{json, Value};
use service_core::error::AppError;

use crate::AppState;

pub async fn health_check(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    state.audit_store.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Audit store health check failed");
        AppError::ServiceUnavailable
    })?;

    Ok(Json(json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
        "checks": {
            "audit_store": "up"
        },
        "csrf_tokens": state.tokens.len(),
    })))
}
