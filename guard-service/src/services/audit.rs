//! Security event recorder.
//!
//! Builds [`AuditEvent`]s from an actor context and appends them to the
//! [`AuditStore`]. Recording sits on the enforcement path, so storage failures
//! never reach the caller: they are logged, counted and handed to an optional
//! observer hook, and the call reports [`AuditOutcome::Dropped`].

use metrics::counter;
use serde_json::{json, Value};
use service_core::error::AppError;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use super::clock::{Clock, SystemClock};
use super::AuditStore;
use crate::models::{ActorContext, AuditEvent, AuditEventKind, Severity};

/// Observer for events that could not be persisted.
pub type AuditFailureHook = Arc<dyn Fn(&AuditEvent, &AppError) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditOutcome {
    Recorded,
    Dropped,
}

#[derive(Clone)]
pub struct AuditRecorder {
    store: Arc<dyn AuditStore>,
    clock: Arc<dyn Clock>,
    failures: Arc<AtomicU64>,
    on_failure: Option<AuditFailureHook>,
}

impl AuditRecorder {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn AuditStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            failures: Arc::new(AtomicU64::new(0)),
            on_failure: None,
        }
    }

    pub fn with_failure_hook(mut self, hook: AuditFailureHook) -> Self {
        self.on_failure = Some(hook);
        self
    }

    /// Events dropped because storage rejected them, since construction.
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub async fn record(
        &self,
        kind: AuditEventKind,
        severity: Severity,
        actor: &ActorContext,
        details: Value,
    ) -> AuditOutcome {
        let event = AuditEvent::new(kind, severity, actor, details, self.clock.now());
        self.persist(event).await
    }

    /// Stamp the event now and persist it on a background task.
    pub fn record_detached(
        &self,
        kind: AuditEventKind,
        severity: Severity,
        actor: &ActorContext,
        details: Value,
    ) {
        let event = AuditEvent::new(kind, severity, actor, details, self.clock.now());
        let recorder = self.clone();
        tokio::spawn(async move {
            recorder.persist(event).await;
        });
    }

    async fn persist(&self, event: AuditEvent) -> AuditOutcome {
        match self.store.insert(&event).await {
            Ok(()) => {
                counter!("audit_events_recorded_total", "kind" => event.kind.as_str())
                    .increment(1);
                match event.severity {
                    Severity::Info => tracing::info!(
                        kind = %event.kind,
                        user_id = ?event.user_id,
                        path = %event.request_path,
                        "Security event recorded"
                    ),
                    Severity::Warning => tracing::warn!(
                        kind = %event.kind,
                        user_id = ?event.user_id,
                        path = %event.request_path,
                        ip = %event.ip_address,
                        "Security event recorded"
                    ),
                    Severity::Error | Severity::Critical => tracing::error!(
                        kind = %event.kind,
                        severity = event.severity.as_str(),
                        user_id = ?event.user_id,
                        path = %event.request_path,
                        ip = %event.ip_address,
                        "Security event recorded"
                    ),
                }
                AuditOutcome::Recorded
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                counter!("audit_write_failures_total", "kind" => event.kind.as_str())
                    .increment(1);
                tracing::error!(
                    error = %e,
                    kind = %event.kind,
                    severity = event.severity.as_str(),
                    user_id = ?event.user_id,
                    "Failed to write security audit event"
                );
                if let Some(hook) = &self.on_failure {
                    hook(&event, &e);
                }
                AuditOutcome::Dropped
            }
        }
    }

    // ==================== Authentication ====================

    pub async fn login_success(&self, actor: &ActorContext) -> AuditOutcome {
        self.record(AuditEventKind::LoginSuccess, Severity::Info, actor, json!({}))
            .await
    }

    pub async fn login_failed(
        &self,
        actor: &ActorContext,
        email: &str,
        reason: &str,
    ) -> AuditOutcome {
        self.record(
            AuditEventKind::LoginFailed,
            Severity::Warning,
            actor,
            json!({ "email": email, "reason": reason }),
        )
        .await
    }

    pub async fn logout(&self, actor: &ActorContext) -> AuditOutcome {
        self.record(AuditEventKind::Logout, Severity::Info, actor, json!({}))
            .await
    }

    pub async fn signup(&self, actor: &ActorContext, email: &str) -> AuditOutcome {
        self.record(
            AuditEventKind::Signup,
            Severity::Info,
            actor,
            json!({ "email": email }),
        )
        .await
    }

    // ==================== Password lifecycle ====================

    pub async fn password_reset_request(
        &self,
        actor: &ActorContext,
        email: &str,
    ) -> AuditOutcome {
        self.record(
            AuditEventKind::PasswordResetRequest,
            Severity::Info,
            actor,
            json!({ "email": email }),
        )
        .await
    }

    pub async fn password_reset_complete(
        &self,
        actor: &ActorContext,
        email: &str,
    ) -> AuditOutcome {
        self.record(
            AuditEventKind::PasswordResetComplete,
            Severity::Info,
            actor,
            json!({ "email": email }),
        )
        .await
    }

    pub async fn password_change(&self, actor: &ActorContext) -> AuditOutcome {
        self.record(AuditEventKind::PasswordChange, Severity::Info, actor, json!({}))
            .await
    }

    // ==================== Violations ====================

    pub async fn csrf_violation(&self, actor: &ActorContext, reason: &str) -> AuditOutcome {
        self.record(
            AuditEventKind::CsrfViolation,
            Severity::Warning,
            actor,
            json!({
                "reason": reason,
                "method": actor.request_method,
                "path": actor.request_path,
            }),
        )
        .await
    }

    pub async fn rate_limit_exceeded(&self, actor: &ActorContext, limit: &str) -> AuditOutcome {
        self.record(
            AuditEventKind::RateLimitExceeded,
            Severity::Warning,
            actor,
            json!({ "limit": limit }),
        )
        .await
    }

    pub async fn unauthorized_access(
        &self,
        actor: &ActorContext,
        resource: &str,
        required_permission: Option<&str>,
    ) -> AuditOutcome {
        self.record(
            AuditEventKind::UnauthorizedAccess,
            Severity::Warning,
            actor,
            json!({ "resource": resource, "required_permission": required_permission }),
        )
        .await
    }

    pub async fn account_locked(
        &self,
        actor: &ActorContext,
        email: &str,
        failed_attempts: u32,
    ) -> AuditOutcome {
        self.record(
            AuditEventKind::AccountLocked,
            Severity::Error,
            actor,
            json!({ "email": email, "failed_attempts": failed_attempts }),
        )
        .await
    }

    // ==================== Administrative changes ====================

    pub async fn role_change(
        &self,
        actor: &ActorContext,
        target_user_id: &str,
        old_role: &str,
        new_role: &str,
    ) -> AuditOutcome {
        self.record(
            AuditEventKind::RoleChange,
            Severity::Warning,
            actor,
            json!({
                "target_user_id": target_user_id,
                "old_role": old_role,
                "new_role": new_role,
            }),
        )
        .await
    }

    pub async fn data_export(
        &self,
        actor: &ActorContext,
        resource: &str,
        record_count: u64,
    ) -> AuditOutcome {
        self.record(
            AuditEventKind::DataExport,
            Severity::Info,
            actor,
            json!({ "resource": resource, "record_count": record_count }),
        )
        .await
    }

    pub async fn data_delete(
        &self,
        actor: &ActorContext,
        resource: &str,
        resource_id: &str,
    ) -> AuditOutcome {
        self.record(
            AuditEventKind::DataDelete,
            Severity::Warning,
            actor,
            json!({ "resource": resource, "resource_id": resource_id }),
        )
        .await
    }

    pub async fn settings_change(
        &self,
        actor: &ActorContext,
        setting: &str,
        old_value: Value,
        new_value: Value,
    ) -> AuditOutcome {
        self.record(
            AuditEventKind::SettingsChange,
            Severity::Info,
            actor,
            json!({ "setting": setting, "old_value": old_value, "new_value": new_value }),
        )
        .await
    }
}
