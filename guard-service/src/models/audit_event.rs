//! Audit event model - security-relevant actions kept for a bounded window.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use service_core::utils::ClientNetwork;
use uuid::Uuid;

/// Closed set of recorded actions. New kinds are added here, never as free-form strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventKind {
    /// Successful sign-in; a CSRF token was issued for the session.
    LoginSuccess,
    /// Rejected sign-in attempt.
    LoginFailed,
    /// Session ended and its token revoked.
    Logout,
    /// New account registered.
    Signup,
    /// Password reset email requested.
    PasswordResetRequest,
    /// Password reset completed with a valid reset token.
    PasswordResetComplete,
    /// Authenticated user changed their password.
    PasswordChange,
    /// State-changing request with a missing or invalid CSRF token.
    CsrfViolation,
    /// Caller exceeded a rate limit.
    RateLimitExceeded,
    /// Access to a resource without the required permission.
    UnauthorizedAccess,
    /// Account locked after repeated failed sign-ins.
    AccountLocked,
    /// A user's role was changed.
    RoleChange,
    /// Bulk data export.
    DataExport,
    /// Data deleted.
    DataDelete,
    /// Organization or account settings changed.
    SettingsChange,
}

impl AuditEventKind {
    pub const ALL: [AuditEventKind; 15] = [
        AuditEventKind::LoginSuccess,
        AuditEventKind::LoginFailed,
        AuditEventKind::Logout,
        AuditEventKind::Signup,
        AuditEventKind::PasswordResetRequest,
        AuditEventKind::PasswordResetComplete,
        AuditEventKind::PasswordChange,
        AuditEventKind::CsrfViolation,
        AuditEventKind::RateLimitExceeded,
        AuditEventKind::UnauthorizedAccess,
        AuditEventKind::AccountLocked,
        AuditEventKind::RoleChange,
        AuditEventKind::DataExport,
        AuditEventKind::DataDelete,
        AuditEventKind::SettingsChange,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventKind::LoginSuccess => "LOGIN_SUCCESS",
            AuditEventKind::LoginFailed => "LOGIN_FAILED",
            AuditEventKind::Logout => "LOGOUT",
            AuditEventKind::Signup => "SIGNUP",
            AuditEventKind::PasswordResetRequest => "PASSWORD_RESET_REQUEST",
            AuditEventKind::PasswordResetComplete => "PASSWORD_RESET_COMPLETE",
            AuditEventKind::PasswordChange => "PASSWORD_CHANGE",
            AuditEventKind::CsrfViolation => "CSRF_VIOLATION",
            AuditEventKind::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            AuditEventKind::UnauthorizedAccess => "UNAUTHORIZED_ACCESS",
            AuditEventKind::AccountLocked => "ACCOUNT_LOCKED",
            AuditEventKind::RoleChange => "ROLE_CHANGE",
            AuditEventKind::DataExport => "DATA_EXPORT",
            AuditEventKind::DataDelete => "DATA_DELETE",
            AuditEventKind::SettingsChange => "SETTINGS_CHANGE",
        }
    }
}

impl std::str::FromStr for AuditEventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AuditEventKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Invalid audit event kind: {}", s))
    }
}

impl std::fmt::Display for AuditEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered severity: `Info < Warning < Error < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    /// Routine activity.
    Info,
    /// Suspicious or policy-relevant activity.
    Warning,
    /// Activity that changed account state defensively, e.g. a lockout.
    Error,
    /// Activity needing immediate attention.
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
        }
    }
}

/// Who performed an action and where the request came from.
#[derive(Debug, Clone, Default)]
pub struct ActorContext {
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub org_id: Option<String>,
    pub network: ClientNetwork,
    pub request_path: String,
    pub request_method: String,
    pub request_id: Option<String>,
}

impl ActorContext {
    pub fn anonymous(
        network: ClientNetwork,
        request_method: impl Into<String>,
        request_path: impl Into<String>,
    ) -> Self {
        Self {
            network,
            request_method: request_method.into(),
            request_path: request_path.into(),
            ..Default::default()
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_org(mut self, org_id: impl Into<String>) -> Self {
        self.org_id = Some(org_id.into());
        self
    }
}

/// Persisted audit record. Insert-only: nothing updates a record after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID (UUID v4), stored as the document `_id`.
    #[serde(rename = "_id")]
    pub id: String,
    /// What happened.
    pub kind: AuditEventKind,
    /// How much attention the event deserves.
    pub severity: Severity,
    /// Acting user, absent for anonymous or failed attempts.
    pub user_id: Option<String>,
    /// Acting user's email, when known.
    pub email: Option<String>,
    /// Tenant the actor belongs to.
    pub org_id: Option<String>,
    /// Client IP address, or `"unknown"`.
    pub ip_address: String,
    /// Client user agent, or `"unknown"`.
    pub user_agent: String,
    /// Path of the request that triggered the event.
    pub request_path: String,
    /// HTTP method of the triggering request.
    pub request_method: String,
    /// Correlation id from `x-request-id`.
    pub request_id: Option<String>,
    /// Kind-specific payload, e.g. violation reason or old/new role.
    pub details: serde_json::Value,
    /// Time of the call that recorded the event. The TTL index expires on it.
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    /// Build a record, filling identity gaps in `actor` from `details.user_id`,
    /// `details.email` and `details.org_id`.
    pub fn new(
        kind: AuditEventKind,
        severity: Severity,
        actor: &ActorContext,
        details: serde_json::Value,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let from_details = |key: &str| {
            details
                .get(key)
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
        };

        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            severity,
            user_id: actor.user_id.clone().or_else(|| from_details("user_id")),
            email: actor.email.clone().or_else(|| from_details("email")),
            org_id: actor.org_id.clone().or_else(|| from_details("org_id")),
            ip_address: actor.network.ip_address.clone(),
            user_agent: actor.network.user_agent.clone(),
            request_path: actor.request_path.clone(),
            request_method: actor.request_method.clone(),
            request_id: actor.request_id.clone(),
            details,
            timestamp,
        }
    }
}

/// Audit event response for API.
#[derive(Debug, Serialize)]
pub struct AuditEventResponse {
    pub id: String,
    pub kind: AuditEventKind,
    pub severity: Severity,
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub org_id: Option<String>,
    pub ip_address: String,
    pub user_agent: String,
    pub request_path: String,
    pub request_method: String,
    pub details: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl From<AuditEvent> for AuditEventResponse {
    fn from(e: AuditEvent) -> Self {
        Self {
            id: e.id,
            kind: e.kind,
            severity: e.severity,
            user_id: e.user_id,
            email: e.email,
            org_id: e.org_id,
            ip_address: e.ip_address,
            user_agent: e.user_agent,
            request_path: e.request_path,
            request_method: e.request_method,
            details: e.details,
            timestamp: e.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_wire_names() {
        assert_eq!(
            serde_json::to_value(AuditEventKind::CsrfViolation).unwrap(),
            json!("CSRF_VIOLATION")
        );
        for kind in AuditEventKind::ALL {
            assert_eq!(
                serde_json::to_value(kind).unwrap(),
                json!(kind.as_str()),
                "serde name and as_str disagree for {:?}",
                kind
            );
            assert_eq!(kind.as_str().parse::<AuditEventKind>().unwrap(), kind);
        }
        assert!("SOMETHING_ELSE".parse::<AuditEventKind>().is_err());
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Error);
        assert!(Severity::Error < Severity::Critical);
        assert_eq!(serde_json::to_value(Severity::Warning).unwrap(), json!("WARNING"));
    }

    #[test]
    fn test_actor_identity_wins_over_details() {
        let actor = ActorContext::anonymous(ClientNetwork::unknown(), "POST", "/api/orders")
            .with_user("u1")
            .with_org("acme");
        let event = AuditEvent::new(
            AuditEventKind::CsrfViolation,
            Severity::Warning,
            &actor,
            json!({ "user_id": "spoofed", "email": "a@example.com" }),
            Utc::now(),
        );

        assert_eq!(event.user_id.as_deref(), Some("u1"));
        assert_eq!(event.org_id.as_deref(), Some("acme"));
        assert_eq!(event.email.as_deref(), Some("a@example.com"));
        assert_eq!(event.ip_address, "unknown");
    }

    #[test]
    fn test_anonymous_actor_falls_back_to_details() {
        let actor = ActorContext::anonymous(ClientNetwork::unknown(), "POST", "/api/auth/signin");
        let event = AuditEvent::new(
            AuditEventKind::LoginFailed,
            Severity::Warning,
            &actor,
            json!({ "email": "who@example.com", "reason": "bad password" }),
            Utc::now(),
        );

        assert_eq!(event.user_id, None);
        assert_eq!(event.email.as_deref(), Some("who@example.com"));
    }

    #[test]
    fn test_timestamp_stored_as_bson_datetime() {
        let actor = ActorContext::default();
        let event = AuditEvent::new(
            AuditEventKind::Logout,
            Severity::Info,
            &actor,
            json!({}),
            Utc::now(),
        );

        let doc = mongodb::bson::to_document(&event).unwrap();
        assert!(doc.get_datetime("timestamp").is_ok());
        assert_eq!(doc.get_str("kind").unwrap(), "LOGOUT");
    }
}
