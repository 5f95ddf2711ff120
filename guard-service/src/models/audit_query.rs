//! Filters for reading the audit log.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{AuditEvent, AuditEventKind};

pub const DEFAULT_QUERY_LIMIT: i64 = 100;
pub const MAX_QUERY_LIMIT: i64 = 1000;

/// Audit log filter. Results are always newest first.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditQuery {
    pub user_id: Option<String>,
    pub org_id: Option<String>,
    pub kind: Option<AuditEventKind>,
    /// Inclusive lower bound on `timestamp`.
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `timestamp`.
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

impl AuditQuery {
    pub fn for_org(org_id: impl Into<String>) -> Self {
        Self {
            org_id: Some(org_id.into()),
            ..Default::default()
        }
    }

    pub fn for_kind(kind: AuditEventKind) -> Self {
        Self {
            kind: Some(kind),
            ..Default::default()
        }
    }

    pub fn effective_limit(&self) -> i64 {
        self.limit
            .unwrap_or(DEFAULT_QUERY_LIMIT)
            .clamp(1, MAX_QUERY_LIMIT)
    }

    /// In-process evaluation of the filter, ignoring the limit.
    pub fn matches(&self, event: &AuditEvent) -> bool {
        if let Some(user_id) = &self.user_id {
            if event.user_id.as_ref() != Some(user_id) {
                return false;
            }
        }
        if let Some(org_id) = &self.org_id {
            if event.org_id.as_ref() != Some(org_id) {
                return false;
            }
        }
        if let Some(kind) = self.kind {
            if event.kind != kind {
                return false;
            }
        }
        if let Some(from) = self.from {
            if event.timestamp < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if event.timestamp >= to {
                return false;
            }
        }
        true
    }
}
