//! Domain models for the guard service.

pub mod audit_event;
pub mod audit_query;

pub use audit_event::{ActorContext, AuditEvent, AuditEventKind, AuditEventResponse, Severity};
pub use audit_query::{AuditQuery, DEFAULT_QUERY_LIMIT, MAX_QUERY_LIMIT};
