//! Services layer for guard-service.
//!
//! Token lifecycle, audit recording and durable audit storage.

pub mod audit;
pub mod audit_store;
pub mod clock;
pub mod metrics;
mod sweeper;
mod token_store;

pub use audit::{AuditFailureHook, AuditOutcome, AuditRecorder};
pub use audit_store::{AuditStore, InMemoryAuditStore, MongoAuditStore};
pub use clock::{Clock, ManualClock, SystemClock};
pub use sweeper::TokenSweeper;
pub use token_store::{CsrfTokenStore, TOKEN_BYTES};
