pub mod audit;
pub mod health;
pub mod metrics;
pub mod session;

pub use audit::list_audit_events;
pub use health::health_check;
pub use session::{issue_token, logout};
