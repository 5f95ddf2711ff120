pub mod csrf;
pub mod identity;

pub use csrf::{csrf_guard_middleware, requires_token, TOKEN_BOOTSTRAP_PATH};
pub use identity::{identity_middleware, Actor, AuthUser};
