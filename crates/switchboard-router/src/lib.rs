//! HTTP surface: the four client dialect routes, model lists, health, and
//! the provider-admin API.

pub mod admin;
pub mod proxy;

pub use admin::admin_router;
pub use proxy::{RouterState, proxy_router};
