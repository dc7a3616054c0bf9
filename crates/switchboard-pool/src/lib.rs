//! Account pools: credential selection with health tracking and fallback
//! chains, plus the background token-refresh coordinator.
//!
//! This crate performs no upstream HTTP itself; refresh calls and health
//! probes go through the [`TokenRefresher`] and [`HealthProber`] traits so
//! a higher layer owns the wire.

pub mod health;
pub mod manager;
pub mod refresh;

pub use health::{HealthProber, spawn_health_task};
pub use manager::{PoolError, PoolManager, PoolSettings, Selection};
pub use refresh::{RefreshCoordinator, RefreshError, TokenRefresher};
