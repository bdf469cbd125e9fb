//! Admission gateway in front of the instance backends.
//!
//! - `auth`: bearer tokens and the validation cache
//! - `rate_limit`: global create limit
//! - `quota`: per-tenant instance cap
//! - `index`: tenant to instances lookup (Redis or in-memory)
//! - `identity`: registry and token validation client
//! - `api`: the `/env-instance` router

pub mod api;
pub mod auth;
pub mod config;
pub mod identity;
pub mod index;
pub mod quota;
pub mod rate_limit;
pub mod state;

pub use api::{ApiError, gateway_router};
pub use auth::{Caller, TokenCache};
pub use config::GatewayConfig;
pub use identity::{BackendClient, Principal};
pub use index::{MemoryTenantIndex, RedisTenantIndex, TenantIndex};
pub use quota::TenantQuota;
pub use rate_limit::GlobalRateLimiter;
pub use state::GatewayState;
