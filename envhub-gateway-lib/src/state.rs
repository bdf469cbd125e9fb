use std::sync::Arc;

use envhub_runtime::backend::BackendKind;
use envhub_runtime::error::Result;
use envhub_runtime::{InstanceBackend, backend_from_kind};
use tracing::info;

use crate::auth::TokenCache;
use crate::config::GatewayConfig;
use crate::identity::BackendClient;
use crate::index::{MemoryTenantIndex, RedisTenantIndex, TenantIndex};
use crate::quota::TenantQuota;
use crate::rate_limit::GlobalRateLimiter;

const REDIS_KEY_PREFIX: &str = "envhub";

/// Shared by every gateway handler and middleware.
pub struct GatewayState {
    pub backend: Arc<dyn InstanceBackend>,
    pub identity: BackendClient,
    pub index: Arc<dyn TenantIndex>,
    pub tokens: TokenCache,
    pub limiter: GlobalRateLimiter,
    pub quota: TenantQuota,
    pub token_enabled: bool,
}

impl GatewayState {
    pub async fn from_config(config: &GatewayConfig) -> Result<Self> {
        let kind: BackendKind = config.schedule_type.parse()?;
        let backend = backend_from_kind(
            kind,
            &config.schedule_addr,
            config.request_timeout,
            &config.warmup_ttl,
        )?;
        let index: Arc<dyn TenantIndex> = match config.redis_url() {
            Some(url) => Arc::new(RedisTenantIndex::connect(&url, REDIS_KEY_PREFIX).await?),
            None => Arc::new(MemoryTenantIndex::new()),
        };
        info!(
            "gateway using {} backend at {} with {} tenant index",
            backend.name(),
            config.schedule_addr,
            index.name()
        );
        Ok(Self {
            backend,
            identity: BackendClient::new(&config.backend_addr, config.request_timeout)?,
            index,
            tokens: TokenCache::new(config.token_cache_max_entries, config.token_cache_ttl),
            limiter: GlobalRateLimiter::new(config.qps),
            quota: TenantQuota::new(config.tenant_instance_cap),
            token_enabled: config.token_enabled,
        })
    }
}
