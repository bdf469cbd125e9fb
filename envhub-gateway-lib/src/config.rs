//! Gateway command line. Every flag can also come from the environment.

use std::time::Duration;

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "envhub-gateway", about = "Environment instance admission gateway")]
pub struct GatewayConfig {
    /// Instance backend address (controller or REST service).
    #[arg(long, env = "ENVHUB_SCHEDULE_ADDR", default_value = "http://localhost:8080")]
    pub schedule_addr: String,

    /// `k8s` for the controller adapter, `standard` for the REST adapter.
    #[arg(long, env = "ENVHUB_SCHEDULE_TYPE", default_value = "k8s")]
    pub schedule_type: String,

    /// Registry and identity service address.
    #[arg(long, env = "ENVHUB_BACKEND_ADDR", default_value = "http://localhost:8090")]
    pub backend_addr: String,

    /// Global create requests per second; 0 disables the limit.
    #[arg(long, env = "ENVHUB_QPS", default_value_t = 100)]
    pub qps: u32,

    #[arg(long, env = "ENVHUB_TOKEN_ENABLED", default_value_t = false, action = clap::ArgAction::Set)]
    pub token_enabled: bool,

    #[arg(long, env = "ENVHUB_TOKEN_CACHE_MAX_ENTRIES", default_value_t = 1000)]
    pub token_cache_max_entries: usize,

    #[arg(long, env = "ENVHUB_TOKEN_CACHE_TTL", default_value = "1m", value_parser = humantime::parse_duration)]
    pub token_cache_ttl: Duration,

    /// Tenant index store; the in-memory index is used when unset.
    #[arg(long, env = "ENVHUB_REDIS_ADDR")]
    pub redis_addr: Option<String>,

    #[arg(long, env = "ENVHUB_REDIS_PASSWORD")]
    pub redis_password: Option<String>,

    #[arg(long, env = "ENVHUB_CLEANUP_INTERVAL", default_value = "5m", value_parser = humantime::parse_duration)]
    pub cleanup_interval: Duration,

    /// Live instances allowed per tenant; 0 disables the check.
    #[arg(long, env = "ENVHUB_TENANT_INSTANCE_CAP", default_value_t = 0)]
    pub tenant_instance_cap: usize,

    #[arg(long, env = "ENVHUB_PORT", default_value_t = 8080)]
    pub port: u16,

    #[arg(long, env = "ENVHUB_REQUEST_TIMEOUT", default_value = "30s", value_parser = humantime::parse_duration)]
    pub request_timeout: Duration,

    /// TTL given to warmup instances whose definition has none.
    #[arg(long, env = "ENVHUB_WARMUP_TTL", default_value = "30m")]
    pub warmup_ttl: String,
}

impl GatewayConfig {
    /// `redis://[:password@]host[:port]`, accepting a bare `host:port`.
    pub fn redis_url(&self) -> Option<String> {
        let addr = self.redis_addr.as_deref().map(str::trim).filter(|a| !a.is_empty())?;
        if addr.starts_with("redis://") || addr.starts_with("rediss://") {
            return Some(addr.to_string());
        }
        Some(match self.redis_password.as_deref().filter(|p| !p.is_empty()) {
            Some(password) => format!("redis://:{password}@{addr}"),
            None => format!("redis://{addr}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = GatewayConfig::parse_from(["envhub-gateway"]);
        assert_eq!(cfg.qps, 100);
        assert_eq!(cfg.token_cache_max_entries, 1000);
        assert_eq!(cfg.token_cache_ttl, Duration::from_secs(60));
        assert_eq!(cfg.cleanup_interval, Duration::from_secs(300));
        assert_eq!(cfg.schedule_type, "k8s");
        assert!(cfg.redis_url().is_none());
    }

    #[test]
    fn redis_url_forms() {
        let cfg = GatewayConfig::parse_from([
            "envhub-gateway",
            "--redis-addr",
            "cache:6379",
            "--redis-password",
            "s3cret",
        ]);
        assert_eq!(cfg.redis_url().as_deref(), Some("redis://:s3cret@cache:6379"));

        let cfg = GatewayConfig::parse_from(["envhub-gateway", "--redis-addr", "redis://cache:6380/2"]);
        assert_eq!(cfg.redis_url().as_deref(), Some("redis://cache:6380/2"));
    }
}
