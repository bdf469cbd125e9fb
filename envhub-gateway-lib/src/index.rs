//! Per-tenant instance index.
//!
//! A fast lookup of "which instances does this tenant own", updated on create
//! and delete. It is best-effort: callers log failures and carry on, and the
//! backend stays the source of truth.

use async_trait::async_trait;
use dashmap::DashMap;
use envhub_runtime::error::{InstanceError, Result};
use envhub_runtime::InstanceSummary;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

#[async_trait]
pub trait TenantIndex: Send + Sync {
    fn name(&self) -> &'static str;
    async fn add(&self, tenant: &str, summary: &InstanceSummary) -> Result<()>;
    async fn remove(&self, tenant: &str, id: &str) -> Result<()>;
    async fn list(&self, tenant: &str) -> Result<Vec<InstanceSummary>>;

    async fn count(&self, tenant: &str) -> Result<usize> {
        Ok(self.list(tenant).await?.len())
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryTenantIndex {
    tenants: DashMap<String, DashMap<String, InstanceSummary>>,
}

impl MemoryTenantIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TenantIndex for MemoryTenantIndex {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn add(&self, tenant: &str, summary: &InstanceSummary) -> Result<()> {
        self.tenants
            .entry(tenant.to_string())
            .or_default()
            .insert(summary.id.clone(), summary.clone());
        Ok(())
    }

    async fn remove(&self, tenant: &str, id: &str) -> Result<()> {
        if let Some(instances) = self.tenants.get(tenant) {
            instances.remove(id);
        }
        self.tenants.remove_if(tenant, |_, instances| instances.is_empty());
        Ok(())
    }

    async fn list(&self, tenant: &str) -> Result<Vec<InstanceSummary>> {
        let mut summaries: Vec<InstanceSummary> = self
            .tenants
            .get(tenant)
            .map(|instances| instances.iter().map(|e| e.value().clone()).collect())
            .unwrap_or_default();
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(summaries)
    }

    async fn count(&self, tenant: &str) -> Result<usize> {
        Ok(self.tenants.get(tenant).map(|i| i.len()).unwrap_or(0))
    }
}

// ---------------------------------------------------------------------------
// Redis
// ---------------------------------------------------------------------------

/// One hash per tenant: field = instance id, value = JSON summary.
#[derive(Clone)]
pub struct RedisTenantIndex {
    manager: ConnectionManager,
    prefix: String,
}

impl RedisTenantIndex {
    pub async fn connect(url: &str, prefix: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|err| InstanceError::Storage(format!("redis client: {err}")))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|err| InstanceError::Storage(format!("redis connect: {err}")))?;
        Ok(Self {
            manager,
            prefix: prefix.into(),
        })
    }

    fn key(&self, tenant: &str) -> String {
        format!("{}:tenant:{tenant}", self.prefix)
    }
}

#[async_trait]
impl TenantIndex for RedisTenantIndex {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn add(&self, tenant: &str, summary: &InstanceSummary) -> Result<()> {
        let payload = serde_json::to_string(summary)
            .map_err(|err| InstanceError::Storage(format!("encode summary: {err}")))?;
        let mut conn = self.manager.clone();
        conn.hset::<_, _, _, ()>(self.key(tenant), &summary.id, payload)
            .await
            .map_err(|err| InstanceError::Storage(format!("redis hset: {err}")))
    }

    async fn remove(&self, tenant: &str, id: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.hdel::<_, _, ()>(self.key(tenant), id)
            .await
            .map_err(|err| InstanceError::Storage(format!("redis hdel: {err}")))
    }

    async fn list(&self, tenant: &str) -> Result<Vec<InstanceSummary>> {
        let mut conn = self.manager.clone();
        let values: Vec<String> = conn
            .hvals(self.key(tenant))
            .await
            .map_err(|err| InstanceError::Storage(format!("redis hvals: {err}")))?;
        let mut summaries = values
            .iter()
            .map(|raw| {
                serde_json::from_str::<InstanceSummary>(raw)
                    .map_err(|err| InstanceError::Storage(format!("decode summary: {err}")))
            })
            .collect::<Result<Vec<_>>>()?;
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(summaries)
    }

    async fn count(&self, tenant: &str) -> Result<usize> {
        let mut conn = self.manager.clone();
        conn.hlen(self.key(tenant))
            .await
            .map_err(|err| InstanceError::Storage(format!("redis hlen: {err}")))
    }
}
