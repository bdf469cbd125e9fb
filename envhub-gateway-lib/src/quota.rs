//! Per-tenant live instance cap.
//!
//! The index is consulted first. When it says the tenant is at the cap, the
//! backend's owner-filtered list is asked before rejecting, and index entries
//! for instances the backend no longer knows are pruned. If the index fails,
//! the backend count is used directly.
//!
//! Backends that do not report ownership cannot confirm or replace the index,
//! so their index count stands as is. With neither source available the
//! request is admitted and the miss logged.

use envhub_runtime::error::{InstanceError, Result};
use envhub_runtime::{InstanceBackend, InstanceStatus, ListFilter};
use tracing::{debug, warn};

use crate::index::TenantIndex;

#[derive(Debug, Clone, Copy)]
pub struct TenantQuota {
    cap: usize,
}

impl TenantQuota {
    /// `cap == 0` disables the check.
    pub fn new(cap: usize) -> Self {
        Self { cap }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub async fn admit(
        &self,
        tenant: &str,
        index: &dyn TenantIndex,
        backend: &dyn InstanceBackend,
    ) -> Result<()> {
        if self.cap == 0 {
            return Ok(());
        }

        let indexed = match index.count(tenant).await {
            Ok(count) if count < self.cap => return Ok(()),
            Ok(count) => Some(count),
            Err(err) => {
                warn!("tenant index unavailable for quota check: {err}");
                None
            }
        };

        if !backend.reports_owner() {
            let Some(count) = indexed else {
                warn!(
                    "{} backend cannot count tenant instances and the index is down; admitting {tenant}",
                    backend.name()
                );
                return Ok(());
            };
            return self.check(tenant, count);
        }

        let live = match live_instances(tenant, backend).await {
            Ok(live) => {
                if indexed.is_some() {
                    prune_stale(tenant, index, &live).await;
                }
                live.len()
            }
            Err(err) => match indexed {
                Some(count) => {
                    warn!("backend list failed during quota check, using index count: {err}");
                    count
                }
                None => return Err(err),
            },
        };

        self.check(tenant, live)
    }

    fn check(&self, tenant: &str, live: usize) -> Result<()> {
        debug!("tenant {tenant} has {live} live instances (cap {})", self.cap);
        if live >= self.cap {
            return Err(InstanceError::QuotaExceeded(format!(
                "tenant instance limit reached ({live}/{})",
                self.cap
            )));
        }
        Ok(())
    }
}

async fn live_instances(tenant: &str, backend: &dyn InstanceBackend) -> Result<Vec<String>> {
    let instances = backend.list(&ListFilter::for_owner(tenant)).await?;
    Ok(instances
        .into_iter()
        .filter(|i| i.status != InstanceStatus::Terminated)
        .map(|i| i.id)
        .collect())
}

async fn prune_stale(tenant: &str, index: &dyn TenantIndex, live: &[String]) {
    let Ok(indexed) = index.list(tenant).await else {
        return;
    };
    for summary in indexed {
        if !live.contains(&summary.id) {
            debug!("pruning stale index entry {} for tenant {tenant}", summary.id);
            if let Err(err) = index.remove(tenant, &summary.id).await {
                warn!("failed to prune index entry {}: {err}", summary.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::MemoryTenantIndex;
    use async_trait::async_trait;
    use envhub_runtime::{CleanupReport, EnvironmentDefinition, Instance, InstanceSummary};

    /// Backend that only answers `list` with a fixed set of instances.
    struct Listing {
        instances: Vec<Instance>,
        reports_owner: bool,
    }

    impl Listing {
        fn owned(instances: Vec<Instance>) -> Self {
            Self {
                instances,
                reports_owner: true,
            }
        }

        fn anonymous(instances: Vec<Instance>) -> Self {
            Self {
                instances,
                reports_owner: false,
            }
        }
    }

    #[async_trait]
    impl InstanceBackend for Listing {
        fn name(&self) -> &'static str {
            "listing"
        }
        fn reports_owner(&self) -> bool {
            self.reports_owner
        }
        async fn create(&self, _: &EnvironmentDefinition) -> Result<Instance> {
            unreachable!()
        }
        async fn get(&self, _: &str) -> Result<Instance> {
            unreachable!()
        }
        async fn delete(&self, _: &str) -> Result<()> {
            unreachable!()
        }
        async fn list(&self, filter: &ListFilter) -> Result<Vec<Instance>> {
            assert!(self.reports_owner || filter.owner.is_none());
            Ok(self
                .instances
                .iter()
                .filter(|i| filter.matches(i))
                .cloned()
                .collect())
        }
        async fn warmup(&self, _: &EnvironmentDefinition) -> Result<()> {
            unreachable!()
        }
        async fn cleanup(&self) -> Result<CleanupReport> {
            unreachable!()
        }
    }

    /// Index whose store is unreachable.
    struct DownIndex;

    #[async_trait]
    impl TenantIndex for DownIndex {
        fn name(&self) -> &'static str {
            "down"
        }
        async fn add(&self, _: &str, _: &InstanceSummary) -> Result<()> {
            Err(InstanceError::Storage("connection refused".into()))
        }
        async fn remove(&self, _: &str, _: &str) -> Result<()> {
            Err(InstanceError::Storage("connection refused".into()))
        }
        async fn list(&self, _: &str) -> Result<Vec<InstanceSummary>> {
            Err(InstanceError::Storage("connection refused".into()))
        }
    }

    fn owned(id: &str, tenant: &str) -> Instance {
        let mut instance = Instance::new(id, InstanceStatus::Running);
        instance.owner = Some(tenant.into());
        instance
    }

    fn summary(id: &str) -> InstanceSummary {
        InstanceSummary::from(&Instance::new(id, InstanceStatus::Running))
    }

    #[tokio::test]
    async fn disabled_and_under_cap_admit() {
        let index = MemoryTenantIndex::new();
        let backend = Listing::owned(vec![]);
        assert!(TenantQuota::new(0).admit("t", &index, &backend).await.is_ok());
        index.add("t", &summary("a")).await.unwrap();
        assert!(TenantQuota::new(2).admit("t", &index, &backend).await.is_ok());
    }

    #[tokio::test]
    async fn at_cap_rejects_when_backend_agrees() {
        let index = MemoryTenantIndex::new();
        index.add("t", &summary("a")).await.unwrap();
        index.add("t", &summary("b")).await.unwrap();
        let backend = Listing::owned(vec![owned("a", "t"), owned("b", "t"), owned("c", "other")]);
        let err = TenantQuota::new(2).admit("t", &index, &backend).await.unwrap_err();
        assert!(matches!(err, InstanceError::QuotaExceeded(_)));
        assert_eq!(err.status_code(), 429);
    }

    #[tokio::test]
    async fn stale_index_entries_are_pruned() {
        let index = MemoryTenantIndex::new();
        index.add("t", &summary("a")).await.unwrap();
        index.add("t", &summary("reclaimed")).await.unwrap();
        let backend = Listing::owned(vec![owned("a", "t")]);
        assert!(TenantQuota::new(2).admit("t", &index, &backend).await.is_ok());
        assert_eq!(index.count("t").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn ownerless_backend_trusts_the_index() {
        let index = MemoryTenantIndex::new();
        index.add("t", &summary("a")).await.unwrap();
        index.add("t", &summary("b")).await.unwrap();
        let backend = Listing::anonymous(vec![
            Instance::new("a", InstanceStatus::Running),
            Instance::new("b", InstanceStatus::Running),
        ]);
        let err = TenantQuota::new(2).admit("t", &index, &backend).await.unwrap_err();
        assert!(matches!(err, InstanceError::QuotaExceeded(_)));
        assert_eq!(index.count("t").await.unwrap(), 2);

        assert!(TenantQuota::new(3).admit("t", &index, &backend).await.is_ok());
    }

    #[tokio::test]
    async fn index_outage_falls_back_to_backend_count() {
        let backend = Listing::owned(vec![owned("a", "t"), owned("b", "t"), owned("c", "other")]);
        let err = TenantQuota::new(2).admit("t", &DownIndex, &backend).await.unwrap_err();
        assert!(matches!(err, InstanceError::QuotaExceeded(_)));
        assert!(TenantQuota::new(3).admit("t", &DownIndex, &backend).await.is_ok());

        let empty = Listing::owned(vec![owned("c", "other")]);
        assert!(TenantQuota::new(1).admit("t", &DownIndex, &empty).await.is_ok());
    }

    #[tokio::test]
    async fn index_outage_with_ownerless_backend_admits() {
        let backend = Listing::anonymous(vec![Instance::new("a", InstanceStatus::Running)]);
        assert!(TenantQuota::new(1).admit("t", &DownIndex, &backend).await.is_ok());
    }
}
