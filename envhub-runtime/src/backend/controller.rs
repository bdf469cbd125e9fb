//! Adapter onto the envhub controller's `/pods` surface.
//!
//! Pure protocol translation: every call maps to one controller request and
//! the envelope is decoded back into runtime types.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use super::InstanceBackend;
use crate::definition::EnvironmentDefinition;
use crate::error::Result;
use crate::http::{build_url, decode_envelope, json_headers, send_json};
use crate::instance::{CleanupReport, Instance, InstanceStatus, ListFilter};
use crate::util::http_client;

pub struct ControllerBackend {
    base_url: String,
    client: Client,
    warmup_ttl: String,
}

impl ControllerBackend {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        warmup_ttl: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            base_url: base_url.into(),
            client: http_client(timeout)?,
            warmup_ttl: warmup_ttl.into(),
        })
    }

    async fn request<T: DeserializeOwned>(
        &self,
        op: &str,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&EnvironmentDefinition>,
    ) -> Result<T> {
        let mut url = build_url(&self.base_url, path)?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        let (status, text) = send_json(&self.client, method, url, body, json_headers()).await?;
        decode_envelope(op, status, &text)
    }
}

#[async_trait]
impl InstanceBackend for ControllerBackend {
    fn name(&self) -> &'static str {
        "controller"
    }

    async fn create(&self, definition: &EnvironmentDefinition) -> Result<Instance> {
        self.request(
            "create env instance",
            Method::POST,
            "pods",
            &[],
            Some(definition),
        )
        .await
    }

    async fn get(&self, id: &str) -> Result<Instance> {
        self.request(
            "get env instance",
            Method::GET,
            &format!("pods/{id}"),
            &[],
            None,
        )
        .await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        match self
            .request::<bool>(
                "delete env instance",
                Method::DELETE,
                &format!("pods/{id}"),
                &[],
                None,
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => {
                info!("instance {id} already absent, treating delete as done");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn list(&self, filter: &ListFilter) -> Result<Vec<Instance>> {
        let mut query = Vec::new();
        if filter.expired_only {
            query.push(("filter", "expired"));
        }
        if let Some(owner) = &filter.owner {
            query.push(("owner", owner.as_str()));
        }
        let instances: Vec<Instance> = self
            .request("list env instances", Method::GET, "pods", &query, None)
            .await?;
        Ok(instances.into_iter().filter(|i| filter.matches(i)).collect())
    }

    async fn warmup(&self, definition: &EnvironmentDefinition) -> Result<()> {
        let mut definition = definition.clone();
        if definition.deploy_config.ttl().is_none() {
            definition.deploy_config.ttl = Some(self.warmup_ttl.clone());
        }
        let instance = self.create(&definition).await?;
        info!(
            "warmed up {} as instance {}",
            definition.qualified_name(),
            instance.id
        );
        Ok(())
    }

    async fn cleanup(&self) -> Result<CleanupReport> {
        let expired = self.list(&ListFilter::expired()).await?;
        let mut report = CleanupReport::default();
        if expired.is_empty() {
            info!("cleanup: no expired instances");
            return Ok(report);
        }

        for instance in expired {
            if instance.status == InstanceStatus::Terminated {
                report.skipped += 1;
                continue;
            }
            match self.delete(&instance.id).await {
                Ok(()) => {
                    report.deleted += 1;
                    info!("cleanup: deleted expired instance {}", instance.id);
                }
                Err(err) => {
                    report.failed += 1;
                    warn!("cleanup: failed to delete instance {}: {err}", instance.id);
                }
            }
        }

        info!(
            "cleanup: deleted {} expired instances ({} failed, {} skipped)",
            report.deleted, report.failed, report.skipped
        );
        Ok(report)
    }
}
