//! Generic REST adapter for third-party sandbox-instance services.
//!
//! Contract, relative to the configured base URL:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | create    | `POST   aenvironment/instance` |
//! | get       | `GET    aenvironment/instance/{id}` |
//! | delete    | `DELETE aenvironment/instance/{id}` |
//! | list      | `GET    aenvironment/instance?envName={name}` |
//! | warmup    | `PUT    aenvironment/instance/action/warmup` |
//! | cleanup   | `PUT    aenvironment/instance/action/cleanup` |
//!
//! Responses must use the standard envelope. The adapter owns its own client
//! timeout since nothing upstream bounds these calls.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info};

use super::InstanceBackend;
use crate::definition::EnvironmentDefinition;
use crate::error::{InstanceError, Result};
use crate::http::{build_url, decode_envelope, json_headers, send_json};
use crate::instance::{CleanupReport, Instance, ListFilter};
use crate::util::http_client;

const INSTANCE_PATH: &str = "aenvironment/instance";

pub struct RestBackend {
    base_url: String,
    client: Client,
}

impl RestBackend {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            base_url: base_url.into(),
            client: http_client(timeout)?,
        })
    }

    async fn call<T: DeserializeOwned>(
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
        debug!("{op}: {method} {url}");
        let (status, text) = send_json(&self.client, method, url, body, json_headers()).await?;
        decode_envelope(op, status, &text)
    }
}

#[async_trait]
impl InstanceBackend for RestBackend {
    fn name(&self) -> &'static str {
        "rest"
    }

    /// The generic contract has no notion of envhub tenants.
    fn reports_owner(&self) -> bool {
        false
    }

    async fn create(&self, definition: &EnvironmentDefinition) -> Result<Instance> {
        self.call(
            "create env instance",
            Method::POST,
            INSTANCE_PATH,
            &[],
            Some(definition),
        )
        .await
    }

    async fn get(&self, id: &str) -> Result<Instance> {
        self.call(
            "get env instance",
            Method::GET,
            &format!("{INSTANCE_PATH}/{id}"),
            &[],
            None,
        )
        .await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let result: Result<Value> = self
            .call(
                "delete env instance",
                Method::DELETE,
                &format!("{INSTANCE_PATH}/{id}"),
                &[],
                None,
            )
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => {
                info!("instance {id} already absent, treating delete as done");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn list(&self, filter: &ListFilter) -> Result<Vec<Instance>> {
        if filter.owner.is_some() {
            return Err(InstanceError::InvalidInput(
                "rest backend cannot list instances by owner".into(),
            ));
        }
        let env_name = filter.env_name.as_deref().unwrap_or_default();
        let instances: Option<Vec<Instance>> = self
            .call(
                "list env instances",
                Method::GET,
                INSTANCE_PATH,
                &[("envName", env_name)],
                None,
            )
            .await?;
        Ok(instances
            .unwrap_or_default()
            .into_iter()
            .filter(|i| filter.matches(i))
            .collect())
    }

    async fn warmup(&self, definition: &EnvironmentDefinition) -> Result<()> {
        let _: Value = self
            .call(
                "warmup env instance",
                Method::PUT,
                &format!("{INSTANCE_PATH}/action/warmup"),
                &[],
                Some(definition),
            )
            .await?;
        Ok(())
    }

    async fn cleanup(&self) -> Result<CleanupReport> {
        let data: Value = self
            .call(
                "cleanup env instances",
                Method::PUT,
                &format!("{INSTANCE_PATH}/action/cleanup"),
                &[],
                None,
            )
            .await?;
        // Services that report counts get them surfaced; others report nothing.
        Ok(serde_json::from_value(data).unwrap_or_default())
    }
}
