//! Direct pod reads and writes against the cluster.
//!
//! `PodClient` is the seam between the HTTP handlers and the API server.
//! `KubePodClient` is the only production implementation; handler tests plug
//! in an in-memory one.

use std::time::Instant;

use async_trait::async_trait;
use envhub_runtime::InstanceError;
use k8s_openapi::api::core::v1::Pod;
use kube::Api;
use kube::api::{DeleteParams, PostParams};

use crate::metrics::controller_metrics;

/// A cluster API failure with the HTTP status the API server returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cluster error {code}: {message}")]
pub struct ClusterError {
    pub code: u16,
    pub message: String,
}

impl ClusterError {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.code == 404
    }
}

impl From<kube::Error> for ClusterError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) => ClusterError::new(resp.code, resp.message),
            other => ClusterError::new(500, other.to_string()),
        }
    }
}

/// 400/401/403/404/409 keep their meaning, everything else is a 500.
impl From<ClusterError> for InstanceError {
    fn from(err: ClusterError) -> Self {
        match err.code {
            400 | 401 | 403 | 404 | 409 => InstanceError::from_status(err.code, err.message),
            _ => InstanceError::Upstream(err.message),
        }
    }
}

#[async_trait]
pub trait PodClient: Send + Sync {
    async fn create(&self, pod: &Pod) -> Result<Pod, ClusterError>;
    async fn get(&self, name: &str) -> Result<Pod, ClusterError>;
    async fn delete(&self, name: &str) -> Result<(), ClusterError>;
}

pub struct KubePodClient {
    api: Api<Pod>,
}

impl KubePodClient {
    pub fn new(client: kube::Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
        }
    }
}

#[async_trait]
impl PodClient for KubePodClient {
    async fn create(&self, pod: &Pod) -> Result<Pod, ClusterError> {
        let started = Instant::now();
        let result = self.api.create(&PostParams::default(), pod).await;
        controller_metrics().observe_k8s("create", "pod", started);
        Ok(result?)
    }

    async fn get(&self, name: &str) -> Result<Pod, ClusterError> {
        let started = Instant::now();
        let result = self.api.get(name).await;
        controller_metrics().observe_k8s("get", "pod", started);
        Ok(result?)
    }

    async fn delete(&self, name: &str) -> Result<(), ClusterError> {
        let started = Instant::now();
        let result = self.api.delete(name, &DeleteParams::default()).await;
        controller_metrics().observe_k8s("delete", "pod", started);
        result?;
        Ok(())
    }
}
