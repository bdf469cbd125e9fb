//! Kubernetes-facing instance controller.
//!
//! - `template`: pod blueprints by kind
//! - `merge`: definition + template into the pod to submit
//! - `cache`: watch-fed pod index and TTL expiry
//! - `cluster`: direct pod writes
//! - `handler`: `/pods` HTTP surface
//! - `leader`: lease election and the leader flag
//! - `server` / `probe`: listeners

pub mod cache;
pub mod cluster;
pub mod config;
pub mod handler;
pub mod leader;
pub mod merge;
pub mod metrics;
pub mod probe;
pub mod quantity;
pub mod server;
pub mod template;

use k8s_openapi::api::core::v1::Pod;

pub use cache::PodCache;
pub use cluster::{ClusterError, KubePodClient, PodClient};
pub use config::ControllerConfig;
pub use handler::{ControllerContext, pods_router};
pub use leader::{LeaderElector, LeaderState, LeaseLock};
pub use probe::probe_router;
pub use server::{LeaderGatedServer, ServerHandle};
pub use template::{TemplateError, TemplateStore};

/// Namespace the controller manages: the primary template's, else `fallback`.
pub fn resolve_namespace(primary: &Pod, fallback: &str) -> String {
    primary
        .metadata
        .namespace
        .clone()
        .filter(|ns| !ns.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}
