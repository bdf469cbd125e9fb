//! Watch-fed pod index for the controller namespace.
//!
//! Reads never touch the API server. The watch is torn down and re-established
//! every resync interval, which triggers a full relist; pods missing from the
//! relist are dropped when it completes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use envhub_runtime::definition::EnvironmentDefinition;
use envhub_runtime::{ENV_NAME_LABEL, ENV_VERSION_LABEL, Instance, InstanceStatus, OWNER_LABEL, TTL_LABEL};
use futures_util::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::Api;
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics::controller_metrics;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("pod cache did not sync within {0:?}")]
    SyncTimeout(Duration),
    #[error("pod watch stopped before the initial sync")]
    WatchStopped,
}

#[derive(Default)]
pub struct PodCache {
    pods: DashMap<String, Arc<Pod>>,
    /// Pods seen so far in an in-progress relist.
    relist: Mutex<Option<HashMap<String, Arc<Pod>>>>,
}

impl PodCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn the watch and wait for the first full list.
    pub async fn start(
        api: Api<Pod>,
        resync: Duration,
        sync_timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<(Arc<Self>, JoinHandle<()>), CacheError> {
        let cache = Arc::new(Self::new());
        let (synced_tx, mut synced_rx) = watch::channel(false);
        let task = tokio::spawn(run_watch(cache.clone(), api, resync, cancel, synced_tx));

        match tokio::time::timeout(sync_timeout, synced_rx.wait_for(|synced| *synced)).await {
            Ok(Ok(_)) => {
                info!("pod cache synced with {} pods", cache.len());
                Ok((cache, task))
            }
            Ok(Err(_)) => {
                task.abort();
                Err(CacheError::WatchStopped)
            }
            Err(_) => {
                task.abort();
                Err(CacheError::SyncTimeout(sync_timeout))
            }
        }
    }

    /// Fold one watch event into the index. Returns true when a relist completed.
    pub fn apply_event(&self, event: Event<Pod>) -> bool {
        let synced = match event {
            Event::Init => {
                *self.relist.lock() = Some(HashMap::new());
                false
            }
            Event::InitApply(pod) => {
                if let Some(name) = pod.metadata.name.clone() {
                    let mut relist = self.relist.lock();
                    relist.get_or_insert_with(HashMap::new).insert(name, Arc::new(pod));
                }
                false
            }
            Event::InitDone => {
                let fresh = self.relist.lock().take().unwrap_or_default();
                self.pods.retain(|name, _| fresh.contains_key(name));
                for (name, pod) in fresh {
                    self.pods.insert(name, pod);
                }
                true
            }
            Event::Apply(pod) => {
                if let Some(name) = pod.metadata.name.clone() {
                    self.pods.insert(name, Arc::new(pod));
                }
                false
            }
            Event::Delete(pod) => {
                if let Some(name) = pod.metadata.name.as_deref() {
                    self.pods.remove(name);
                }
                false
            }
        };
        controller_metrics().cached_pods.set(self.pods.len() as i64);
        synced
    }

    pub fn get(&self, name: &str) -> Option<Arc<Pod>> {
        self.pods.get(name).map(|entry| entry.value().clone())
    }

    pub fn list(&self) -> Vec<Arc<Pod>> {
        self.pods.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn list_expired(&self, now: DateTime<Utc>) -> Vec<Arc<Pod>> {
        self.pods
            .iter()
            .filter(|entry| is_expired(entry.value(), now))
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.pods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pods.is_empty()
    }
}

async fn run_watch(
    cache: Arc<PodCache>,
    api: Api<Pod>,
    resync: Duration,
    cancel: CancellationToken,
    synced_tx: watch::Sender<bool>,
) {
    loop {
        let stream = pod_events(api.clone());
        let mut stream = std::pin::pin!(stream);
        let restart = tokio::time::sleep(resync);
        tokio::pin!(restart);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("pod watch stopped");
                    return;
                }
                _ = &mut restart => {
                    debug!("restarting pod watch for resync");
                    break;
                }
                event = stream.next() => match event {
                    Some(Ok(event)) => {
                        if cache.apply_event(event) {
                            synced_tx.send_replace(true);
                        }
                    }
                    Some(Err(err)) => warn!("pod watch error: {err}"),
                    None => {
                        warn!("pod watch stream ended, restarting");
                        break;
                    }
                },
            }
        }
    }
}

fn pod_events(
    api: Api<Pod>,
) -> impl futures_util::Stream<Item = Result<Event<Pod>, watcher::Error>> + Send {
    watcher::watcher(api, watcher::Config::default()).default_backoff()
}

/// Parsed TTL label. Unparsable values are logged and treated as absent.
pub fn pod_ttl(pod: &Pod) -> Option<Duration> {
    let raw = pod.metadata.labels.as_ref()?.get(TTL_LABEL)?;
    match humantime::parse_duration(raw.trim()) {
        Ok(ttl) => Some(ttl),
        Err(err) => {
            warn!(
                "pod {}: ignoring unparsable ttl '{raw}': {err}",
                pod.metadata.name.as_deref().unwrap_or_default()
            );
            None
        }
    }
}

/// Expired iff `now - created > ttl`. Pods without a usable TTL never expire.
pub fn is_expired(pod: &Pod, now: DateTime<Utc>) -> bool {
    let Some(created) = pod.metadata.creation_timestamp.as_ref() else {
        return false;
    };
    let Some(ttl) = pod_ttl(pod).and_then(|ttl| TimeDelta::from_std(ttl).ok()) else {
        return false;
    };
    now.signed_duration_since(created.0) > ttl
}

/// Project a pod onto the instance view served by the controller.
pub fn instance_from_pod(pod: &Pod) -> Instance {
    let meta = &pod.metadata;
    let label = |key: &str| meta.labels.as_ref().and_then(|l| l.get(key)).cloned();
    let status = pod.status.as_ref();

    let mut instance = Instance::new(
        meta.name.clone().unwrap_or_default(),
        InstanceStatus::from_phase(
            status.and_then(|s| s.phase.as_deref()),
            meta.deletion_timestamp.is_some(),
        ),
    );
    instance.ip = status.and_then(|s| s.pod_ip.clone()).unwrap_or_default();
    instance.ttl = label(TTL_LABEL).unwrap_or_default();
    instance.owner = label(OWNER_LABEL);
    instance.created_at = meta.creation_timestamp.as_ref().map(|t| t.0);
    instance.env = label(ENV_NAME_LABEL).map(|name| EnvironmentDefinition {
        name,
        version: label(ENV_VERSION_LABEL).unwrap_or_default(),
        ..Default::default()
    });
    instance
}

#[cfg(test)]
pub(crate) fn test_pod(name: &str, ttl: Option<&str>, created: DateTime<Utc>) -> Pod {
    let mut labels = serde_json::Map::new();
    if let Some(ttl) = ttl {
        labels.insert(TTL_LABEL.into(), ttl.into());
    }
    serde_json::from_value(serde_json::json!({
        "metadata": {
            "name": name,
            "labels": labels,
            "creationTimestamp": created.to_rfc3339(),
        },
        "status": {"phase": "Running", "podIP": "10.0.0.7"},
    }))
    .unwrap()
}
