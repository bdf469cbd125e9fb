//! Lease-based leader election.
//!
//! Leadership is a two-state machine driven by one pure `transition`
//! function. The elector polls its `LeaseLock` every retry period and fires
//! `LeadershipHandler` callbacks only when the state actually changes. The
//! shared leader flag is written exactly once per transition, and only set
//! after the handler reports it is serving. A handler that cannot start gives
//! the lease back and sits out one lease duration before contending again.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::Api;
use kube::api::PostParams;
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cluster::ClusterError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaderState {
    Standby,
    Leading,
}

/// Result of one acquire-or-renew attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    Held,
    /// Someone else holds a live lease.
    HeldElsewhere,
    /// The attempt failed; `since_renew` is the time since the last successful renew.
    Failed { since_renew: Duration },
}

/// Next state given the current state and what the last attempt observed.
/// A leader survives failed renewals until the renew deadline passes.
pub fn transition(state: LeaderState, observed: Observation, renew_deadline: Duration) -> LeaderState {
    match (state, observed) {
        (_, Observation::Held) => LeaderState::Leading,
        (_, Observation::HeldElsewhere) => LeaderState::Standby,
        (LeaderState::Leading, Observation::Failed { since_renew }) if since_renew <= renew_deadline => {
            LeaderState::Leading
        }
        (_, Observation::Failed { .. }) => LeaderState::Standby,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ElectionConfig {
    pub lease_duration: Duration,
    pub renew_deadline: Duration,
    pub retry_period: Duration,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            lease_duration: Duration::from_secs(65),
            renew_deadline: Duration::from_secs(60),
            retry_period: Duration::from_secs(2),
        }
    }
}

#[async_trait]
pub trait LeaseLock: Send + Sync {
    fn identity(&self) -> &str;
    /// Acquire a free or expired lease, or renew our own. `Ok(false)` means
    /// another holder has a live lease.
    async fn try_acquire_or_renew(&self) -> Result<bool, ClusterError>;
    async fn release(&self) -> Result<(), ClusterError>;
}

#[async_trait]
pub trait LeadershipHandler: Send + Sync {
    /// Begin serving as leader. An error refuses leadership.
    async fn started_leading(&self) -> std::io::Result<()>;
    async fn stopped_leading(&self);
}

// ---------------------------------------------------------------------------
// Elector
// ---------------------------------------------------------------------------

pub struct LeaderElector {
    lock: Arc<dyn LeaseLock>,
    config: ElectionConfig,
    is_leader: Arc<AtomicBool>,
}

impl LeaderElector {
    pub fn new(lock: Arc<dyn LeaseLock>, config: ElectionConfig, is_leader: Arc<AtomicBool>) -> Self {
        Self {
            lock,
            config,
            is_leader,
        }
    }

    /// Run until cancelled. Leadership held at cancellation is handed back
    /// through `stopped_leading` and the lease is released.
    pub async fn run(self, handler: Arc<dyn LeadershipHandler>, cancel: CancellationToken) {
        let identity = self.lock.identity().to_string();
        let mut state = LeaderState::Standby;
        let mut last_renew = Instant::now();
        info!("leader election started as {identity}");

        loop {
            let observed = match self.lock.try_acquire_or_renew().await {
                Ok(true) => {
                    last_renew = Instant::now();
                    Observation::Held
                }
                Ok(false) => Observation::HeldElsewhere,
                Err(err) => {
                    warn!("lease acquire/renew failed: {err}");
                    Observation::Failed {
                        since_renew: last_renew.elapsed(),
                    }
                }
            };

            let next = transition(state, observed, self.config.renew_deadline);
            let mut pause = self.config.retry_period;
            if next != state {
                match next {
                    LeaderState::Leading => match handler.started_leading().await {
                        Ok(()) => {
                            self.is_leader.store(true, Ordering::SeqCst);
                            info!("{identity} became leader");
                            state = next;
                        }
                        Err(err) => {
                            error!("{identity} cannot serve as leader, releasing the lease: {err}");
                            if let Err(err) = self.lock.release().await {
                                warn!("failed to release lease: {err}");
                            }
                            pause = self.config.lease_duration;
                        }
                    },
                    LeaderState::Standby => {
                        self.is_leader.store(false, Ordering::SeqCst);
                        warn!("{identity} lost leadership");
                        handler.stopped_leading().await;
                        state = next;
                    }
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        if state == LeaderState::Leading {
            self.is_leader.store(false, Ordering::SeqCst);
            handler.stopped_leading().await;
            match self.lock.release().await {
                Ok(()) => info!("{identity} released the lease"),
                Err(err) => warn!("failed to release lease: {err}"),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Kubernetes Lease lock
// ---------------------------------------------------------------------------

pub struct KubeLeaseLock {
    api: Api<Lease>,
    name: String,
    identity: String,
    lease_duration: Duration,
}

impl KubeLeaseLock {
    pub fn new(
        client: kube::Client,
        namespace: &str,
        name: impl Into<String>,
        identity: impl Into<String>,
        lease_duration: Duration,
    ) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            name: name.into(),
            identity: identity.into(),
            lease_duration,
        }
    }

    fn fresh_spec(&self, transitions: i32) -> LeaseSpec {
        let now = MicroTime(Utc::now());
        LeaseSpec {
            holder_identity: Some(self.identity.clone()),
            lease_duration_seconds: Some(self.lease_duration.as_secs() as i32),
            acquire_time: Some(now.clone()),
            renew_time: Some(now),
            lease_transitions: Some(transitions),
            ..Default::default()
        }
    }

    async fn replace(&self, lease: &Lease) -> Result<bool, ClusterError> {
        match self.api.replace(&self.name, &PostParams::default(), lease).await {
            Ok(_) => Ok(true),
            Err(err) => {
                let err = ClusterError::from(err);
                if err.code == 409 {
                    debug!("lease {} changed underneath us", self.name);
                    Ok(false)
                } else {
                    Err(err)
                }
            }
        }
    }
}

#[async_trait]
impl LeaseLock for KubeLeaseLock {
    fn identity(&self) -> &str {
        &self.identity
    }

    async fn try_acquire_or_renew(&self) -> Result<bool, ClusterError> {
        let Some(mut lease) = self.api.get_opt(&self.name).await? else {
            let lease = Lease {
                metadata: ObjectMeta {
                    name: Some(self.name.clone()),
                    ..Default::default()
                },
                spec: Some(self.fresh_spec(0)),
            };
            return match self.api.create(&PostParams::default(), &lease).await {
                Ok(_) => Ok(true),
                Err(err) => {
                    let err = ClusterError::from(err);
                    if err.code == 409 { Ok(false) } else { Err(err) }
                }
            };
        };

        let spec = lease.spec.clone().unwrap_or_default();
        let holder = spec.holder_identity.as_deref().unwrap_or_default();
        if holder == self.identity {
            let mut renewed = spec;
            renewed.renew_time = Some(MicroTime(Utc::now()));
            lease.spec = Some(renewed);
            return self.replace(&lease).await;
        }

        let duration = spec
            .lease_duration_seconds
            .map(|s| chrono::TimeDelta::seconds(i64::from(s)))
            .unwrap_or_else(|| chrono::TimeDelta::seconds(self.lease_duration.as_secs() as i64));
        let expired = match spec.renew_time.as_ref() {
            Some(renewed) => Utc::now() - renewed.0 > duration,
            None => true,
        };
        if !holder.is_empty() && !expired {
            return Ok(false);
        }

        info!("taking over lease {} from '{holder}'", self.name);
        lease.spec = Some(self.fresh_spec(spec.lease_transitions.unwrap_or(0) + 1));
        self.replace(&lease).await
    }

    async fn release(&self) -> Result<(), ClusterError> {
        let Some(mut lease) = self.api.get_opt(&self.name).await? else {
            return Ok(());
        };
        let Some(spec) = lease.spec.as_mut() else {
            return Ok(());
        };
        if spec.holder_identity.as_deref() != Some(self.identity.as_str()) {
            return Ok(());
        }
        spec.holder_identity = None;
        spec.renew_time = None;
        spec.acquire_time = None;
        self.replace(&lease).await.map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// In-process lock
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MemoryLease {
    holder: Option<String>,
    renewed: Option<Instant>,
}

/// Lease shared between locks in one process. Used when running a single
/// replica without cluster access, and in tests.
#[derive(Clone)]
pub struct MemoryLeaseLock {
    lease: Arc<Mutex<MemoryLease>>,
    identity: String,
    lease_duration: Duration,
}

impl MemoryLeaseLock {
    pub fn new(identity: impl Into<String>, lease_duration: Duration) -> Self {
        Self {
            lease: Arc::default(),
            identity: identity.into(),
            lease_duration,
        }
    }

    /// Another contender for the same lease.
    pub fn contender(&self, identity: impl Into<String>) -> Self {
        Self {
            lease: self.lease.clone(),
            identity: identity.into(),
            lease_duration: self.lease_duration,
        }
    }

    pub fn holder(&self) -> Option<String> {
        self.lease.lock().holder.clone()
    }
}

#[async_trait]
impl LeaseLock for MemoryLeaseLock {
    fn identity(&self) -> &str {
        &self.identity
    }

    async fn try_acquire_or_renew(&self) -> Result<bool, ClusterError> {
        let mut lease = self.lease.lock();
        let live = lease
            .renewed
            .is_some_and(|renewed| renewed.elapsed() <= self.lease_duration);
        match lease.holder.as_deref() {
            Some(holder) if holder != self.identity && live => Ok(false),
            _ => {
                lease.holder = Some(self.identity.clone());
                lease.renewed = Some(Instant::now());
                Ok(true)
            }
        }
    }

    async fn release(&self) -> Result<(), ClusterError> {
        let mut lease = self.lease.lock();
        if lease.holder.as_deref() == Some(self.identity.as_str()) {
            lease.holder = None;
            lease.renewed = None;
        }
        Ok(())
    }
}
