//! Reclamation loop for TTL-expired instances.
//!
//! - `reclaim_tick()`: one cleanup pass through the active backend
//! - `Reaper::spawn()`: runs a pass immediately, then once per interval,
//!   until the cancellation token fires
//!
//! Failures never end the loop; the next tick is the only retry.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::backend::InstanceBackend;
use crate::instance::CleanupReport;
use crate::metrics::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaperState {
    Idle,
    Running,
}

/// Run a single cleanup pass. Errors are logged, not returned.
pub async fn reclaim_tick(backend: &dyn InstanceBackend) -> Option<CleanupReport> {
    match backend.cleanup().await {
        Ok(report) => {
            metrics().record_reclaim(report.deleted, report.failed);
            Some(report)
        }
        Err(err) => {
            error!("reaper: cleanup via {} backend failed: {err}", backend.name());
            None
        }
    }
}

pub struct Reaper {
    cancel: CancellationToken,
    running: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl Reaper {
    /// Start the loop. Cancelling `cancel` (or calling `stop`) ends it.
    pub fn spawn(
        backend: Arc<dyn InstanceBackend>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(run_loop(
            backend,
            interval,
            cancel.clone(),
            running.clone(),
        ));
        info!("reaper: started with interval {interval:?}");
        Self {
            cancel,
            running,
            task,
        }
    }

    pub fn state(&self) -> ReaperState {
        if self.running.load(Ordering::Acquire) {
            ReaperState::Running
        } else {
            ReaperState::Idle
        }
    }

    /// Cancel and wait for the loop task to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(err) = self.task.await {
            error!("reaper: loop task ended abnormally: {err}");
        }
    }
}

async fn run_loop(
    backend: Arc<dyn InstanceBackend>,
    interval: Duration,
    cancel: CancellationToken,
    running: Arc<AtomicBool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // First tick completes immediately.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        running.store(true, Ordering::Release);
        let finished = tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = reclaim_tick(backend.as_ref()) => true,
        };
        running.store(false, Ordering::Release);

        if !finished {
            info!("reaper: in-flight pass abandoned on shutdown");
            break;
        }
    }

    info!("reaper: stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::EnvironmentDefinition;
    use crate::error::{InstanceError, Result};
    use crate::instance::{Instance, ListFilter};
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    /// Backend whose only meaningful operation is `cleanup`.
    struct ScriptedBackend {
        passes: mpsc::UnboundedSender<()>,
        hang: bool,
        fail: bool,
    }

    #[async_trait]
    impl InstanceBackend for ScriptedBackend {
        fn name(&self) -> &'static str {
            "scripted"
        }
        async fn create(&self, _: &EnvironmentDefinition) -> Result<Instance> {
            unimplemented!()
        }
        async fn get(&self, _: &str) -> Result<Instance> {
            unimplemented!()
        }
        async fn delete(&self, _: &str) -> Result<()> {
            unimplemented!()
        }
        async fn list(&self, _: &ListFilter) -> Result<Vec<Instance>> {
            unimplemented!()
        }
        async fn warmup(&self, _: &EnvironmentDefinition) -> Result<()> {
            unimplemented!()
        }
        async fn cleanup(&self) -> Result<CleanupReport> {
            let _ = self.passes.send(());
            if self.hang {
                std::future::pending::<()>().await;
            }
            if self.fail {
                return Err(InstanceError::Upstream("controller unreachable".into()));
            }
            Ok(CleanupReport {
                deleted: 1,
                ..Default::default()
            })
        }
    }

    fn scripted(hang: bool, fail: bool) -> (Arc<dyn InstanceBackend>, mpsc::UnboundedReceiver<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(ScriptedBackend {
                passes: tx,
                hang,
                fail,
            }),
            rx,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn runs_immediately_then_every_interval() {
        let (backend, mut passes) = scripted(false, false);
        let reaper = Reaper::spawn(backend, Duration::from_secs(300), CancellationToken::new());

        let start = tokio::time::Instant::now();
        passes.recv().await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));

        passes.recv().await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(300));

        reaper.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failing_pass_does_not_end_loop() {
        let (backend, mut passes) = scripted(false, true);
        let reaper = Reaper::spawn(backend, Duration::from_secs(10), CancellationToken::new());

        passes.recv().await.unwrap();
        passes.recv().await.unwrap();
        passes.recv().await.unwrap();

        reaper.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_abandons_hung_pass() {
        let (backend, mut passes) = scripted(true, false);
        let reaper = Reaper::spawn(backend, Duration::from_secs(10), CancellationToken::new());

        passes.recv().await.unwrap();
        assert_eq!(reaper.state(), ReaperState::Running);

        tokio::time::timeout(Duration::from_secs(1), reaper.stop())
            .await
            .expect("stop should not block on the hung pass");
    }

    #[tokio::test]
    async fn tick_swallows_errors() {
        let (backend, _passes) = scripted(false, true);
        assert!(reclaim_tick(backend.as_ref()).await.is_none());

        let (backend, _passes) = scripted(false, false);
        assert_eq!(reclaim_tick(backend.as_ref()).await.unwrap().deleted, 1);
    }
}
