//! envhub controller: pod cache, `/pods` API and leader election.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, anyhow};
use clap::Parser;
use envhub_controller_lib::leader::{KubeLeaseLock, LeadershipHandler};
use envhub_controller_lib::{
    ControllerConfig, ControllerContext, KubePodClient, LeaderElector, LeaderGatedServer, PodCache,
    ServerHandle, TemplateStore, pods_router, probe_router, resolve_namespace,
};
use k8s_openapi::api::core::v1::Pod;
use kube::Api;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_log();
    let config = ControllerConfig::parse();
    config.validate().map_err(|e| anyhow!(e))?;

    let templates = TemplateStore::new(&config.template_dir, config.legacy_template_root.clone());
    let primary = templates
        .load(&config.primary_template)
        .with_context(|| format!("loading primary pod template '{}'", config.primary_template))?;
    let namespace = resolve_namespace(&primary, &config.namespace);
    info!("managing namespace {namespace}");

    let client = kube::Client::try_default()
        .await
        .context("building kubernetes client")?;
    let cancel = CancellationToken::new();

    let (cache, watch_task) = PodCache::start(
        Api::<Pod>::namespaced(client.clone(), &namespace),
        config.resync_interval,
        config.cache_sync_timeout,
        cancel.child_token(),
    )
    .await?;

    let ctx = Arc::new(ControllerContext {
        namespace: namespace.clone(),
        templates,
        cache,
        pods: Arc::new(KubePodClient::new(client.clone(), &namespace)),
    });

    let is_leader = Arc::new(AtomicBool::new(false));
    let probe = ServerHandle::start(
        "probe",
        SocketAddr::from(([0, 0, 0, 0], config.probe_port)),
        probe_router(is_leader.clone()),
    )
    .await
    .context("binding probe server")?;

    let crud = Arc::new(LeaderGatedServer::new(
        SocketAddr::from(([0, 0, 0, 0], config.server_port)),
        pods_router(ctx, config.request_timeout),
    ));

    let elector_task = if config.leader_elect {
        let lock = KubeLeaseLock::new(
            client,
            &namespace,
            config.lease_name.clone(),
            config.resolved_identity(),
            config.lease_duration,
        );
        let elector = LeaderElector::new(Arc::new(lock), config.election(), is_leader.clone());
        Some(tokio::spawn(elector.run(crud.clone(), cancel.child_token())))
    } else {
        info!("leader election disabled, serving immediately");
        crud.started_leading()
            .await
            .with_context(|| format!("binding crud server on port {}", config.server_port))?;
        is_leader.store(true, Ordering::SeqCst);
        None
    };

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutting down");
    cancel.cancel();

    match elector_task {
        Some(task) => {
            if let Err(err) = task.await {
                error!("leader elector task failed: {err}");
            }
        }
        None => {
            is_leader.store(false, Ordering::SeqCst);
            crud.stopped_leading().await;
        }
    }
    if let Err(err) = watch_task.await {
        error!("pod watch task failed: {err}");
    }
    probe.stop().await;
    Ok(())
}

fn setup_log() {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{EnvFilter, fmt};
    if tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init()
        .is_err()
    {}
}
