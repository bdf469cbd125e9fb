//! Start/stop wrapper around `axum::serve` with graceful shutdown.

use std::net::SocketAddr;

use async_trait::async_trait;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::leader::LeadershipHandler;

pub struct ServerHandle {
    name: &'static str,
    addr: SocketAddr,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Bind `addr` and serve `router` in the background.
    pub async fn start(name: &'static str, addr: SocketAddr, router: Router) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();
        info!("{name} server listening on {addr}");
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown.cancelled().await });
            if let Err(err) = serve.await {
                error!("{name} server error: {err}");
            }
        });
        Ok(Self {
            name,
            addr,
            cancel,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting, drain in-flight requests, and wait for the task.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(err) = self.task.await {
            error!("{} server task failed: {err}", self.name);
        }
        info!("{} server on {} stopped", self.name, self.addr);
    }
}

/// Serves the CRUD router only while this replica leads.
pub struct LeaderGatedServer {
    addr: SocketAddr,
    router: Router,
    running: Mutex<Option<ServerHandle>>,
}

impl LeaderGatedServer {
    pub fn new(addr: SocketAddr, router: Router) -> Self {
        Self {
            addr,
            router,
            running: Mutex::new(None),
        }
    }

    pub async fn is_serving(&self) -> bool {
        self.running.lock().await.is_some()
    }
}

#[async_trait]
impl LeadershipHandler for LeaderGatedServer {
    async fn started_leading(&self) -> std::io::Result<()> {
        let mut running = self.running.lock().await;
        if running.is_none() {
            *running = Some(ServerHandle::start("crud", self.addr, self.router.clone()).await?);
        }
        Ok(())
    }

    async fn stopped_leading(&self) {
        let handle = self.running.lock().await.take();
        if let Some(handle) = handle {
            handle.stop().await;
        }
    }
}
