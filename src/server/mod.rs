//! Throttle server: consensus, leadership monitor and operator API

pub mod http;

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

use crate::common::{Config, MetricsRegistry, Result};
use crate::consensus::{setup_raft, ConsensusService};
use crate::throttle::Throttler;

pub use http::{create_router, ServerState};

pub struct ThrottleServer {
    config: Config,
}

impl ThrottleServer {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Serve until Ctrl-C
    pub async fn serve(self) -> Result<()> {
        self.serve_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await
    }

    /// Serve until `shutdown` completes, then stop every background task
    pub async fn serve_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let raft = &self.config.raft;
        tracing::info!("Starting quorate {}", crate::VERSION);
        tracing::info!("  Raft bind: {}", raft.bind);
        tracing::info!("  Raft peers: {:?}", raft.nodes);
        tracing::info!("  Data dir: {}", raft.data_dir.display());
        tracing::info!("  HTTP API: {}", self.config.http.listen);

        let metrics = Arc::new(MetricsRegistry::new());
        let throttler = Arc::new(Throttler::new());
        let store = setup_raft(raft, throttler, metrics.clone()).await?;
        let consensus: Arc<dyn ConsensusService> = store.clone();

        let listener = match tokio::net::TcpListener::bind(self.config.http.listen).await {
            Ok(listener) => listener,
            Err(e) => {
                tracing::error!("Cannot bind HTTP API on {}: {}", self.config.http.listen, e);
                store.shutdown().await;
                return Err(e.into());
            }
        };

        let (stop, stop_rx) = watch::channel(false);
        let monitor = {
            let consensus = consensus.clone();
            tokio::spawn(async move { consensus.monitor(stop_rx).await })
        };

        let router = create_router(ServerState {
            consensus,
            metrics,
            proposal_timeout: self.config.http.proposal_timeout(),
        });
        tracing::info!("Quorate ready");

        let served = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await;

        tracing::info!("Shutting down");
        let _ = stop.send(true);
        match monitor.await {
            Ok(Err(e)) => tracing::warn!("Leadership monitor failed: {}", e),
            Err(e) => tracing::warn!("Leadership monitor panicked: {}", e),
            Ok(Ok(())) => {}
        }
        store.shutdown().await;

        served?;
        Ok(())
    }
}
