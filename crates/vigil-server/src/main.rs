//! `vigil` binary entrypoint.
//!
//! Loads configuration from environment variables and starts the controller
//! and its HTTP server.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

use std::sync::Arc;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;

use vigil_core::observability::{LogFormat, init_logging};
use vigil_core::storage::{KvBackend, MemoryBackend};
use vigil_core::{AlertStore, ObjectAlertStore};
use vigil_server::config::VigilConfig;
use vigil_server::controller::MultitenantController;
use vigil_server::replication::{ClientPool, HttpClientPool};
use vigil_server::router;

#[tokio::main]
async fn main() -> Result<()> {
    let config = VigilConfig::from_env()?;

    let debug = std::env::var("VIGIL_DEBUG").is_ok_and(|v| v == "true" || v == "1");
    init_logging(if debug {
        LogFormat::Pretty
    } else {
        LogFormat::Json
    });

    PrometheusBuilder::new()
        .install()
        .context("failed to install the Prometheus recorder")?;

    // The KV backend holds tenant configs and the ring descriptor. The
    // in-memory backend is only suitable for single-node experiments; a real
    // deployment plugs an object-store or consensus-KV backend in here.
    tracing::warn!("using the in-memory KV backend; state is not shared across processes");
    let kv: Arc<dyn KvBackend> = Arc::new(MemoryBackend::new());
    let store: Arc<dyn AlertStore> = Arc::new(ObjectAlertStore::new(Arc::clone(&kv)));
    let pool: Arc<dyn ClientPool> = Arc::new(HttpClientPool::new());

    let ring_kv = config.sharding_enabled.then(|| Arc::clone(&kv));
    let controller = MultitenantController::new(config.clone(), store, ring_kv, pool)?;
    controller.start().await?;

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "serving");

    let shutdown_controller = Arc::clone(&controller);
    router::serve(listener, controller, async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutting down");
        shutdown_controller.stop().await;
    })
    .await?;

    Ok(())
}
