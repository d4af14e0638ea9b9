//! Berth control service binary.
//!
//! Runs the control plane that orchestrates per-site container deployments
//! behind an nginx reverse proxy.

use std::sync::Arc;

use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use berth_control::api::{self, AppState};
use berth_control::proxy::{NginxProxy, ProxyActivator};
use berth_control::runtime::{DockerDriver, RuntimeDriver};
use berth_control::store::{PostgresStore, SiteStore};
use berth_control::{BerthConfig, SiteManager};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("berth_control=info".parse()?),
        )
        .init();

    info!("berth control service starting");

    let config = BerthConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        BerthConfig::default()
    });

    info!(
        listen_addr = %config.server.listen_addr,
        database = %config.database.url,
        sites_dir = %config.runtime.sites_dir.display(),
        "configuration loaded"
    );

    let store: Arc<dyn SiteStore> = Arc::new(
        PostgresStore::new(&config.database.url, config.database.max_connections).await?,
    );
    let runtime: Arc<dyn RuntimeDriver> = Arc::new(DockerDriver::new(&config.runtime)?);
    let proxy: Arc<dyn ProxyActivator> = Arc::new(NginxProxy::new(&config.proxy)?);

    let manager = Arc::new(SiteManager::new(
        Arc::clone(&store),
        runtime,
        proxy,
        config.runtime.sites_dir.clone(),
        config.deploy.clone(),
    ));

    // Sites stuck mid-deployment from a previous run are failed and made
    // eligible for redeploy before we accept new work.
    let reconciled = manager.reconcile().await?;
    if reconciled > 0 {
        warn!(count = reconciled, "reconciled interrupted deployments");
    }

    let state = AppState {
        manager,
        store,
    };
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(config.server.listen_addr).await?;
    info!(addr = %config.server.listen_addr, "API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("berth control service shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    info!("shutdown signal received");
}
