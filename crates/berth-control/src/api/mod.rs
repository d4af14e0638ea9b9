//! HTTP API for the control plane.
//!
//! Provides endpoints for:
//! - Domain and site management (create, query, redeploy, stop, delete)
//! - Bulk migration
//! - Health and readiness checks
//! - Prometheus metrics

mod domains;
mod sites;

use std::fmt::Write as _;
use std::sync::Arc;

use axum::{
    Router,
    routing::{delete, get, post},
};

use crate::deployment::SiteManager;
use crate::store::SiteStore;
use crate::types::SiteStatus;

pub use domains::CreateDomainRequest;
pub use sites::{CreateSiteRequest, ListSitesQuery, SiteResponse};

/// Shared application state for the control service.
#[derive(Clone)]
pub struct AppState {
    /// Site manager orchestrating deployments.
    pub manager: Arc<SiteManager>,
    /// Site store for direct queries.
    pub store: Arc<dyn SiteStore>,
}

/// Creates the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        // Domain management
        .route("/domains", post(domains::create_domain))
        .route("/domains/{id}", delete(domains::remove_domain))
        // Site management
        .route("/sites", post(sites::create_site))
        .route("/sites", get(sites::list_sites))
        .route("/sites/{id}", get(sites::get_site))
        .route("/sites/{id}", delete(sites::delete_site))
        .route("/sites/{id}/redeploy", post(sites::redeploy_site))
        .route("/sites/{id}/stop", post(sites::stop_site))
        // Bulk migration
        .route("/migrate", post(sites::migrate_all))
        // Metrics
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> axum::Json<HealthResponse> {
    axum::Json(HealthResponse { status: "healthy" })
}

/// Readiness check endpoint.
async fn readiness_check(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> (axum::http::StatusCode, axum::Json<ReadyResponse>) {
    let filter = crate::store::SiteFilter::new().with_status(SiteStatus::Active);

    match state.store.list_sites(&filter).await {
        Ok(sites) => (
            axum::http::StatusCode::OK,
            axum::Json(ReadyResponse {
                ready: true,
                active_sites: sites.len(),
            }),
        ),
        Err(_) => (
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            axum::Json(ReadyResponse {
                ready: false,
                active_sites: 0,
            }),
        ),
    }
}

/// Metrics endpoint.
async fn metrics(axum::extract::State(state): axum::extract::State<AppState>) -> String {
    let mut output = String::new();

    let states = [
        ("pending", SiteStatus::Pending),
        ("deploying", SiteStatus::Deploying),
        ("active", SiteStatus::Active),
        ("failed", SiteStatus::Failed),
        ("stopped", SiteStatus::Stopped),
        ("deleted", SiteStatus::Deleted),
    ];

    output.push_str("# HELP berth_sites_total Number of sites by status\n");
    output.push_str("# TYPE berth_sites_total gauge\n");

    for (label, status) in states {
        let filter = crate::store::SiteFilter::new().with_status(status);
        let count = state
            .store
            .list_sites(&filter)
            .await
            .map(|s| s.len())
            .unwrap_or(0);
        let _ = writeln!(output, "berth_sites_total{{status=\"{label}\"}} {count}");
    }

    output
}

/// Health response.
#[derive(serde::Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Readiness response.
#[derive(serde::Serialize)]
struct ReadyResponse {
    ready: bool,
    active_sites: usize,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::DeployConfig;
    use crate::proxy::{MockProxy, ProxyActivator};
    use crate::runtime::{MockRuntime, RuntimeDriver};
    use crate::store::MemoryStore;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    pub(crate) fn make_app_state() -> (AppState, tempfile::TempDir) {
        let store: Arc<dyn SiteStore> = Arc::new(MemoryStore::new());
        let runtime: Arc<dyn RuntimeDriver> = Arc::new(MockRuntime::new());
        let proxy: Arc<dyn ProxyActivator> = Arc::new(MockProxy::new());
        let sites_dir = tempfile::TempDir::new().expect("tempdir");

        let config = DeployConfig {
            probe_interval_ms: 1,
            probe_timeout_ms: 1,
            probe_window_secs: 1,
            retry_backoff_ms: 1,
            ..DeployConfig::default()
        };

        let manager = Arc::new(SiteManager::new(
            Arc::clone(&store),
            runtime,
            proxy,
            sites_dir.path(),
            config,
        ));

        (AppState { manager, store }, sites_dir)
    }

    #[tokio::test]
    async fn health_endpoint() {
        let (state, _dir) = make_app_state();
        let app = router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn ready_endpoint() {
        let (state, _dir) = make_app_state();
        let app = router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/ready")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_endpoint() {
        let (state, _dir) = make_app_state();
        let app = router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }
}
