//! Site management endpoints.

use std::collections::BTreeMap;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::error::ControlError;
use crate::store::SiteFilter;
use crate::types::{DomainId, MigrationReport, RuntimeKind, SiteId, SiteRecord, SiteStatus};

use super::AppState;

/// Request to create a site.
#[derive(Debug, Deserialize)]
pub struct CreateSiteRequest {
    /// Owning domain.
    pub domain_id: i64,
    /// Runtime to deploy with.
    pub runtime: RuntimeKind,
    /// Boilerplate selector. Defaults to `"blank"`.
    #[serde(default = "default_boilerplate")]
    pub boilerplate: String,
    /// Runtime-specific extras (e.g. CMS database credentials).
    #[serde(default)]
    pub extras: BTreeMap<String, String>,
}

fn default_boilerplate() -> String {
    "blank".to_owned()
}

/// Query parameters for listing sites.
#[derive(Debug, Default, Deserialize)]
pub struct ListSitesQuery {
    /// Filter by owning domain.
    pub domain_id: Option<i64>,
    /// Filter by status.
    pub status: Option<String>,
    /// Maximum number of results.
    pub limit: Option<u32>,
    /// Offset for pagination.
    pub offset: Option<u32>,
}

/// Query parameters for bulk migration.
#[derive(Debug, Default, Deserialize)]
pub struct MigrateQuery {
    /// Only migrate sites deployed before this instant (RFC 3339).
    pub deployed_before: Option<chrono::DateTime<chrono::Utc>>,
}

/// Response for a site.
#[derive(Debug, Serialize)]
pub struct SiteResponse {
    /// Site id.
    pub id: i64,
    /// Owning domain id.
    pub domain_id: i64,
    /// Runtime kind.
    pub runtime: String,
    /// Boilerplate selector.
    pub boilerplate: String,
    /// Current status.
    pub status: String,
    /// Assigned upstream port.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Last deployment error (if any).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Creation timestamp.
    pub created_at: String,
    /// Last update timestamp.
    pub updated_at: String,
    /// Last successful deployment timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployed_at: Option<String>,
}

/// Response for creating a site.
#[derive(Debug, Serialize)]
pub struct CreateSiteResponse {
    /// The assigned site id.
    pub id: i64,
    /// Initial status.
    pub status: String,
}

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error message.
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(e: &ControlError) -> ApiError {
    (
        error_to_status(e),
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
}

/// Create a site and enqueue its first deployment.
pub async fn create_site(
    State(state): State<AppState>,
    Json(request): Json<CreateSiteRequest>,
) -> Result<(StatusCode, Json<CreateSiteResponse>), ApiError> {
    info!(domain = request.domain_id, "creating site via API");

    let record = state
        .manager
        .create_site(
            DomainId::new(request.domain_id),
            request.runtime,
            &request.boilerplate,
            &request.extras,
        )
        .await
        .map_err(|e| api_error(&e))?;

    let site_id = record.id;
    let manager = state.manager.clone();
    tokio::spawn(async move {
        if let Err(e) = manager.deploy_site(site_id).await {
            // Already persisted on the site; log for the operator.
            error!(site = %site_id, error = %e, "background deployment failed");
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(CreateSiteResponse {
            id: record.id.get(),
            status: record.status.as_str().to_owned(),
        }),
    ))
}

/// Get a site by id.
pub async fn get_site(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<SiteResponse>, ApiError> {
    match state.manager.get_site(SiteId::new(id)).await {
        Ok(record) => Ok(Json(record_to_response(record))),
        Err(e) => Err(api_error(&e)),
    }
}

/// List sites with optional filters.
pub async fn list_sites(
    State(state): State<AppState>,
    Query(query): Query<ListSitesQuery>,
) -> Result<Json<Vec<SiteResponse>>, ApiError> {
    let mut filter = SiteFilter::new();

    if let Some(domain_id) = query.domain_id {
        filter = filter.with_domain(DomainId::new(domain_id));
    }
    if let Some(ref status) = query.status {
        if let Ok(parsed) = status.parse::<SiteStatus>() {
            filter = filter.with_status(parsed);
        }
    }
    if let Some(limit) = query.limit {
        filter = filter.with_limit(limit);
    }
    if let Some(offset) = query.offset {
        filter = filter.with_offset(offset);
    }

    match state.store.list_sites(&filter).await {
        Ok(records) => Ok(Json(records.into_iter().map(record_to_response).collect())),
        Err(e) => Err(api_error(&e)),
    }
}

/// Redeploy a site in the background.
pub async fn redeploy_site(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let site_id = SiteId::new(id);

    // Surface not-found synchronously; the deployment itself is queued.
    state
        .manager
        .get_site(site_id)
        .await
        .map_err(|e| api_error(&e))?;

    info!(site = id, "redeploy requested via API");

    let manager = state.manager.clone();
    tokio::spawn(async move {
        if let Err(e) = manager.redeploy_site(site_id).await {
            error!(site = %site_id, error = %e, "background redeploy failed");
        }
    });

    Ok(StatusCode::ACCEPTED)
}

/// Stop a site.
pub async fn stop_site(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    info!(site = id, "stopping site via API");

    match state.manager.stop_site(SiteId::new(id)).await {
        Ok(()) => Ok(StatusCode::NO_CONTENT),
        Err(e) => Err(api_error(&e)),
    }
}

/// Delete a site.
pub async fn delete_site(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    info!(site = id, "deleting site via API");

    match state.manager.delete_site(SiteId::new(id)).await {
        Ok(()) => Ok(StatusCode::NO_CONTENT),
        Err(e) => Err(api_error(&e)),
    }
}

/// Bulk-migrate active sites.
pub async fn migrate_all(
    State(state): State<AppState>,
    Query(query): Query<MigrateQuery>,
) -> Result<Json<MigrationReport>, ApiError> {
    info!(cutoff = ?query.deployed_before, "bulk migration requested via API");

    match state.manager.migrate_all_sites(query.deployed_before).await {
        Ok(report) => Ok(Json(report)),
        Err(e) => Err(api_error(&e)),
    }
}

fn record_to_response(record: SiteRecord) -> SiteResponse {
    SiteResponse {
        id: record.id.get(),
        domain_id: record.domain_id.get(),
        runtime: record.runtime.as_str().to_owned(),
        boilerplate: record.boilerplate,
        status: record.status.as_str().to_owned(),
        port: record.port,
        error: record.error,
        created_at: record.created_at.to_rfc3339(),
        updated_at: record.updated_at.to_rfc3339(),
        deployed_at: record.deployed_at.map(|t| t.to_rfc3339()),
    }
}

pub(super) const fn error_to_status(error: &ControlError) -> StatusCode {
    match error {
        ControlError::NotFound(_) => StatusCode::NOT_FOUND,
        ControlError::InvalidStateTransition { .. }
        | ControlError::SiteExists { .. }
        | ControlError::DomainNotDeployable { .. } => StatusCode::CONFLICT,
        ControlError::Config(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::make_app_state;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn list_sites_empty() {
        let (state, _dir) = make_app_state();
        let app = super::super::router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/sites")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn get_site_not_found() {
        let (state, _dir) = make_app_state();
        let app = super::super::router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/sites/404")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn create_site_is_accepted() {
        let (state, _dir) = make_app_state();
        let app = super::super::router(state.clone());

        let created = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/domains")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"hostname": "example.com", "runtime": "node"}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(created.status(), StatusCode::CREATED);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/sites")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"domain_id": 1, "runtime": "node"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn create_site_for_unknown_domain_not_found() {
        let (state, _dir) = make_app_state();
        let app = super::super::router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/sites")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"domain_id": 404, "runtime": "node"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn stop_of_pending_site_conflicts() {
        let (state, _dir) = make_app_state();
        let app = super::super::router(state.clone());

        // Create the domain and site directly so no deployment races the
        // stop below.
        let domain = state
            .manager
            .create_domain("example.com", crate::types::RuntimeKind::Node)
            .await
            .unwrap();
        let site = state
            .manager
            .create_site(
                domain.id,
                crate::types::RuntimeKind::Node,
                "blank",
                &std::collections::BTreeMap::new(),
            )
            .await
            .unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/sites/{}/stop", site.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn redeploy_unknown_site_not_found() {
        let (state, _dir) = make_app_state();
        let app = super::super::router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/sites/404/redeploy")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn migrate_with_no_sites_reports_zero() {
        let (state, _dir) = make_app_state();
        let app = super::super::router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/migrate")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}
