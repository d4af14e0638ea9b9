//! Domain management endpoints.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::{DomainId, RuntimeKind};

use super::AppState;
use super::sites::{ErrorResponse, error_to_status};

/// Request to create a domain.
#[derive(Debug, Deserialize)]
pub struct CreateDomainRequest {
    /// Hostname the domain serves.
    pub hostname: String,
    /// Runtime designated for sites under this domain.
    pub runtime: RuntimeKind,
}

/// Response for a created domain.
#[derive(Debug, Serialize)]
pub struct DomainResponse {
    /// Assigned domain id.
    pub id: i64,
    /// Hostname.
    pub hostname: String,
    /// Lifecycle status.
    pub status: String,
}

/// Create a domain.
pub async fn create_domain(
    State(state): State<AppState>,
    Json(request): Json<CreateDomainRequest>,
) -> Result<(StatusCode, Json<DomainResponse>), (StatusCode, Json<ErrorResponse>)> {
    info!(hostname = %request.hostname, "creating domain via API");

    match state
        .manager
        .create_domain(&request.hostname, request.runtime)
        .await
    {
        Ok(domain) => Ok((
            StatusCode::CREATED,
            Json(DomainResponse {
                id: domain.id.get(),
                hostname: domain.hostname,
                status: domain.status.as_str().to_owned(),
            }),
        )),
        Err(e) => Err((
            error_to_status(&e),
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )),
    }
}

/// Remove a domain, cascading to its sites.
pub async fn remove_domain(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    info!(domain = id, "removing domain via API");

    match state.manager.remove_domain(DomainId::new(id)).await {
        Ok(()) => Ok(StatusCode::NO_CONTENT),
        Err(e) => Err((
            error_to_status(&e),
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )),
    }
}
