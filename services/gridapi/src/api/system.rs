//! System/health API handlers.
//!
//! # Key invariants
//! - Health checks must be fast and side-effect free.
//! - System info is derived from in-memory state, except the store health.
use crate::api::error::{ApiError, api_internal};
use crate::api::types::{HealthStatus, SystemInfo};
use crate::app::AppState;
use crate::config::OidcMode;
use axum::Json;
use axum::extract::State;

#[utoipa::path(
    get,
    path = "/system/info",
    tag = "system",
    responses(
        (status = 200, description = "Service identity and cache generations", body = SystemInfo)
    )
)]
pub(crate) async fn system_info(State(state): State<AppState>) -> Json<SystemInfo> {
    let oidc_mode = match state.config.oidc.mode {
        OidcMode::Internal => "internal",
        OidcMode::External => "external",
    };
    Json(SystemInfo {
        service: "gridapi".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        oidc_mode: oidc_mode.to_string(),
        storage_backend: state.store.backend_name().to_string(),
        durable_storage: state.store.is_durable(),
        group_cache_generation: state.group_cache.generation(),
        policy_generation: state.policies.engine().generation(),
    })
}

#[utoipa::path(
    get,
    path = "/system/health",
    tag = "system",
    responses(
        (status = 200, description = "Service health", body = HealthStatus),
        (status = 500, description = "Store unavailable", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn system_health(
    State(state): State<AppState>,
) -> Result<Json<HealthStatus>, ApiError> {
    state
        .store
        .health_check()
        .await
        .map_err(|err| api_internal("storage unavailable", &err))?;
    Ok(Json(HealthStatus {
        status: "ok".to_string(),
    }))
}
