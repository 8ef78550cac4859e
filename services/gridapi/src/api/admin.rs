//! Administrative API handlers.
//!
//! # Purpose and responsibility
//! Manage the group→role cache, policy tuples, group→role mappings and direct
//! role assignments.
//!
//! # Key invariants
//! - Every route here sits behind the authorization middleware; handlers
//!   never re-check permissions.
//! - Group→role mutations refresh the cache before responding, so the new
//!   mapping applies to the next request that resolves a principal.
//!
//! # Security considerations
//! - Mutations are audit-logged with the acting principal.
use crate::api::error::{ApiError, api_internal, api_store_error, api_validation_error};
use crate::api::types::{
    CacheRefreshResponse, GroupRoleListResponse, GroupRoleMutationResponse, GroupRoleRequest,
    PolicyListResponse, PolicyQuery, PolicyWriteRequest, PolicyWriteResponse, RoleAssignRequest,
};
use crate::app::AppState;
use crate::auth::middleware::CurrentPrincipal;
use crate::model::{GroupRoleAssignment, RoleAssignment};
use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use grid_authz::{PolicyFilter, PrincipalKind, parse_principal_id};

#[utoipa::path(
    post,
    path = "/admin/cache/refresh",
    tag = "admin",
    responses(
        (status = 200, description = "Group role cache reloaded", body = CacheRefreshResponse),
        (status = 403, description = "Caller may not refresh the cache", body = crate::api::types::ErrorResponse)
    )
)]
/// Reload the group→role cache from the store.
pub(crate) async fn refresh_cache(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
) -> Result<Json<CacheRefreshResponse>, ApiError> {
    let generation = state
        .group_cache
        .refresh()
        .await
        .map_err(|err| api_internal("group role cache refresh failed", &err))?;
    tracing::info!(
        target: "audit",
        principal_id = %principal.principal_id,
        generation,
        "group role cache refreshed on demand"
    );
    Ok(Json(CacheRefreshResponse { generation }))
}

#[utoipa::path(
    get,
    path = "/admin/policies",
    tag = "admin",
    params(
        ("ptype" = Option<String>, Query, description = "p or g"),
        ("field_index" = Option<usize>, Query, description = "First field compared"),
        ("values" = Option<String>, Query, description = "Comma-separated field values")
    ),
    responses(
        (status = 200, description = "Persisted policy tuples", body = PolicyListResponse)
    )
)]
/// List persisted policy tuples, optionally filtered.
pub(crate) async fn list_policies(
    State(state): State<AppState>,
    Query(query): Query<PolicyQuery>,
) -> Result<Json<PolicyListResponse>, ApiError> {
    let items = if query.ptype.is_none() && query.values.is_none() {
        state.policies.load_all().await?
    } else {
        let filter = PolicyFilter {
            ptype: query.ptype,
            field_index: query.field_index.unwrap_or_default(),
            values: query
                .values
                .map(|values| values.split(',').map(str::to_string).collect())
                .unwrap_or_default(),
        };
        state.policies.load_filtered(&filter).await?
    };
    Ok(Json(PolicyListResponse {
        items,
        generation: state.policies.engine().generation(),
    }))
}

#[utoipa::path(
    post,
    path = "/admin/policies",
    tag = "admin",
    request_body = PolicyWriteRequest,
    responses(
        (status = 200, description = "Policies written and engine reloaded", body = PolicyWriteResponse),
        (status = 400, description = "Invalid request", body = crate::api::types::ErrorResponse)
    )
)]
/// Apply an add/remove batch, or replace the table wholesale.
pub(crate) async fn write_policies(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Json(body): Json<PolicyWriteRequest>,
) -> Result<Json<PolicyWriteResponse>, ApiError> {
    let generation = match body.replace {
        Some(tuples) => {
            if !body.add.is_empty() || !body.remove.is_empty() {
                return Err(api_validation_error(
                    "replace cannot be combined with add or remove",
                ));
            }
            state.policies.save_all(&tuples).await?
        }
        None => {
            if body.add.is_empty() && body.remove.is_empty() {
                return Err(api_validation_error("no policy changes supplied"));
            }
            state.policies.apply_batch(&body.add, &body.remove).await?
        }
    };
    tracing::info!(
        target: "audit",
        principal_id = %principal.principal_id,
        generation,
        "policies written"
    );
    Ok(Json(PolicyWriteResponse {
        generation,
        policy_count: state.policies.engine().policy_count(),
    }))
}

#[utoipa::path(
    get,
    path = "/admin/group-roles",
    tag = "admin",
    responses(
        (status = 200, description = "Group role mappings in the current snapshot", body = GroupRoleListResponse)
    )
)]
/// List group→role mappings as persisted.
pub(crate) async fn list_group_roles(
    State(state): State<AppState>,
) -> Result<Json<GroupRoleListResponse>, ApiError> {
    let items = state
        .store
        .list_group_roles()
        .await
        .map_err(|err| api_store_error(&err))?
        .into_iter()
        .map(|assignment| GroupRoleRequest {
            group: assignment.group,
            role: assignment.role,
        })
        .collect();
    Ok(Json(GroupRoleListResponse {
        items,
        generation: state.group_cache.generation(),
    }))
}

#[utoipa::path(
    post,
    path = "/admin/group-roles",
    tag = "admin",
    request_body = GroupRoleRequest,
    responses(
        (status = 201, description = "Mapping created", body = GroupRoleMutationResponse),
        (status = 200, description = "Mapping already existed", body = GroupRoleMutationResponse)
    )
)]
pub(crate) async fn assign_group_role(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Json(body): Json<GroupRoleRequest>,
) -> Result<(StatusCode, Json<GroupRoleMutationResponse>), ApiError> {
    let assignment = group_role(&body)?;
    let changed = state
        .store
        .assign_group_role(assignment)
        .await
        .map_err(|err| api_store_error(&err))?;
    let generation = refresh_after_mutation(&state).await?;
    tracing::info!(
        target: "audit",
        principal_id = %principal.principal_id,
        group = %body.group,
        role = %body.role,
        changed,
        "group role assigned"
    );
    let status = if changed {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(GroupRoleMutationResponse { changed, generation })))
}

#[utoipa::path(
    delete,
    path = "/admin/group-roles",
    tag = "admin",
    request_body = GroupRoleRequest,
    responses(
        (status = 200, description = "Mapping removed (or already absent)", body = GroupRoleMutationResponse)
    )
)]
pub(crate) async fn remove_group_role(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Json(body): Json<GroupRoleRequest>,
) -> Result<Json<GroupRoleMutationResponse>, ApiError> {
    let assignment = group_role(&body)?;
    let changed = state
        .store
        .remove_group_role(&assignment)
        .await
        .map_err(|err| api_store_error(&err))?;
    let generation = refresh_after_mutation(&state).await?;
    tracing::info!(
        target: "audit",
        principal_id = %principal.principal_id,
        group = %body.group,
        role = %body.role,
        changed,
        "group role removed"
    );
    Ok(Json(GroupRoleMutationResponse { changed, generation }))
}

#[utoipa::path(
    post,
    path = "/admin/roles",
    tag = "admin",
    request_body = RoleAssignRequest,
    responses(
        (status = 204, description = "Role assigned"),
        (status = 400, description = "Malformed principal ID", body = crate::api::types::ErrorResponse)
    )
)]
/// Grant a role directly to a user or service account.
pub(crate) async fn assign_role(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Json(body): Json<RoleAssignRequest>,
) -> Result<StatusCode, ApiError> {
    let role = body.role.trim();
    if role.is_empty() {
        return Err(api_validation_error("role is required"));
    }
    let Some((kind, _)) = parse_principal_id(&body.principal_id) else {
        return Err(api_validation_error(
            "principal_id must be namespaced, e.g. user:<id>",
        ));
    };
    if !matches!(kind, PrincipalKind::User | PrincipalKind::ServiceAccount) {
        return Err(api_validation_error(
            "roles can only be assigned to users and service accounts",
        ));
    }
    state
        .store
        .assign_role(RoleAssignment {
            principal_id: body.principal_id.clone(),
            role: role.to_string(),
        })
        .await
        .map_err(|err| api_store_error(&err))?;
    tracing::info!(
        target: "audit",
        principal_id = %principal.principal_id,
        assignee = %body.principal_id,
        role,
        "role assigned"
    );
    Ok(StatusCode::NO_CONTENT)
}

fn group_role(body: &GroupRoleRequest) -> Result<GroupRoleAssignment, ApiError> {
    let (group, role) = (body.group.trim(), body.role.trim());
    if group.is_empty() || role.is_empty() {
        return Err(api_validation_error("group and role are required"));
    }
    Ok(GroupRoleAssignment::new(group, role))
}

async fn refresh_after_mutation(state: &AppState) -> Result<u64, ApiError> {
    state
        .group_cache
        .refresh()
        .await
        .map_err(|err| api_internal("group role cache refresh failed", &err))
}
