//! Self-service API handlers.
//!
//! Each route acts on the caller's own data unless a `principal_id` query
//! parameter names someone else, in which case the authorization middleware
//! has already checked the caller's policy for that target. Handlers read the
//! resolved target from [`AuthorizedOperation`].
use crate::api::error::{ApiError, api_forbidden, api_not_found, api_store_error};
use crate::api::types::{PermissionsResponse, SessionListResponse, SessionView};
use crate::app::AppState;
use crate::auth::interceptor::AuthorizedOperation;
use crate::auth::middleware::CurrentPrincipal;
use crate::auth::principal::{Principal, PrincipalType};
use crate::auth::rbac::effective_permissions;
use crate::model::SessionOwner;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use grid_authz::{PrincipalKind, parse_principal_id};
use uuid::Uuid;

#[utoipa::path(
    get,
    path = "/me/sessions",
    tag = "me",
    params(("principal_id" = Option<String>, Query, description = "Other user to inspect")),
    responses(
        (status = 200, description = "Sessions of the target user", body = SessionListResponse)
    )
)]
pub(crate) async fn list_sessions(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Extension(authorized): Extension<AuthorizedOperation>,
) -> Result<Json<SessionListResponse>, ApiError> {
    let target = target_of(&principal, &authorized);
    let owner = session_owner(&target)?;
    let mut items: Vec<SessionView> = state
        .store
        .sessions_for_owner(&owner)
        .await
        .map_err(|err| api_store_error(&err))?
        .iter()
        .map(|session| SessionView::from_session(session, principal.session_id))
        .collect();
    items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(Json(SessionListResponse {
        principal_id: target,
        items,
    }))
}

#[utoipa::path(
    delete,
    path = "/me/sessions/{session_id}",
    tag = "me",
    params(("session_id" = Uuid, Path, description = "Session to revoke")),
    responses(
        (status = 204, description = "Session revoked"),
        (status = 404, description = "No such session for the target", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn revoke_session(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Extension(authorized): Extension<AuthorizedOperation>,
    Path(session_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let target = target_of(&principal, &authorized);
    let owner = session_owner(&target)?;
    let session = match state.store.get_session(session_id).await {
        Ok(session) if session.owner == owner => session,
        // Sessions of other owners are reported as missing.
        Ok(_) | Err(crate::store::StoreError::NotFound(_)) => {
            return Err(api_not_found("session not found"));
        }
        Err(err) => return Err(api_store_error(&err)),
    };
    state
        .store
        .revoke_session(session.id)
        .await
        .map_err(|err| api_store_error(&err))?;
    tracing::info!(
        target: "audit",
        principal_id = %principal.principal_id,
        owner = %target,
        session_id = %session.id,
        "session revoked"
    );
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/me/permissions",
    tag = "me",
    params(("principal_id" = Option<String>, Query, description = "Other user to inspect")),
    responses(
        (status = 200, description = "Effective roles and permission rules", body = PermissionsResponse)
    )
)]
pub(crate) async fn permissions(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Extension(authorized): Extension<AuthorizedOperation>,
) -> Result<Json<PermissionsResponse>, ApiError> {
    let target = target_of(&principal, &authorized);
    let subject = if target == principal.principal_id {
        principal
    } else {
        // Another user's view: direct roles only, since groups come from
        // their credential and are not stored.
        let internal_id = session_owner(&target)?
            .user_id()
            .unwrap_or_else(Uuid::nil);
        let mut other = Principal::new(PrincipalType::User, &target, &target, internal_id);
        other.roles = state.resolver.effective_roles(&target, &[]).await?;
        other
    };
    let engine = state.policies.engine();
    Ok(Json(PermissionsResponse {
        permissions: effective_permissions(&engine, &subject),
        principal_id: subject.principal_id,
        roles: subject.roles,
    }))
}

fn target_of(principal: &Principal, authorized: &AuthorizedOperation) -> String {
    authorized
        .target
        .clone()
        .unwrap_or_else(|| principal.principal_id.clone())
}

fn session_owner(target: &str) -> Result<SessionOwner, ApiError> {
    match parse_principal_id(target) {
        Some((PrincipalKind::User, id)) => Uuid::parse_str(id)
            .map(SessionOwner::User)
            .map_err(|_| api_not_found("user not found")),
        _ => Err(api_forbidden("only user sessions are self-service")),
    }
}
