//! OpenAPI schema aggregation for the Grid API.
use crate::api::types::{
    CacheRefreshResponse, ErrorResponse, GroupRoleListResponse, GroupRoleMutationResponse,
    GroupRoleRequest, HealthStatus, PermissionsResponse, PolicyListResponse, PolicyQuery,
    PolicyWriteRequest, PolicyWriteResponse, RoleAssignRequest, SessionListResponse, SessionView,
    SystemInfo, UserInfoResponse,
};
use crate::api::{admin, me, system};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "gridapi",
        version = "v1",
        description = "Grid identity, session and access-control API"
    ),
    paths(
        system::system_info,
        system::system_health,
        admin::refresh_cache,
        admin::list_policies,
        admin::write_policies,
        admin::list_group_roles,
        admin::assign_group_role,
        admin::remove_group_role,
        admin::assign_role,
        me::list_sessions,
        me::revoke_session,
        me::permissions
    ),
    components(schemas(
        ErrorResponse,
        HealthStatus,
        SystemInfo,
        CacheRefreshResponse,
        PolicyQuery,
        PolicyListResponse,
        PolicyWriteRequest,
        PolicyWriteResponse,
        GroupRoleRequest,
        GroupRoleListResponse,
        GroupRoleMutationResponse,
        RoleAssignRequest,
        SessionView,
        SessionListResponse,
        PermissionsResponse,
        UserInfoResponse
    )),
    tags(
        (name = "system", description = "Health and service metadata"),
        (name = "admin", description = "Policy, role and cache administration"),
        (name = "me", description = "Self-service sessions and permissions")
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_admin_and_self_service_paths() {
        let doc = ApiDoc::openapi();
        for path in ["/admin/policies", "/admin/group-roles", "/me/sessions/{session_id}"] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
