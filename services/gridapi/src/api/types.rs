//! HTTP API request/response types.
//!
//! # Purpose
//! Shared payload shapes for the admin, self-service and system endpoints,
//! plus OpenAPI schema generation.
use crate::auth::rbac::EffectivePermission;
use crate::model::Session;
use chrono::{DateTime, Utc};
use grid_authz::PolicyTuple;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub request_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct HealthStatus {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct SystemInfo {
    pub service: String,
    pub version: String,
    pub oidc_mode: String,
    pub storage_backend: String,
    pub durable_storage: bool,
    pub group_cache_generation: u64,
    pub policy_generation: u64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq, Eq)]
pub struct CacheRefreshResponse {
    pub generation: u64,
}

/// Partial policy load. `values` is compared from `field_index` on; empty
/// entries match anything.
#[derive(Debug, Default, Serialize, Deserialize, ToSchema, Clone)]
pub struct PolicyQuery {
    pub ptype: Option<String>,
    pub field_index: Option<usize>,
    /// Comma-separated field values.
    pub values: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct PolicyListResponse {
    #[schema(value_type = Vec<Object>)]
    pub items: Vec<PolicyTuple>,
    pub generation: u64,
}

/// Incremental change, or a full replacement when `replace` is set.
#[derive(Debug, Default, Serialize, Deserialize, ToSchema, Clone)]
pub struct PolicyWriteRequest {
    #[serde(default)]
    #[schema(value_type = Vec<Object>)]
    pub add: Vec<PolicyTuple>,
    #[serde(default)]
    #[schema(value_type = Vec<Object>)]
    pub remove: Vec<PolicyTuple>,
    #[serde(default)]
    #[schema(value_type = Option<Vec<Object>>)]
    pub replace: Option<Vec<PolicyTuple>>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq, Eq)]
pub struct PolicyWriteResponse {
    pub generation: u64,
    pub policy_count: usize,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq, Eq)]
pub struct GroupRoleRequest {
    pub group: String,
    pub role: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct GroupRoleListResponse {
    pub items: Vec<GroupRoleRequest>,
    pub generation: u64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq, Eq)]
pub struct GroupRoleMutationResponse {
    /// `false` when the mapping already existed (assign) or was absent
    /// (remove).
    pub changed: bool,
    /// Cache generation after the mutation.
    pub generation: u64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq, Eq)]
pub struct RoleAssignRequest {
    /// Namespaced principal (`user:<id>` or `service_account:<client_id>`).
    pub principal_id: String,
    pub role: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq, Eq)]
pub struct SessionView {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub revoked: bool,
    /// Whether this is the session carrying the current request.
    pub current: bool,
}

impl SessionView {
    pub fn from_session(session: &Session, current: Option<Uuid>) -> Self {
        Self {
            id: session.id,
            created_at: session.created_at,
            expires_at: session.expires_at,
            last_used_at: session.last_used_at,
            revoked: session.revoked,
            current: current == Some(session.id),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct SessionListResponse {
    pub principal_id: String,
    pub items: Vec<SessionView>,
}

#[derive(Debug, Serialize, ToSchema, Clone)]
pub struct PermissionsResponse {
    pub principal_id: String,
    pub roles: Vec<String>,
    #[schema(value_type = Vec<Object>)]
    pub permissions: Vec<EffectivePermission>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct UserInfoResponse {
    pub sub: String,
    pub principal_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub roles: Vec<String>,
    pub groups: Vec<String>,
}
