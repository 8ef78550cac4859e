//! Credential store interfaces.
//!
//! # Purpose
//! Persistence seam for everything the identity core needs: users, service
//! accounts, sessions, the revoked-`jti` denylist, role and group-role
//! assignments, raw policy rows and the label view of Terraform states.
//!
//! # Notes
//! `StoreError::UniqueViolation` is reported separately from `Conflict` so the
//! principal resolver can settle concurrent first logins by re-querying.
use crate::model::{
    GroupRoleAssignment, RevokedJti, RoleAssignment, ServiceAccount, Session, SessionOwner,
    StateRecord, User,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use grid_authz::{PolicyFilter, PolicyRow};
use thiserror::Error;
use uuid::Uuid;

pub mod memory;
pub mod postgres;

/// Failure categories shared by every backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("unique violation: {0}")]
    UniqueViolation(String),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Users, service accounts and role assignments.
///
/// # Errors
/// - `get_*` methods return [`StoreError::NotFound`] for an unknown ID;
///   lookups by natural key return `Ok(None)` instead.
/// - Backend failures surface as [`StoreError::Unexpected`].
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Insert a user. Fails with `UniqueViolation` when the subject or email
    /// is already taken.
    async fn create_user(&self, user: User) -> StoreResult<User>;
    async fn get_user(&self, id: Uuid) -> StoreResult<User>;
    async fn user_by_subject(&self, subject: &str) -> StoreResult<Option<User>>;
    async fn user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    /// Bind `subject` to a user that has none. Fails with `Conflict` when a
    /// subject is already bound.
    async fn bind_user_subject(&self, id: Uuid, subject: &str) -> StoreResult<User>;
    async fn set_user_disabled(&self, id: Uuid, disabled: bool) -> StoreResult<()>;

    async fn create_service_account(&self, account: ServiceAccount)
    -> StoreResult<ServiceAccount>;
    async fn get_service_account(&self, id: Uuid) -> StoreResult<ServiceAccount>;
    async fn service_account_by_client_id(
        &self,
        client_id: &str,
    ) -> StoreResult<Option<ServiceAccount>>;
    async fn set_service_account_disabled(&self, id: Uuid, disabled: bool) -> StoreResult<()>;

    async fn assign_role(&self, assignment: RoleAssignment) -> StoreResult<()>;
    /// Bare role names directly held by a namespaced principal.
    async fn roles_for_principal(&self, principal_id: &str) -> StoreResult<Vec<String>>;

    async fn list_group_roles(&self) -> StoreResult<Vec<GroupRoleAssignment>>;
    /// Returns `false` when the mapping already existed.
    async fn assign_group_role(&self, assignment: GroupRoleAssignment) -> StoreResult<bool>;
    /// Returns `false` when the mapping did not exist.
    async fn remove_group_role(&self, assignment: &GroupRoleAssignment) -> StoreResult<bool>;
}

/// Issued sessions and the revoked-`jti` denylist.
///
/// # Security
/// - Sessions are keyed by the SHA-256 of a cookie value or `jti`. Raw
///   token values are never passed to a store.
/// - `revoke_jti` is idempotent. A second revocation of the same `jti`
///   changes nothing.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, session: Session) -> StoreResult<Session>;
    async fn get_session(&self, id: Uuid) -> StoreResult<Session>;
    async fn session_by_token_hash(&self, token_hash: &str) -> StoreResult<Option<Session>>;
    async fn sessions_for_owner(&self, owner: &SessionOwner) -> StoreResult<Vec<Session>>;
    async fn revoke_session(&self, id: Uuid) -> StoreResult<()>;
    /// Returns `false` when no session carries the hash.
    async fn revoke_session_by_token_hash(&self, token_hash: &str) -> StoreResult<bool>;
    async fn touch_session(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;

    async fn revoke_jti(&self, revoked: RevokedJti) -> StoreResult<()>;
    async fn is_jti_revoked(&self, jti: &str) -> StoreResult<bool>;
}

/// Raw `casbin_rule` rows. Parsing and validation happen a layer up.
///
/// # Arguments
/// - Rows to remove match by rule, so an allow rule written with an empty
///   effect column is the same rule as one written with `allow`.
#[async_trait]
pub trait PolicyRowStore: Send + Sync {
    async fn load_policy_rows(&self) -> StoreResult<Vec<PolicyRow>>;
    async fn load_filtered_policy_rows(&self, filter: &PolicyFilter)
    -> StoreResult<Vec<PolicyRow>>;
    /// Remove then add in one transaction. Adding an existing row is a no-op.
    async fn apply_policy_batch(&self, add: &[PolicyRow], remove: &[PolicyRow])
    -> StoreResult<()>;
    /// Replace the whole policy table in one transaction.
    async fn replace_policy_rows(&self, rows: &[PolicyRow]) -> StoreResult<()>;
}

/// Label view of Terraform states used by object-scoped checks.
#[async_trait]
pub trait StateCatalog: Send + Sync {
    async fn state_by_logic_id(&self, logic_id: &str) -> StoreResult<Option<StateRecord>>;
    async fn state_by_guid(&self, guid: Uuid) -> StoreResult<Option<StateRecord>>;
    async fn upsert_state(&self, record: StateRecord) -> StoreResult<()>;
}

/// Everything the service needs from one backend.
#[async_trait]
pub trait CredentialStore: IdentityStore + SessionStore + PolicyRowStore + StateCatalog {
    async fn health_check(&self) -> StoreResult<()>;
    /// `false` for the in-memory backend, whose data dies with the process.
    fn is_durable(&self) -> bool;
    fn backend_name(&self) -> &'static str;
}
