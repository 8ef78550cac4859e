//! In-memory credential store.
//!
//! # Purpose
//! Non-durable implementation of [`CredentialStore`] backed by maps guarded
//! by `tokio::sync::RwLock`. It exists for:
//! - local development without Postgres
//! - unit and integration tests
//!
//! # Key invariants
//! - User subject and email are unique; the check and insert happen under a
//!   single write lock so concurrent first logins produce one row.
//! - Policy rows are stored trimmed and deduplicated, in insertion order.
//! - Writes are serialized per map (write lock per structure).
use super::{
    CredentialStore, IdentityStore, PolicyRowStore, SessionStore, StateCatalog, StoreError,
    StoreResult,
};
use crate::model::{
    GroupRoleAssignment, RevokedJti, RoleAssignment, ServiceAccount, Session, SessionOwner,
    StateRecord, User,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use grid_authz::{PolicyFilter, PolicyRow};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Process-local backend for development and tests.
///
/// Clones share the same maps. Nothing survives a restart, so
/// [`CredentialStore::is_durable`] reports `false`.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    users: Arc<RwLock<HashMap<Uuid, User>>>,
    service_accounts: Arc<RwLock<HashMap<Uuid, ServiceAccount>>>,
    role_assignments: Arc<RwLock<Vec<RoleAssignment>>>,
    group_roles: Arc<RwLock<Vec<GroupRoleAssignment>>>,
    sessions: Arc<RwLock<HashMap<Uuid, Session>>>,
    revoked_jtis: Arc<RwLock<HashMap<String, DateTime<Utc>>>>,
    policy_rows: Arc<RwLock<Vec<PolicyRow>>>,
    states: Arc<RwLock<HashMap<Uuid, StateRecord>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityStore for InMemoryStore {
    async fn create_user(&self, user: User) -> StoreResult<User> {
        let mut users = self.users.write().await;
        if let Some(subject) = &user.subject
            && users
                .values()
                .any(|existing| existing.subject.as_deref() == Some(subject))
        {
            return Err(StoreError::UniqueViolation(format!("user subject {subject}")));
        }
        if users
            .values()
            .any(|existing| existing.email.eq_ignore_ascii_case(&user.email))
        {
            return Err(StoreError::UniqueViolation(format!("user email {}", user.email)));
        }
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_user(&self, id: Uuid) -> StoreResult<User> {
        self.users
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("user {id}")))
    }

    async fn user_by_subject(&self, subject: &str) -> StoreResult<Option<User>> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|user| user.subject.as_deref() == Some(subject))
            .cloned())
    }

    async fn user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|user| user.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn bind_user_subject(&self, id: Uuid, subject: &str) -> StoreResult<User> {
        let mut users = self.users.write().await;
        if users
            .values()
            .any(|user| user.id != id && user.subject.as_deref() == Some(subject))
        {
            return Err(StoreError::UniqueViolation(format!("user subject {subject}")));
        }
        let user = users
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("user {id}")))?;
        match &user.subject {
            Some(existing) if existing == subject => Ok(user.clone()),
            Some(_) => Err(StoreError::Conflict(format!("user {id} already bound"))),
            None => {
                user.subject = Some(subject.to_string());
                Ok(user.clone())
            }
        }
    }

    async fn set_user_disabled(&self, id: Uuid, disabled: bool) -> StoreResult<()> {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("user {id}")))?;
        user.disabled = disabled;
        Ok(())
    }

    async fn create_service_account(
        &self,
        account: ServiceAccount,
    ) -> StoreResult<ServiceAccount> {
        let mut accounts = self.service_accounts.write().await;
        if accounts
            .values()
            .any(|existing| existing.client_id == account.client_id)
        {
            return Err(StoreError::UniqueViolation(format!(
                "service account {}",
                account.client_id
            )));
        }
        accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn get_service_account(&self, id: Uuid) -> StoreResult<ServiceAccount> {
        self.service_accounts
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("service account {id}")))
    }

    async fn service_account_by_client_id(
        &self,
        client_id: &str,
    ) -> StoreResult<Option<ServiceAccount>> {
        Ok(self
            .service_accounts
            .read()
            .await
            .values()
            .find(|account| account.client_id == client_id)
            .cloned())
    }

    async fn set_service_account_disabled(&self, id: Uuid, disabled: bool) -> StoreResult<()> {
        let mut accounts = self.service_accounts.write().await;
        let account = accounts
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("service account {id}")))?;
        account.disabled = disabled;
        Ok(())
    }

    async fn assign_role(&self, assignment: RoleAssignment) -> StoreResult<()> {
        let mut assignments = self.role_assignments.write().await;
        if !assignments.contains(&assignment) {
            assignments.push(assignment);
        }
        Ok(())
    }

    async fn roles_for_principal(&self, principal_id: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .role_assignments
            .read()
            .await
            .iter()
            .filter(|assignment| assignment.principal_id == principal_id)
            .map(|assignment| assignment.role.clone())
            .collect())
    }

    async fn list_group_roles(&self) -> StoreResult<Vec<GroupRoleAssignment>> {
        Ok(self.group_roles.read().await.clone())
    }

    async fn assign_group_role(&self, assignment: GroupRoleAssignment) -> StoreResult<bool> {
        let mut mappings = self.group_roles.write().await;
        if mappings.contains(&assignment) {
            return Ok(false);
        }
        mappings.push(assignment);
        Ok(true)
    }

    async fn remove_group_role(&self, assignment: &GroupRoleAssignment) -> StoreResult<bool> {
        let mut mappings = self.group_roles.write().await;
        let before = mappings.len();
        mappings.retain(|existing| existing != assignment);
        Ok(mappings.len() != before)
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn create_session(&self, session: Session) -> StoreResult<Session> {
        let mut sessions = self.sessions.write().await;
        if sessions
            .values()
            .any(|existing| existing.token_hash == session.token_hash)
        {
            return Err(StoreError::UniqueViolation("session token hash".to_string()));
        }
        sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn get_session(&self, id: Uuid) -> StoreResult<Session> {
        self.sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("session {id}")))
    }

    async fn session_by_token_hash(&self, token_hash: &str) -> StoreResult<Option<Session>> {
        Ok(self
            .sessions
            .read()
            .await
            .values()
            .find(|session| session.token_hash == token_hash)
            .cloned())
    }

    async fn sessions_for_owner(&self, owner: &SessionOwner) -> StoreResult<Vec<Session>> {
        let mut sessions: Vec<Session> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|session| &session.owner == owner)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn revoke_session(&self, id: Uuid) -> StoreResult<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("session {id}")))?;
        session.revoked = true;
        Ok(())
    }

    async fn revoke_session_by_token_hash(&self, token_hash: &str) -> StoreResult<bool> {
        let mut sessions = self.sessions.write().await;
        match sessions
            .values_mut()
            .find(|session| session.token_hash == token_hash)
        {
            Some(session) => {
                session.revoked = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn touch_session(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        if let Some(session) = self.sessions.write().await.get_mut(&id) {
            session.last_used_at = Some(at);
        }
        Ok(())
    }

    async fn revoke_jti(&self, revoked: RevokedJti) -> StoreResult<()> {
        self.revoked_jtis
            .write()
            .await
            .entry(revoked.jti)
            .or_insert(revoked.expires_at);
        Ok(())
    }

    async fn is_jti_revoked(&self, jti: &str) -> StoreResult<bool> {
        Ok(self.revoked_jtis.read().await.contains_key(jti))
    }
}

#[async_trait]
impl PolicyRowStore for InMemoryStore {
    async fn load_policy_rows(&self) -> StoreResult<Vec<PolicyRow>> {
        Ok(self.policy_rows.read().await.clone())
    }

    async fn load_filtered_policy_rows(
        &self,
        filter: &PolicyFilter,
    ) -> StoreResult<Vec<PolicyRow>> {
        Ok(self
            .policy_rows
            .read()
            .await
            .iter()
            .filter(|row| filter.matches(row))
            .cloned()
            .collect())
    }

    async fn apply_policy_batch(&self, add: &[PolicyRow], remove: &[PolicyRow]) -> StoreResult<()> {
        // One write guard for the whole batch keeps it atomic for readers.
        let mut rows = self.policy_rows.write().await;
        rows.retain(|row| !remove.iter().any(|gone| gone.same_rule(row)));
        for row in add {
            if !rows.iter().any(|kept| kept.same_rule(row)) {
                rows.push(row.canonical());
            }
        }
        Ok(())
    }

    async fn replace_policy_rows(&self, replacement: &[PolicyRow]) -> StoreResult<()> {
        let mut rows = self.policy_rows.write().await;
        rows.clear();
        for row in replacement {
            if !rows.iter().any(|kept| kept.same_rule(row)) {
                rows.push(row.clone());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StateCatalog for InMemoryStore {
    async fn state_by_logic_id(&self, logic_id: &str) -> StoreResult<Option<StateRecord>> {
        Ok(self
            .states
            .read()
            .await
            .values()
            .find(|state| state.logic_id == logic_id)
            .cloned())
    }

    async fn state_by_guid(&self, guid: Uuid) -> StoreResult<Option<StateRecord>> {
        Ok(self.states.read().await.get(&guid).cloned())
    }

    async fn upsert_state(&self, record: StateRecord) -> StoreResult<()> {
        self.states.write().await.insert(record.guid, record);
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for InMemoryStore {
    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    fn is_durable(&self) -> bool {
        false
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
