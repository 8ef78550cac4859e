//! Principal resolution shared by every authenticator.
//!
//! # Purpose
//! Turn a validated credential subject into a canonical [`Principal`] with a
//! frozen, effective role set.
//!
//! # Key invariants
//! - `sa:<client_id>` subjects resolve to service accounts; everything else
//!   resolves to users by subject.
//! - Unknown external subjects are provisioned on first sight. Concurrent
//!   first logins converge on one user row: the loser of the insert race
//!   re-queries and resolves to the winner.
//! - An email already owned by a different subject is a conflict, unless the
//!   owner has no subject bound yet, in which case the subject is bound.
//! - Effective roles are direct roles plus roles reachable from asserted
//!   groups through the current group→role snapshot.
use crate::auth::error::AuthError;
use crate::auth::group_cache::GroupRoleCache;
use crate::auth::principal::{Principal, PrincipalType};
use crate::config::OidcMode;
use crate::model::{ServiceAccount, User};
use crate::store::{CredentialStore, StoreError};
use grid_authz::{PrincipalKind, namespaced};
use std::sync::Arc;
use uuid::Uuid;

/// Token subject prefix that marks a service account.
pub const SERVICE_ACCOUNT_SUBJECT_PREFIX: &str = "sa:";

/// Identity assertions carried by a credential.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityClaims {
    pub subject: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub groups: Vec<String>,
}

impl IdentityClaims {
    /// Claims carrying nothing but a subject.
    pub fn subject(subject: &str) -> Self {
        Self {
            subject: subject.to_string(),
            ..Self::default()
        }
    }
}

pub struct PrincipalResolver {
    store: Arc<dyn CredentialStore>,
    group_cache: Arc<GroupRoleCache>,
    mode: OidcMode,
}

impl PrincipalResolver {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        group_cache: Arc<GroupRoleCache>,
        mode: OidcMode,
    ) -> Self {
        Self {
            store,
            group_cache,
            mode,
        }
    }

    /// Resolve `claims` into a principal, provisioning external users on
    /// first sight.
    ///
    /// # Arguments
    /// - `claims`: subject, optional email and name, and asserted groups from
    ///   an already verified credential.
    ///
    /// # Returns
    /// - A principal with its role set frozen for the rest of the request.
    ///
    /// # Errors
    /// - [`AuthError::AuthenticationFailed`] for an empty subject, or an
    ///   unknown subject in internal mode.
    /// - [`AuthError::AccountDisabled`] for a disabled user or service account.
    /// - [`AuthError::IdentityConflict`] when the email belongs to a user
    ///   already bound to another subject.
    /// - [`AuthError::Storage`] on store failures.
    ///
    /// # Security
    /// - Claims must come from a verified token or session. Nothing here
    ///   checks signatures.
    pub async fn resolve(&self, claims: &IdentityClaims) -> Result<Principal, AuthError> {
        if claims.subject.is_empty() {
            return Err(AuthError::failed("missing subject"));
        }
        let mut principal = match service_account_client_id(&claims.subject) {
            Some(client_id) => {
                let account = self.service_account(client_id).await?;
                let mut principal = Principal::new(
                    PrincipalType::ServiceAccount,
                    &claims.subject,
                    &account.client_id,
                    account.id,
                );
                principal.name = Some(account.name);
                principal
            }
            None => {
                let user = self.user(claims).await?;
                let mut principal = Principal::new(
                    PrincipalType::User,
                    &claims.subject,
                    &user.id.to_string(),
                    user.id,
                );
                principal.email = Some(user.email);
                principal.name = Some(user.name);
                principal
            }
        };
        principal.groups = claims.groups.clone();
        principal.roles = self
            .effective_roles(&principal.principal_id, &principal.groups)
            .await?;
        Ok(principal)
    }

    /// Direct roles of `principal_id` followed by roles reachable from
    /// `groups` through the current snapshot.
    pub async fn effective_roles(
        &self,
        principal_id: &str,
        groups: &[String],
    ) -> Result<Vec<String>, AuthError> {
        let mut roles: Vec<String> = self
            .store
            .roles_for_principal(principal_id)
            .await?
            .iter()
            .map(|role| namespaced(PrincipalKind::Role, role))
            .collect();
        let snapshot = self.group_cache.snapshot();
        for role in snapshot.roles_for(groups.iter().map(String::as_str)) {
            if !roles.contains(&role) {
                roles.push(role);
            }
        }
        Ok(roles)
    }

    async fn service_account(&self, client_id: &str) -> Result<ServiceAccount, AuthError> {
        let account = self
            .store
            .service_account_by_client_id(client_id)
            .await?
            .ok_or_else(|| AuthError::failed("unknown service account"))?;
        if account.disabled {
            return Err(AuthError::AccountDisabled(account.client_id));
        }
        Ok(account)
    }

    async fn user(&self, claims: &IdentityClaims) -> Result<User, AuthError> {
        let user = match self.store.user_by_subject(&claims.subject).await? {
            Some(user) => user,
            None => match self.mode {
                OidcMode::Internal => self.internal_user(&claims.subject).await?,
                OidcMode::External => self.provision(claims).await?,
            },
        };
        if user.disabled {
            return Err(AuthError::AccountDisabled(user.id.to_string()));
        }
        Ok(user)
    }

    /// Embedded-server tokens carry the user ID when no external subject was
    /// ever bound.
    async fn internal_user(&self, subject: &str) -> Result<User, AuthError> {
        let id = Uuid::parse_str(subject).map_err(|_| AuthError::failed("unknown subject"))?;
        match self.store.get_user(id).await {
            Ok(user) => Ok(user),
            Err(StoreError::NotFound(_)) => Err(AuthError::failed("unknown subject")),
            Err(err) => Err(err.into()),
        }
    }

    async fn provision(&self, claims: &IdentityClaims) -> Result<User, AuthError> {
        let candidate = User::external(
            &claims.subject,
            claims.email.as_deref(),
            claims.name.as_deref(),
        );

        // Step 1: an existing account with this email either adopts the
        // subject or conflicts with it.
        if let Some(existing) = self.store.user_by_email(&candidate.email).await? {
            return match existing.subject.as_deref() {
                Some(bound) if bound == claims.subject => Ok(existing),
                Some(_) => Err(AuthError::IdentityConflict(
                    "email is bound to a different identity".to_string(),
                )),
                None => self.bind(existing.id, &claims.subject).await,
            };
        }

        // Step 2: insert; a unique violation means another request won.
        match self.store.create_user(candidate).await {
            Ok(user) => {
                tracing::info!(
                    target: "audit",
                    user_id = %user.id,
                    subject = %claims.subject,
                    "user provisioned from external identity"
                );
                Ok(user)
            }
            Err(StoreError::UniqueViolation(_)) => self.winner(&claims.subject).await,
            Err(err) => Err(err.into()),
        }
    }

    async fn bind(&self, id: Uuid, subject: &str) -> Result<User, AuthError> {
        match self.store.bind_user_subject(id, subject).await {
            Ok(user) => {
                tracing::info!(
                    target: "audit",
                    user_id = %user.id,
                    subject,
                    "external identity bound to existing user"
                );
                Ok(user)
            }
            Err(StoreError::Conflict(_) | StoreError::UniqueViolation(_)) => {
                self.winner(subject).await
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn winner(&self, subject: &str) -> Result<User, AuthError> {
        self.store.user_by_subject(subject).await?.ok_or_else(|| {
            AuthError::IdentityConflict("email is bound to a different identity".to_string())
        })
    }
}

/// Client ID for `sa:` subjects (the namespaced `service_account:` form is
/// accepted too).
pub fn service_account_client_id(subject: &str) -> Option<&str> {
    subject
        .strip_prefix(SERVICE_ACCOUNT_SUBJECT_PREFIX)
        .or_else(|| subject.strip_prefix(PrincipalKind::ServiceAccount.prefix()))
        .filter(|client_id| !client_id.is_empty())
}
