//! Session-cookie authentication and opaque token helpers.
//!
//! Only the SHA-256 hex of a cookie value is stored. A cookie resolves
//! through its session record to the owning user or service account, which
//! is then resolved exactly like a bearer subject.
use crate::auth::authenticator::{AuthRequest, Authenticator};
use crate::auth::error::AuthError;
use crate::auth::principal::Principal;
use crate::auth::resolver::{IdentityClaims, PrincipalResolver, SERVICE_ACCOUNT_SUBJECT_PREFIX};
use crate::model::{Session, SessionOwner};
use crate::store::{CredentialStore, StoreError};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const TOUCH_TIMEOUT: Duration = Duration::from_secs(5);

/// SHA-256 hex digest used to key sessions by cookie value or `jti`.
pub fn hash_token(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

/// URL-safe random token of `bytes` bytes of entropy.
pub fn generate_opaque_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

/// Record `last_used_at` without holding up the request.
pub(crate) fn touch_in_background(store: Arc<dyn CredentialStore>, session_id: Uuid) {
    tokio::spawn(async move {
        match tokio::time::timeout(TOUCH_TIMEOUT, store.touch_session(session_id, Utc::now()))
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::warn!(session_id = %session_id, error = %err, "session touch failed")
            }
            Err(_) => tracing::warn!(session_id = %session_id, "session touch timed out"),
        }
    });
}

/// Accepts the `grid_session` cookie set by the embedded login flow.
///
/// # Errors
/// - [`AuthError::AuthenticationFailed`] for an unknown, expired or revoked
///   session, or one whose owner no longer exists.
/// - [`AuthError::AccountDisabled`] when the owner has been disabled since
///   the cookie was issued.
///
/// # Security
/// - Cookie values are looked up by hash only; the raw value never touches
///   the store or the logs.
pub struct SessionAuthenticator {
    store: Arc<dyn CredentialStore>,
    resolver: Arc<PrincipalResolver>,
}

impl SessionAuthenticator {
    pub fn new(store: Arc<dyn CredentialStore>, resolver: Arc<PrincipalResolver>) -> Self {
        Self { store, resolver }
    }

    async fn owner_subject(&self, session: &Session) -> Result<String, AuthError> {
        match session.owner {
            SessionOwner::User(id) => {
                let user = self.store.get_user(id).await.map_err(missing_owner)?;
                if user.disabled {
                    return Err(AuthError::AccountDisabled(user.id.to_string()));
                }
                Ok(user.subject.unwrap_or_else(|| user.id.to_string()))
            }
            SessionOwner::ServiceAccount(id) => {
                let account = self
                    .store
                    .get_service_account(id)
                    .await
                    .map_err(missing_owner)?;
                if account.disabled {
                    return Err(AuthError::AccountDisabled(account.client_id));
                }
                Ok(format!("{SERVICE_ACCOUNT_SUBJECT_PREFIX}{}", account.client_id))
            }
        }
    }
}

fn missing_owner(err: StoreError) -> AuthError {
    match err {
        StoreError::NotFound(_) => AuthError::failed("session owner missing"),
        other => other.into(),
    }
}

#[async_trait]
impl Authenticator for SessionAuthenticator {
    fn name(&self) -> &'static str {
        "session"
    }

    async fn authenticate(&self, request: &AuthRequest) -> Result<Option<Principal>, AuthError> {
        let Some(cookie) = request.session_cookie.as_deref() else {
            return Ok(None);
        };
        let session = self
            .store
            .session_by_token_hash(&hash_token(cookie))
            .await?
            .ok_or_else(|| AuthError::failed("unknown session"))?;
        if session.revoked {
            return Err(AuthError::failed("session revoked"));
        }
        if session.is_expired_at(Utc::now()) {
            return Err(AuthError::failed("session expired"));
        }

        let subject = self.owner_subject(&session).await?;
        let mut principal = self.resolver.resolve(&IdentityClaims::subject(&subject)).await?;
        principal.session_id = Some(session.id);
        touch_in_background(self.store.clone(), session.id);
        Ok(Some(principal))
    }
}
