//! Bearer-JWT authentication.
//!
//! Flow: verify the token, require a `jti`, reject denylisted `jti`s, reject
//! tokens whose issuance session was revoked, then resolve the subject.
use crate::auth::authenticator::{AuthRequest, Authenticator};
use crate::auth::error::AuthError;
use crate::auth::principal::Principal;
use crate::auth::resolver::{IdentityClaims, PrincipalResolver};
use crate::auth::session::{hash_token, touch_in_background};
use crate::auth::token_validator::{TokenValidator, VerifiedClaims};
use crate::store::CredentialStore;
use async_trait::async_trait;
use std::sync::Arc;

/// Accepts `Authorization: Bearer <jwt>` from either OIDC mode.
///
/// # Security
/// - Tokens without a `jti` are rejected so every accepted token can be
///   revoked individually.
/// - A revoked issuance session invalidates its access token even before
///   the token expires.
pub struct BearerAuthenticator {
    validator: TokenValidator,
    store: Arc<dyn CredentialStore>,
    resolver: Arc<PrincipalResolver>,
}

impl BearerAuthenticator {
    pub fn new(
        validator: TokenValidator,
        store: Arc<dyn CredentialStore>,
        resolver: Arc<PrincipalResolver>,
    ) -> Self {
        Self {
            validator,
            store,
            resolver,
        }
    }

    /// Signature, claims and denylist checks without principal resolution.
    ///
    /// # Errors
    /// - [`AuthError::AuthenticationFailed`] for a bad signature, issuer,
    ///   audience or lifetime, a missing `jti`, or a denylisted `jti`.
    /// - [`AuthError::Storage`] if the denylist cannot be read.
    pub async fn verify(&self, token: &str) -> Result<VerifiedClaims, AuthError> {
        let claims = self
            .validator
            .validate(token)
            .await
            .map_err(|err| AuthError::failed(format!("token rejected: {err}")))?;
        let jti = claims
            .jti
            .as_deref()
            .ok_or_else(|| AuthError::failed("token has no jti"))?;
        if self.store.is_jti_revoked(jti).await? {
            return Err(AuthError::failed("token revoked"));
        }
        Ok(claims)
    }
}

#[async_trait]
impl Authenticator for BearerAuthenticator {
    fn name(&self) -> &'static str {
        "bearer"
    }

    async fn authenticate(&self, request: &AuthRequest) -> Result<Option<Principal>, AuthError> {
        let Some(token) = request.bearer.as_deref() else {
            return Ok(None);
        };
        let claims = self.verify(token).await?;

        // Tokens minted here carry a session keyed by their jti hash.
        let session = match claims.jti.as_deref() {
            Some(jti) => self.store.session_by_token_hash(&hash_token(jti)).await?,
            None => None,
        };
        if session.as_ref().is_some_and(|session| session.revoked) {
            return Err(AuthError::failed("session revoked"));
        }

        let identity = IdentityClaims {
            subject: claims.subject,
            email: claims.email,
            name: claims.name,
            groups: claims.groups,
        };
        let mut principal = self.resolver.resolve(&identity).await?;
        if let Some(session) = session {
            principal.session_id = Some(session.id);
            touch_in_background(self.store.clone(), session.id);
        }
        Ok(Some(principal))
    }
}
