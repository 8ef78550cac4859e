//! Authorization server state machines.
//!
//! # Flows
//! - Authorization code: `authorize` records a pending request, login
//!   completion binds a user and issues a code, `exchange_code` redeems it
//!   once (PKCE checked) for tokens.
//! - Refresh: only the client the token was issued to may redeem it. The
//!   token is deleted before anything else is done with it, the session of the access token issued with it is revoked in the
//!   background, then a fresh pair is issued. A second presentation fails.
//! - Device: the device polls while a signed-in user approves or denies the
//!   user code.
//! - Client credentials: a service account authenticates with its bcrypt
//!   secret and receives an access token only.
//!
//! Every access token persists a session keyed by the SHA-256 of its `jti`.
use crate::auth::principal::{Principal, PrincipalType};
use crate::auth::resolver::SERVICE_ACCOUNT_SUBJECT_PREFIX;
use crate::auth::session::{generate_opaque_token, hash_token};
use crate::auth::token_validator::TokenValidator;
use crate::config::GridConfig;
use crate::model::{RevokedJti, Session, SessionOwner, User};
use crate::observability::TOKENS_ISSUED;
use crate::oidc::clients::{
    ClientRegistry, GRANT_AUTHORIZATION_CODE, GRANT_CLIENT_CREDENTIALS, GRANT_DEVICE_CODE,
    GRANT_REFRESH_TOKEN,
};
use crate::oidc::error::OidcError;
use crate::oidc::keys::SigningKey;
use crate::oidc::pkce::{PkceChallenge, PkceMethod};
use crate::oidc::storage::{
    AuthRequestRecord, AuthServerStorage, DeviceAuthorization, DeviceStatus, RefreshTokenRecord,
};
use crate::oidc::tokens::{TokenIssuer, TokenSubject, ttl_delta};
use crate::store::{CredentialStore, StoreError};
use chrono::{DateTime, Utc};
use jsonwebtoken::jwk::JwkSet;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

const AUTH_REQUEST_TTL: chrono::Duration = chrono::Duration::minutes(10);
const DEVICE_CODE_TTL: chrono::Duration = chrono::Duration::minutes(10);
const DEVICE_POLL_INTERVAL_SECONDS: i64 = 5;
const USER_CODE_ALPHABET: &[u8] = b"BCDFGHJKLMNPQRSTVWXZ";
const USER_CODE_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthorizeParams {
    pub response_type: String,
    pub client_id: String,
    pub redirect_uri: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    pub state: Option<String>,
    pub nonce: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
}

/// Pending authorization request awaiting login completion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingAuthorization {
    pub request_id: String,
    pub client_id: String,
    pub scope: String,
    pub expires_in: i64,
}

#[derive(Debug, Clone)]
pub struct LoginCompletion {
    /// Redirect URI carrying `code` and `state`.
    pub redirect_to: String,
    /// Opaque browser session cookie value.
    pub session_cookie: String,
    pub session_expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceAuthorizationResponse {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub verification_uri_complete: String,
    pub expires_in: i64,
    pub interval: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntrospectionResponse {
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscoveryDocument {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub device_authorization_endpoint: String,
    pub userinfo_endpoint: String,
    pub introspection_endpoint: String,
    pub revocation_endpoint: String,
    pub jwks_uri: String,
    pub response_types_supported: Vec<String>,
    pub grant_types_supported: Vec<String>,
    pub code_challenge_methods_supported: Vec<String>,
    pub id_token_signing_alg_values_supported: Vec<String>,
    pub scopes_supported: Vec<String>,
}

struct IssueRequest<'a> {
    grant: &'static str,
    owner: SessionOwner,
    subject: TokenSubject,
    client_id: &'a str,
    scope: &'a str,
    with_refresh: bool,
    nonce: Option<&'a str>,
}

/// Embedded OpenID provider used in internal mode.
///
/// Durable state (users, sessions, the `jti` denylist) lives in the
/// credential store. Short-lived grant state lives in [`AuthServerStorage`]
/// and is lost on restart.
pub struct AuthorizationServer {
    store: Arc<dyn CredentialStore>,
    storage: AuthServerStorage,
    clients: ClientRegistry,
    tokens: TokenIssuer,
    key: Arc<SigningKey>,
    validator: TokenValidator,
    session_duration: Duration,
    token_bytes: usize,
}

impl AuthorizationServer {
    /// # Arguments
    /// - `config`: issuer, audience, token lifetimes and registered clients.
    /// - `store`: credential store shared with the rest of the service.
    /// - `key`: signing key; its public half is pinned into [`Self::validator`].
    pub fn new(config: &GridConfig, store: Arc<dyn CredentialStore>, key: Arc<SigningKey>) -> Self {
        let tokens = TokenIssuer::new(
            key.clone(),
            &config.oidc.issuer,
            &config.oidc.audience,
            config.access_token_ttl,
        );
        let validator = TokenValidator::new(
            &config.oidc.issuer,
            &config.oidc.audience,
            &config.oidc.groups_claim,
            config.oidc.jwks_ttl,
            config.oidc.clock_skew_seconds,
        )
        .with_pinned_keys(key.jwks());
        Self {
            store,
            storage: AuthServerStorage::new(),
            clients: ClientRegistry::new(&config.clients),
            tokens,
            key,
            validator,
            session_duration: config.session_duration,
            token_bytes: config.token_bytes,
        }
    }

    /// Validator that trusts this server's key without fetching it.
    pub fn validator(&self) -> TokenValidator {
        self.validator.clone()
    }

    pub fn jwks(&self) -> JwkSet {
        self.key.jwks()
    }

    pub fn session_duration(&self) -> Duration {
        self.session_duration
    }

    /// Authenticate a registered client without running a grant.
    pub fn authenticate_client(
        &self,
        client_id: &str,
        client_secret: Option<&str>,
    ) -> Result<(), OidcError> {
        self.clients.authenticate(client_id, client_secret).map(|_| ())
    }

    pub fn discovery(&self) -> DiscoveryDocument {
        let issuer = self.tokens.issuer();
        let endpoint = |path: &str| format!("{issuer}{path}");
        DiscoveryDocument {
            issuer: issuer.to_string(),
            authorization_endpoint: endpoint("/authorize"),
            token_endpoint: endpoint("/token"),
            device_authorization_endpoint: endpoint("/device_authorization"),
            userinfo_endpoint: endpoint("/userinfo"),
            introspection_endpoint: endpoint("/introspect"),
            revocation_endpoint: endpoint("/revoke"),
            jwks_uri: endpoint("/.well-known/jwks.json"),
            response_types_supported: vec!["code".to_string()],
            grant_types_supported: vec![
                GRANT_AUTHORIZATION_CODE.to_string(),
                GRANT_REFRESH_TOKEN.to_string(),
                GRANT_CLIENT_CREDENTIALS.to_string(),
                GRANT_DEVICE_CODE.to_string(),
            ],
            code_challenge_methods_supported: vec!["S256".to_string(), "plain".to_string()],
            id_token_signing_alg_values_supported: vec!["RS256".to_string()],
            scopes_supported: vec![
                "openid".to_string(),
                "profile".to_string(),
                "email".to_string(),
                "offline_access".to_string(),
            ],
        }
    }

    /// Record a pending authorization-code request.
    ///
    /// # Errors
    /// - [`OidcError::InvalidRequest`] for a response type other than `code`
    ///   or an unsupported PKCE method.
    /// - [`OidcError::InvalidRequest`] for a redirect URI the client did not
    ///   register, or a missing one when it registered several.
    /// - [`OidcError::InvalidClient`] for an unknown client, and
    ///   [`OidcError::UnauthorizedClient`] when it may not use the grant.
    pub fn authorize(&self, params: &AuthorizeParams) -> Result<PendingAuthorization, OidcError> {
        self.storage.purge_expired(Utc::now());
        if params.response_type != "code" {
            return Err(OidcError::InvalidRequest(
                "response_type must be code".to_string(),
            ));
        }
        let client = self
            .clients
            .get(&params.client_id)
            .ok_or_else(|| OidcError::InvalidClient("unknown client".to_string()))?;
        ClientRegistry::ensure_grant(client, GRANT_AUTHORIZATION_CODE)?;
        let redirect_uri = ClientRegistry::redirect_uri(client, params.redirect_uri.as_deref())?;

        let pkce = match params.code_challenge.as_deref() {
            Some(challenge) if !challenge.is_empty() => {
                let method = PkceMethod::parse(params.code_challenge_method.as_deref())
                    .ok_or_else(|| {
                        OidcError::InvalidRequest("unsupported code_challenge_method".to_string())
                    })?;
                Some(PkceChallenge {
                    challenge: challenge.to_string(),
                    method,
                })
            }
            _ if client.secret_hash.is_none() => {
                return Err(OidcError::InvalidRequest(
                    "public clients must use PKCE".to_string(),
                ));
            }
            _ => None,
        };

        let record = AuthRequestRecord {
            id: generate_opaque_token(self.token_bytes),
            client_id: client.client_id.clone(),
            redirect_uri: redirect_uri.to_string(),
            scope: params.scope.clone().unwrap_or_default(),
            state: params.state.clone(),
            nonce: params.nonce.clone(),
            pkce,
            expires_at: Utc::now() + AUTH_REQUEST_TTL,
            user_id: None,
        };
        let pending = PendingAuthorization {
            request_id: record.id.clone(),
            client_id: record.client_id.clone(),
            scope: record.scope.clone(),
            expires_in: AUTH_REQUEST_TTL.num_seconds(),
        };
        self.storage.save_auth_request(record);
        Ok(pending)
    }

    /// Verify the user's password, open a browser session and issue the
    /// authorization code for `request_id`.
    pub async fn complete_login(
        &self,
        request_id: &str,
        email: &str,
        password: &str,
    ) -> Result<LoginCompletion, OidcError> {
        let request = self
            .storage
            .auth_request(request_id)
            .filter(|request| request.expires_at > Utc::now())
            .ok_or_else(|| OidcError::InvalidRequest("unknown authorization request".to_string()))?;

        let user = self
            .store
            .user_by_email(email)
            .await?
            .ok_or_else(|| OidcError::AccessDenied("invalid credentials".to_string()))?;
        let Some(hash) = user.password_hash.clone() else {
            return Err(OidcError::AccessDenied("invalid credentials".to_string()));
        };
        if !verify_secret(password, &hash).await {
            tracing::info!(target: "audit", user_id = %user.id, "login rejected");
            return Err(OidcError::AccessDenied("invalid credentials".to_string()));
        }
        if user.disabled {
            return Err(OidcError::AccessDenied("account disabled".to_string()));
        }

        let session_cookie = generate_opaque_token(self.token_bytes);
        let session_expires_at = Utc::now() + ttl_delta(self.session_duration)?;
        self.store
            .create_session(Session::new(
                SessionOwner::User(user.id),
                hash_token(&session_cookie),
                session_expires_at,
            ))
            .await?;

        let code = generate_opaque_token(self.token_bytes);
        self.storage.issue_code(request_id, user.id, &code)?;
        let mut redirect = reqwest::Url::parse(&request.redirect_uri)
            .map_err(|_| OidcError::InvalidRequest("invalid redirect_uri".to_string()))?;
        {
            let mut query = redirect.query_pairs_mut();
            query.append_pair("code", &code);
            if let Some(state) = &request.state {
                query.append_pair("state", state);
            }
        }
        tracing::info!(target: "audit", user_id = %user.id, client_id = %request.client_id, "login completed");
        Ok(LoginCompletion {
            redirect_to: redirect.to_string(),
            session_cookie,
            session_expires_at,
        })
    }

    /// Redeem an authorization code for tokens.
    ///
    /// # Errors
    /// - [`OidcError::InvalidGrant`] when the code is unknown, already used,
    ///   expired, issued to another client or bound to another redirect URI,
    ///   or when the PKCE verifier does not match.
    ///
    /// # Security
    /// - The code is removed before any other check, so a failed attempt
    ///   still burns it.
    pub async fn exchange_code(
        &self,
        client_id: &str,
        client_secret: Option<&str>,
        code: &str,
        redirect_uri: Option<&str>,
        code_verifier: Option<&str>,
    ) -> Result<TokenResponse, OidcError> {
        let client = self.clients.authenticate(client_id, client_secret)?;
        ClientRegistry::ensure_grant(client, GRANT_AUTHORIZATION_CODE)?;

        // The code is consumed before any further check.
        let request = self
            .storage
            .take_code(code)
            .ok_or_else(|| OidcError::InvalidGrant("invalid authorization code".to_string()))?;
        if request.client_id != client.client_id {
            return Err(OidcError::InvalidGrant(
                "code was issued to another client".to_string(),
            ));
        }
        if request.expires_at <= Utc::now() {
            return Err(OidcError::InvalidGrant("authorization code expired".to_string()));
        }
        if redirect_uri.is_some_and(|uri| uri != request.redirect_uri) {
            return Err(OidcError::InvalidGrant("redirect_uri mismatch".to_string()));
        }
        if let Some(pkce) = &request.pkce {
            let verifier = code_verifier
                .ok_or_else(|| OidcError::InvalidGrant("code_verifier required".to_string()))?;
            if !pkce.verify(verifier) {
                return Err(OidcError::InvalidGrant("PKCE verification failed".to_string()));
            }
        }
        let user_id = request
            .user_id
            .ok_or_else(|| OidcError::InvalidGrant("invalid authorization code".to_string()))?;
        let user = self.active_user(user_id).await?;
        let with_refresh = client
            .grant_types
            .iter()
            .any(|grant| grant == GRANT_REFRESH_TOKEN);
        self.issue(IssueRequest {
            grant: GRANT_AUTHORIZATION_CODE,
            owner: SessionOwner::User(user.id),
            subject: user_subject(&user),
            client_id: &client.client_id,
            scope: &request.scope,
            with_refresh,
            nonce: request.nonce.as_deref(),
        })
        .await
    }

    /// Rotate a refresh token: retire the old pair and issue a new one.
    ///
    /// # Arguments
    /// - `client_id`, `client_secret`: the calling client's credentials.
    /// - `refresh_token`: the raw token as issued.
    ///
    /// # Errors
    /// - [`OidcError::InvalidClient`] when client authentication fails.
    /// - [`OidcError::InvalidGrant`] for an unknown, replayed, expired or
    ///   foreign token, or when the owning user has been disabled.
    ///
    /// # Security
    /// - Ownership is checked before the token is consumed. A client that
    ///   learns another client's refresh token cannot revoke it this way.
    pub async fn refresh(
        &self,
        client_id: &str,
        client_secret: Option<&str>,
        refresh_token: &str,
    ) -> Result<TokenResponse, OidcError> {
        let client = self.clients.authenticate(client_id, client_secret)?;
        ClientRegistry::ensure_grant(client, GRANT_REFRESH_TOKEN)?;

        // Step 1: destroy the presented token if this client owns it; a
        // replay finds nothing and a foreign client leaves it in place.
        let token_hash = hash_token(refresh_token);
        let Some(record) = self.storage.take_refresh_token_for(&token_hash, &client.client_id)
        else {
            if let Some(held) = self.storage.refresh_token(&token_hash) {
                tracing::info!(
                    target: "audit",
                    owner_client = %held.client_id,
                    client_id = %client.client_id,
                    "refresh by foreign client rejected"
                );
            }
            return Err(invalid_refresh_token());
        };
        tracing::info!(
            target: "audit",
            client_id = %record.client_id,
            subject = %record.subject,
            "refresh token consumed"
        );
        if record.expires_at <= Utc::now() {
            return Err(invalid_refresh_token());
        }

        // Step 2: retire the previous access token's session.
        self.revoke_session_in_background(&record.access_jti);

        // Step 3: issue a new pair for a still-enabled owner.
        let subject = match record.owner {
            SessionOwner::User(id) => user_subject(&self.active_user(id).await?),
            SessionOwner::ServiceAccount(_) => TokenSubject {
                subject: record.subject.clone(),
                ..TokenSubject::default()
            },
        };
        self.issue(IssueRequest {
            grant: GRANT_REFRESH_TOKEN,
            owner: record.owner,
            subject,
            client_id: &record.client_id,
            scope: &record.scope,
            with_refresh: true,
            nonce: None,
        })
        .await
    }

    /// Issue an access token to a service account. No refresh token.
    ///
    /// # Errors
    /// - [`OidcError::InvalidClient`] for an unknown or disabled account or a
    ///   wrong secret. The three cases are indistinguishable to the caller.
    pub async fn client_credentials(
        &self,
        client_id: &str,
        client_secret: &str,
        scope: Option<&str>,
    ) -> Result<TokenResponse, OidcError> {
        let account = self
            .store
            .service_account_by_client_id(client_id)
            .await?
            .ok_or_else(|| OidcError::InvalidClient("client authentication failed".to_string()))?;
        if !verify_secret(client_secret, &account.secret_hash).await {
            tracing::info!(target: "audit", client_id, "service account authentication failed");
            return Err(OidcError::InvalidClient(
                "client authentication failed".to_string(),
            ));
        }
        if account.disabled {
            return Err(OidcError::InvalidClient("service account disabled".to_string()));
        }
        self.issue(IssueRequest {
            grant: GRANT_CLIENT_CREDENTIALS,
            owner: SessionOwner::ServiceAccount(account.id),
            subject: TokenSubject {
                subject: format!("{SERVICE_ACCOUNT_SUBJECT_PREFIX}{}", account.client_id),
                email: None,
                name: Some(account.name.clone()),
            },
            client_id: &account.client_id,
            scope: scope.unwrap_or_default(),
            with_refresh: false,
            nonce: None,
        })
        .await
    }

    /// Start a device grant and hand back the user code to display.
    ///
    /// # Errors
    /// - Client authentication and grant errors as for the other flows.
    /// - [`OidcError::DuplicateUserCode`] if no unique user code was found
    ///   after a few attempts.
    pub fn device_authorization(
        &self,
        client_id: &str,
        client_secret: Option<&str>,
        scope: Option<&str>,
    ) -> Result<DeviceAuthorizationResponse, OidcError> {
        let now = Utc::now();
        self.storage.purge_expired(now);
        let client = self.clients.authenticate(client_id, client_secret)?;
        ClientRegistry::ensure_grant(client, GRANT_DEVICE_CODE)?;

        let device_code = generate_opaque_token(self.token_bytes);
        let mut attempts = 0;
        let user_code = loop {
            let user_code = generate_user_code();
            let record = DeviceAuthorization {
                device_code: device_code.clone(),
                user_code: user_code.clone(),
                client_id: client.client_id.clone(),
                scope: scope.unwrap_or_default().to_string(),
                expires_at: now + DEVICE_CODE_TTL,
                interval_seconds: DEVICE_POLL_INTERVAL_SECONDS,
                last_polled_at: None,
                status: DeviceStatus::Pending,
            };
            match self.storage.store_device_authorization(record) {
                Ok(()) => break user_code,
                Err(OidcError::DuplicateUserCode) if attempts + 1 < USER_CODE_ATTEMPTS => {
                    attempts += 1;
                }
                Err(err) => return Err(err),
            }
        };

        let verification_uri = format!("{}/device", self.tokens.issuer());
        Ok(DeviceAuthorizationResponse {
            device_code,
            verification_uri_complete: format!("{verification_uri}?user_code={user_code}"),
            user_code,
            verification_uri,
            expires_in: DEVICE_CODE_TTL.num_seconds(),
            interval: DEVICE_POLL_INTERVAL_SECONDS,
        })
    }

    /// A signed-in user approves or denies a pending user code.
    pub fn decide_device(
        &self,
        user_code: &str,
        principal: &Principal,
        approve: bool,
    ) -> Result<(), OidcError> {
        if principal.principal_type != PrincipalType::User {
            return Err(OidcError::AccessDenied(
                "only users can approve devices".to_string(),
            ));
        }
        let user_code = normalize_user_code(user_code);
        let device = self
            .storage
            .device_by_user_code(&user_code)
            .ok_or_else(|| OidcError::InvalidGrant("unknown user code".to_string()))?;
        if device.expires_at <= Utc::now() {
            return Err(OidcError::ExpiredToken);
        }
        let status = if approve {
            DeviceStatus::Approved(principal.internal_id)
        } else {
            DeviceStatus::Denied
        };
        if !self.storage.decide_device(&user_code, status) {
            return Err(OidcError::InvalidGrant("user code already used".to_string()));
        }
        tracing::info!(
            target: "audit",
            principal_id = %principal.principal_id,
            client_id = %device.client_id,
            approve,
            "device authorization decided"
        );
        Ok(())
    }

    /// Poll a device grant on behalf of the device.
    ///
    /// # Errors
    /// - [`OidcError::AuthorizationPending`] until a user decides.
    /// - [`OidcError::SlowDown`] when polled faster than the interval.
    /// - [`OidcError::AccessDenied`] once denied or if the approving user is
    ///   disabled, and [`OidcError::ExpiredToken`] past the deadline.
    pub async fn poll_device(
        &self,
        client_id: &str,
        client_secret: Option<&str>,
        device_code: &str,
    ) -> Result<TokenResponse, OidcError> {
        let client = self.clients.authenticate(client_id, client_secret)?;
        ClientRegistry::ensure_grant(client, GRANT_DEVICE_CODE)?;
        let scope = self
            .storage
            .device_by_code(&client.client_id, device_code)
            .map(|device| device.scope)
            .unwrap_or_default();
        let user_id = self
            .storage
            .poll_device(&client.client_id, device_code, Utc::now())?;
        let user = self
            .active_user(user_id)
            .await
            .map_err(|_| OidcError::AccessDenied("account disabled".to_string()))?;
        let with_refresh = client
            .grant_types
            .iter()
            .any(|grant| grant == GRANT_REFRESH_TOKEN);
        self.issue(IssueRequest {
            grant: GRANT_DEVICE_CODE,
            owner: SessionOwner::User(user.id),
            subject: user_subject(&user),
            client_id: &client.client_id,
            scope: &scope,
            with_refresh,
            nonce: None,
        })
        .await
    }

    /// Revoke a refresh token (owned by `client_id`) or a bare access token
    /// `jti`.
    pub async fn revoke_token(&self, token: &str, client_id: Option<&str>) -> Result<(), OidcError> {
        let token_hash = hash_token(token);
        if let Some(record) = self.storage.refresh_token(&token_hash) {
            if client_id != Some(record.client_id.as_str()) {
                tracing::info!(
                    target: "audit",
                    owner_client = %record.client_id,
                    "refresh token revocation by foreign client rejected"
                );
                return Err(OidcError::UnauthorizedClient(
                    "token was issued to another client".to_string(),
                ));
            }
            self.storage.take_refresh_token_for(&token_hash, &record.client_id);
            self.revoke_jti(&record.access_jti).await?;
            tracing::info!(target: "audit", client_id = %record.client_id, "refresh token revoked");
            return Ok(());
        }
        self.revoke_jti(token).await?;
        tracing::info!(target: "audit", "access token revoked");
        Ok(())
    }

    async fn revoke_jti(&self, jti: &str) -> Result<(), OidcError> {
        let jti_hash = hash_token(jti);
        let expires_at = match self.store.session_by_token_hash(&jti_hash).await? {
            Some(session) => session.expires_at,
            None => Utc::now() + ttl_delta(self.tokens.ttl())?,
        };
        self.store
            .revoke_jti(RevokedJti {
                jti: jti.to_string(),
                expires_at,
            })
            .await?;
        self.store.revoke_session_by_token_hash(&jti_hash).await?;
        Ok(())
    }

    /// RFC 7662 view combining signature, denylist and session state.
    pub async fn introspect(&self, token: &str) -> Result<IntrospectionResponse, OidcError> {
        let Ok(claims) = self.validator.validate(token).await else {
            return Ok(IntrospectionResponse::default());
        };
        let Some(jti) = claims.jti.clone() else {
            return Ok(IntrospectionResponse::default());
        };
        if self.store.is_jti_revoked(&jti).await? {
            return Ok(IntrospectionResponse::default());
        }
        let session = self.store.session_by_token_hash(&hash_token(&jti)).await?;
        if session.is_some_and(|session| !session.is_active_at(Utc::now())) {
            return Ok(IntrospectionResponse::default());
        }
        Ok(IntrospectionResponse {
            active: true,
            sub: Some(claims.subject),
            client_id: claims.client_id,
            scope: claims.scope,
            exp: Some(claims.expires_at),
            jti: Some(jti),
            iss: Some(claims.issuer),
            token_type: Some("Bearer".to_string()),
        })
    }

    async fn active_user(&self, id: uuid::Uuid) -> Result<User, OidcError> {
        let user = match self.store.get_user(id).await {
            Ok(user) => user,
            Err(StoreError::NotFound(_)) => {
                return Err(OidcError::InvalidGrant("unknown user".to_string()));
            }
            Err(err) => return Err(err.into()),
        };
        if user.disabled {
            return Err(OidcError::InvalidGrant("account disabled".to_string()));
        }
        Ok(user)
    }

    fn revoke_session_in_background(&self, jti: &str) {
        let store = self.store.clone();
        let jti_hash = hash_token(jti);
        tokio::spawn(async move {
            match store.revoke_session_by_token_hash(&jti_hash).await {
                Ok(revoked) => {
                    tracing::info!(target: "audit", revoked, "rotated-out session revoked")
                }
                Err(err) => tracing::warn!(error = %err, "rotated-out session revocation failed"),
            }
        });
    }

    async fn issue(&self, request: IssueRequest<'_>) -> Result<TokenResponse, OidcError> {
        let minted = self
            .tokens
            .mint_access(&request.subject, request.client_id, request.scope)?;
        let refresh_token = request
            .with_refresh
            .then(|| generate_opaque_token(self.token_bytes));

        let mut session = Session::new(request.owner, hash_token(&minted.jti), minted.expires_at);
        session.refresh_token_hash = refresh_token.as_deref().map(hash_token);
        self.store.create_session(session).await?;

        if let Some(refresh_token) = &refresh_token {
            self.storage.store_refresh_token(RefreshTokenRecord {
                token_hash: hash_token(refresh_token),
                client_id: request.client_id.to_string(),
                owner: request.owner,
                subject: request.subject.subject.clone(),
                scope: request.scope.to_string(),
                access_jti: minted.jti.clone(),
                expires_at: Utc::now() + ttl_delta(self.session_duration)?,
            });
        }

        let id_token = if has_scope(request.scope, "openid") && request.grant != GRANT_CLIENT_CREDENTIALS
        {
            Some(
                self.tokens
                    .mint_id_token(&request.subject, request.client_id, request.nonce)?,
            )
        } else {
            None
        };

        metrics::counter!(TOKENS_ISSUED, "grant" => request.grant).increment(1);
        Ok(TokenResponse {
            access_token: minted.token,
            token_type: "Bearer".to_string(),
            expires_in: (minted.expires_at - Utc::now()).num_seconds().max(0),
            refresh_token,
            id_token,
            scope: (!request.scope.is_empty()).then(|| request.scope.to_string()),
        })
    }
}

fn invalid_refresh_token() -> OidcError {
    OidcError::InvalidGrant("invalid refresh token".to_string())
}

fn user_subject(user: &User) -> TokenSubject {
    TokenSubject {
        subject: user.subject.clone().unwrap_or_else(|| user.id.to_string()),
        email: Some(user.email.clone()),
        name: Some(user.name.clone()),
    }
}

fn has_scope(scope: &str, wanted: &str) -> bool {
    scope.split_whitespace().any(|item| item == wanted)
}

async fn verify_secret(secret: &str, hash: &str) -> bool {
    let (secret, hash) = (secret.to_string(), hash.to_string());
    tokio::task::spawn_blocking(move || bcrypt::verify(secret, &hash).unwrap_or(false))
        .await
        .unwrap_or(false)
}

fn generate_user_code() -> String {
    let mut rng = rand::thread_rng();
    let mut code: String = (0..8)
        .map(|_| USER_CODE_ALPHABET[rng.gen_range(0..USER_CODE_ALPHABET.len())] as char)
        .collect();
    code.insert(4, '-');
    code
}

fn normalize_user_code(raw: &str) -> String {
    let compact: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if compact.len() == 8 {
        format!("{}-{}", &compact[..4], &compact[4..])
    } else {
        compact
    }
}
