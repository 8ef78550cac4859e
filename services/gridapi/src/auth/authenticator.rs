//! Authenticator chain.
//!
//! Each strategy answers `Ok(Some(principal))` when it recognised and
//! accepted the credential, `Ok(None)` when the request carries nothing it
//! handles, and `Err` when it recognised the credential and rejected it.
//! [`MultiAuthenticator`] tries strategies in order: the first `Some` wins and
//! the first `Err` ends the chain. No credentials at all means anonymous.
use crate::auth::error::AuthError;
use crate::auth::principal::Principal;
use crate::observability::AUTHN_OUTCOMES;
use async_trait::async_trait;
use axum::http::HeaderMap;
use axum::http::header::{AUTHORIZATION, COOKIE};
use std::sync::Arc;

/// Fixed name of the browser session cookie.
pub const SESSION_COOKIE: &str = "grid_session";

/// Credentials lifted from an inbound request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthRequest {
    pub bearer: Option<String>,
    pub session_cookie: Option<String>,
}

impl AuthRequest {
    /// Pick the bearer token and session cookie out of `headers`.
    ///
    /// Non-`Bearer` schemes and empty values are ignored, so a request
    /// carrying only Basic credentials comes out empty.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            bearer: bearer_token(headers),
            session_cookie: cookie_value(headers, SESSION_COOKIE),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bearer.is_none() && self.session_cookie.is_none()
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, value)| *key == name && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

/// One credential strategy in the chain.
///
/// # Returns
/// - `Ok(Some(principal))` when the strategy recognised and accepted the
///   credential.
/// - `Ok(None)` when the request carries nothing this strategy handles.
///
/// # Errors
/// - Any [`AuthError`] when the credential was recognised but rejected. The
///   chain stops there instead of falling through to a weaker strategy.
///
/// # Security
/// - Implementations must not return `Ok(None)` for a credential they
///   recognised but could not verify; that would let a forged token pass as
///   anonymous.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Label used in metrics and audit events.
    fn name(&self) -> &'static str;
    async fn authenticate(&self, request: &AuthRequest) -> Result<Option<Principal>, AuthError>;
}

/// Ordered list of strategies. The first decisive answer wins.
#[derive(Clone)]
pub struct MultiAuthenticator {
    chain: Vec<Arc<dyn Authenticator>>,
}

impl MultiAuthenticator {
    pub fn new(chain: Vec<Arc<dyn Authenticator>>) -> Self {
        Self { chain }
    }

    /// Run the chain against `request`.
    ///
    /// # Arguments
    /// - `request`: credentials lifted from the inbound headers.
    ///
    /// # Returns
    /// - `Ok(Some(principal))` from the first strategy that accepts.
    /// - `Ok(None)` if no strategy recognised anything (anonymous).
    ///
    /// # Errors
    /// - The first rejection, unchanged. Each outcome is counted under
    ///   `grid_authn_outcomes_total` and rejections are audited.
    pub async fn authenticate(&self, request: &AuthRequest) -> Result<Option<Principal>, AuthError> {
        for authenticator in &self.chain {
            match authenticator.authenticate(request).await {
                Ok(Some(principal)) => {
                    metrics::counter!(
                        AUTHN_OUTCOMES,
                        "method" => authenticator.name(),
                        "outcome" => "success"
                    )
                    .increment(1);
                    return Ok(Some(principal));
                }
                Ok(None) => continue,
                Err(err) => {
                    metrics::counter!(
                        AUTHN_OUTCOMES,
                        "method" => authenticator.name(),
                        "outcome" => err.kind()
                    )
                    .increment(1);
                    tracing::info!(
                        target: "audit",
                        method = authenticator.name(),
                        outcome = err.kind(),
                        "authentication rejected"
                    );
                    return Err(err);
                }
            }
        }
        Ok(None)
    }
}
