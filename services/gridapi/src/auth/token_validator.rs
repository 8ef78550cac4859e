//! Bearer JWT validation with lazily loaded, cached JWKS.
//!
//! # Purpose
//! Verify access tokens presented to the API, whether they were minted by the
//! embedded authorization server (internal mode) or by an external identity
//! provider acting as the authorization server (external mode).
//!
//! # Key invariants
//! - Only RS256 and ES256 signatures are accepted; the JWK type must agree
//!   with the header algorithm.
//! - `iss` must equal the configured issuer and `aud` must contain the
//!   resource audience (or the IdP client ID when one is configured).
//! - Keys are fetched on first use through issuer discovery and cached with a
//!   TTL; an unknown `kid` forces one refetch to follow key rotation.
//! - Pinned keys (the embedded server's own key) are consulted before any
//!   network fetch.
//!
//! # Security model
//! Claims are decoded without verification only to reject foreign issuers
//! early; nothing from an unverified payload is trusted.
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use dashmap::DashMap;
use jsonwebtoken::jwk::{AlgorithmParameters, EllipticCurve, Jwk, JwkSet};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("unsupported algorithm")]
    UnsupportedAlgorithm,
    #[error("missing key id")]
    MissingKeyId,
    #[error("issuer not allowed")]
    IssuerNotAllowed,
    #[error("missing subject")]
    MissingSubject,
    #[error("invalid jwk: {0}")]
    InvalidJwk(String),
    #[error("jwks key not found")]
    JwksKeyNotFound,
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("jwt error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("invalid claim: {0}")]
    InvalidClaim(String),
}

/// Identity-bearing claims from a verified token.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedClaims {
    pub issuer: String,
    pub subject: String,
    pub jti: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub groups: Vec<String>,
    pub client_id: Option<String>,
    pub scope: Option<String>,
    pub expires_at: i64,
}

#[derive(Debug, Clone)]
struct CachedJwks {
    jwks: JwkSet,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    jwks_uri: String,
}

/// Validator for one issuer. Clones share the JWKS cache.
#[derive(Debug, Clone)]
pub struct TokenValidator {
    issuer: String,
    audiences: Vec<String>,
    groups_claim: String,
    client: reqwest::Client,
    pinned: Option<Arc<JwkSet>>,
    jwks_url: Arc<DashMap<String, String>>,
    jwks_cache: Arc<DashMap<String, CachedJwks>>,
    jwks_ttl: Duration,
    clock_skew_seconds: u64,
}

impl TokenValidator {
    /// Validator that fetches keys through `issuer` discovery on first use.
    ///
    /// # Arguments
    /// - `issuer`: expected `iss`; a trailing slash is ignored.
    /// - `audience`: resource audience every token must carry in `aud`.
    /// - `groups_claim`: claim holding group names (string or array).
    /// - `jwks_ttl`: how long a fetched key set is trusted.
    /// - `clock_skew_seconds`: leeway applied to `exp`, `nbf` and `iat`.
    pub fn new(
        issuer: &str,
        audience: &str,
        groups_claim: &str,
        jwks_ttl: Duration,
        clock_skew_seconds: u64,
    ) -> Self {
        Self {
            issuer: issuer.trim_end_matches('/').to_string(),
            audiences: vec![audience.to_string()],
            groups_claim: groups_claim.to_string(),
            client: reqwest::Client::new(),
            pinned: None,
            jwks_url: Arc::new(DashMap::new()),
            jwks_cache: Arc::new(DashMap::new()),
            jwks_ttl,
            clock_skew_seconds,
        }
    }

    /// Trust `jwks` without fetching. Used when the embedded authorization
    /// server runs in the same process.
    pub fn with_pinned_keys(mut self, jwks: JwkSet) -> Self {
        self.pinned = Some(Arc::new(jwks));
        self
    }

    /// Also accept tokens minted for `audience`, typically the IdP client ID.
    pub fn with_additional_audience(mut self, audience: &str) -> Self {
        if !audience.is_empty() && !self.audiences.iter().any(|known| known == audience) {
            self.audiences.push(audience.to_string());
        }
        self
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Verify `token` and return its identity claims.
    ///
    /// # Errors
    /// - [`TokenError::UnsupportedAlgorithm`] or [`TokenError::MissingKeyId`]
    ///   for a header this service will not verify.
    /// - [`TokenError::IssuerNotAllowed`] before any network access when the
    ///   token names another issuer.
    /// - [`TokenError::JwksKeyNotFound`] when the `kid` is absent even after
    ///   one refetch, and [`TokenError::Http`] when discovery fails.
    /// - [`TokenError::Jwt`] for signature, audience or lifetime failures.
    ///
    /// # Security
    /// - The algorithm comes from the header but is checked against the JWK
    ///   type, so an RSA key cannot be used to verify an ES256 token or the
    ///   reverse.
    pub async fn validate(&self, token: &str) -> Result<VerifiedClaims, TokenError> {
        // Step 1: Pin the algorithm before any key lookup.
        let header = decode_header(token)?;
        if !matches!(header.alg, Algorithm::RS256 | Algorithm::ES256) {
            return Err(TokenError::UnsupportedAlgorithm);
        }
        let kid = header.kid.as_deref().ok_or(TokenError::MissingKeyId)?;

        // Step 2: Reject foreign issuers before touching the network.
        let unverified = decode_unverified_claims(token)?;
        let issuer = extract_string_claim(&unverified, "iss")
            .ok_or_else(|| TokenError::InvalidClaim("iss".to_string()))?;
        if issuer.trim_end_matches('/') != self.issuer {
            return Err(TokenError::IssuerNotAllowed);
        }

        // Step 3: Resolve the key: pinned set, then cached set, then one refetch.
        let jwk = self.find_key(kid).await?;
        ensure_jwk_matches_algorithm(&jwk, header.alg)?;
        let decoding_key = DecodingKey::from_jwk(&jwk)?;

        // Step 4: Verify signature, issuer, audience and expiry.
        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[issuer.as_str()]);
        validation.set_audience(self.audiences.as_slice());
        validation
            .required_spec_claims
            .extend(["iss".to_string(), "aud".to_string(), "sub".to_string()]);
        validation.leeway = self.clock_skew_seconds;
        let data = decode::<Value>(token, &decoding_key, &validation)?;
        validate_iat(&data.claims, self.clock_skew_seconds)?;

        let claims = data.claims;
        let subject = extract_string_claim(&claims, "sub").ok_or(TokenError::MissingSubject)?;
        Ok(VerifiedClaims {
            issuer,
            subject,
            jti: extract_string_claim(&claims, "jti"),
            email: extract_string_claim(&claims, "email"),
            name: extract_string_claim(&claims, "name"),
            groups: extract_groups_claim(&claims, &self.groups_claim),
            client_id: extract_string_claim(&claims, "client_id")
                .or_else(|| extract_string_claim(&claims, "azp")),
            scope: extract_string_claim(&claims, "scope"),
            expires_at: claims.get("exp").and_then(Value::as_i64).unwrap_or_default(),
        })
    }

    async fn find_key(&self, kid: &str) -> Result<Jwk, TokenError> {
        if let Some(pinned) = &self.pinned
            && let Some(key) = find_jwk(pinned, kid)
        {
            return Ok(key.clone());
        }
        let jwks_url = self.resolve_jwks_url().await?;
        if let Some(entry) = self.jwks_cache.get(&jwks_url)
            && entry.expires_at > Instant::now()
            && let Some(key) = find_jwk(&entry.jwks, kid)
        {
            return Ok(key.clone());
        }
        let refreshed = self.refresh_jwks(&jwks_url).await?;
        find_jwk(&refreshed, kid)
            .cloned()
            .ok_or(TokenError::JwksKeyNotFound)
    }

    async fn resolve_jwks_url(&self) -> Result<String, TokenError> {
        if let Some(url) = self.jwks_url.get(&self.issuer) {
            return Ok(url.clone());
        }
        let discovery_url = format!("{}/.well-known/openid-configuration", self.issuer);
        let doc: DiscoveryDocument = self
            .client
            .get(&discovery_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        self.jwks_url
            .insert(self.issuer.clone(), doc.jwks_uri.clone());
        Ok(doc.jwks_uri)
    }

    async fn refresh_jwks(&self, jwks_url: &str) -> Result<JwkSet, TokenError> {
        let jwks: JwkSet = self
            .client
            .get(jwks_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        tracing::debug!(jwks_url, keys = jwks.keys.len(), "jwks refreshed");
        self.jwks_cache.insert(
            jwks_url.to_string(),
            CachedJwks {
                jwks: jwks.clone(),
                expires_at: Instant::now() + self.jwks_ttl,
            },
        );
        Ok(jwks)
    }
}

fn ensure_jwk_matches_algorithm(jwk: &Jwk, alg: Algorithm) -> Result<(), TokenError> {
    match (&jwk.algorithm, alg) {
        (AlgorithmParameters::RSA(_), Algorithm::RS256) => Ok(()),
        (AlgorithmParameters::EllipticCurve(params), Algorithm::ES256) => {
            if params.curve != EllipticCurve::P256 {
                return Err(TokenError::InvalidJwk("unexpected EC curve".to_string()));
            }
            Ok(())
        }
        _ => Err(TokenError::InvalidJwk("kty mismatch".to_string())),
    }
}

fn find_jwk<'a>(jwks: &'a JwkSet, kid: &str) -> Option<&'a Jwk> {
    jwks.keys
        .iter()
        .find(|key| key.common.key_id.as_deref() == Some(kid))
}

fn decode_unverified_claims(token: &str) -> Result<Value, TokenError> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| TokenError::InvalidClaim("token format".to_string()))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| TokenError::InvalidClaim("token payload".to_string()))?;
    serde_json::from_slice(&bytes)
        .map_err(|err| TokenError::InvalidClaim(format!("token payload: {err}")))
}

fn extract_string_claim(claims: &Value, name: &str) -> Option<String> {
    claims
        .get(name)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn validate_iat(claims: &Value, leeway_seconds: u64) -> Result<(), TokenError> {
    // `iat` is optional for external tokens but must not be in the future.
    let Some(iat) = claims.get("iat").and_then(Value::as_i64) else {
        return Ok(());
    };
    if iat > Utc::now().timestamp() + leeway_seconds as i64 {
        return Err(TokenError::InvalidClaim("iat in future".to_string()));
    }
    Ok(())
}

fn extract_groups_claim(claims: &Value, name: &str) -> Vec<String> {
    // Groups may be encoded as either a string or array of strings.
    match claims.get(name) {
        Some(Value::Array(values)) => values
            .iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(value)) => vec![value.clone()],
        _ => Vec::new(),
    }
}
