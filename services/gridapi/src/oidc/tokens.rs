//! JWT minting for the embedded server.
//!
//! Access tokens carry `iss`, `sub`, the fixed resource `aud`, a fresh
//! `jti`, `iat` and `exp`. ID tokens are audience-bound to the OAuth client
//! and echo the login `nonce`.
use crate::oidc::error::OidcError;
use crate::oidc::keys::SigningKey;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, Header, encode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Payload of an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
    pub client_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub scope: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Subject data stamped into tokens.
#[derive(Debug, Clone, Default)]
pub struct TokenSubject {
    pub subject: String,
    pub email: Option<String>,
    pub name: Option<String>,
}

/// A signed access token plus the `jti` its session is keyed by.
#[derive(Debug, Clone)]
pub struct MintedAccessToken {
    pub token: String,
    pub jti: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct TokenIssuer {
    key: Arc<SigningKey>,
    issuer: String,
    audience: String,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(key: Arc<SigningKey>, issuer: &str, audience: &str, ttl: Duration) -> Self {
        Self {
            key,
            issuer: issuer.trim_end_matches('/').to_string(),
            audience: audience.to_string(),
            ttl,
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Sign a fresh access token for `subject`.
    ///
    /// # Arguments
    /// - `subject`: `sub` plus optional email and name claims.
    /// - `client_id`: client the token was issued through.
    /// - `scope`: granted scope, omitted from the payload when empty.
    ///
    /// # Errors
    /// - [`OidcError`] when the TTL overflows or signing fails.
    ///
    /// # Security
    /// - Every call draws a new random `jti`, so each token can be revoked on
    ///   its own.
    pub fn mint_access(
        &self,
        subject: &TokenSubject,
        client_id: &str,
        scope: &str,
    ) -> Result<MintedAccessToken, OidcError> {
        let now = Utc::now();
        let expires_at = now + ttl_delta(self.ttl)?;
        let jti = Uuid::new_v4().to_string();
        let claims = AccessClaims {
            iss: self.issuer.clone(),
            sub: subject.subject.clone(),
            aud: self.audience.clone(),
            exp: expires_at.timestamp(),
            iat: now.timestamp(),
            jti: jti.clone(),
            client_id: client_id.to_string(),
            scope: scope.to_string(),
            email: subject.email.clone(),
            name: subject.name.clone(),
        };
        Ok(MintedAccessToken {
            token: self.sign(&claims)?,
            jti,
            expires_at,
        })
    }

    /// Sign an ID token whose `aud` is the OAuth client, not the API.
    pub fn mint_id_token(
        &self,
        subject: &TokenSubject,
        client_id: &str,
        nonce: Option<&str>,
    ) -> Result<String, OidcError> {
        let now = Utc::now();
        let claims = IdTokenClaims {
            iss: self.issuer.clone(),
            sub: subject.subject.clone(),
            aud: client_id.to_string(),
            exp: (now + ttl_delta(self.ttl)?).timestamp(),
            iat: now.timestamp(),
            nonce: nonce.map(str::to_string),
            email: subject.email.clone(),
            name: subject.name.clone(),
        };
        self.sign(&claims)
    }

    fn sign<T: Serialize>(&self, claims: &T) -> Result<String, OidcError> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.key.kid().to_string());
        Ok(encode(&header, claims, self.key.encoding_key())?)
    }
}

pub(crate) fn ttl_delta(ttl: Duration) -> Result<chrono::Duration, OidcError> {
    chrono::Duration::from_std(ttl).map_err(|_| OidcError::Key("token lifetime out of range".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{DecodingKey, Validation, decode, decode_header};

    #[test]
    fn access_token_carries_resource_audience_and_jti() {
        let key = Arc::new(SigningKey::generate().expect("key"));
        let issuer = TokenIssuer::new(key.clone(), "https://grid.test/", "gridapi", Duration::from_secs(7200));
        let subject = TokenSubject {
            subject: "u-1".to_string(),
            email: Some("u@example.com".to_string()),
            name: None,
        };
        let first = issuer.mint_access(&subject, "cli", "openid").expect("mint");
        let second = issuer.mint_access(&subject, "cli", "openid").expect("mint");
        assert_ne!(first.jti, second.jti);

        let header = decode_header(&first.token).expect("header");
        assert_eq!(header.kid.as_deref(), Some(key.kid()));

        let jwk = &key.jwks().keys[0];
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&["gridapi"]);
        validation.set_issuer(&["https://grid.test"]);
        let data = decode::<AccessClaims>(
            &first.token,
            &DecodingKey::from_jwk(jwk).expect("decoding key"),
            &validation,
        )
        .expect("decode");
        assert_eq!(data.claims.jti, first.jti);
        assert_eq!(data.claims.exp - data.claims.iat, 7200);
    }
}
