//! Registry of OAuth clients allowed to use the embedded server.
use crate::config::OAuthClientConfig;
use crate::oidc::error::OidcError;
use std::collections::HashMap;

pub const GRANT_AUTHORIZATION_CODE: &str = "authorization_code";
pub const GRANT_REFRESH_TOKEN: &str = "refresh_token";
pub const GRANT_CLIENT_CREDENTIALS: &str = "client_credentials";
pub const GRANT_DEVICE_CODE: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Clients from configuration, keyed by client ID. Fixed at startup.
#[derive(Debug, Clone, Default)]
pub struct ClientRegistry {
    clients: HashMap<String, OAuthClientConfig>,
}

impl ClientRegistry {
    pub fn new(clients: &[OAuthClientConfig]) -> Self {
        Self {
            clients: clients
                .iter()
                .map(|client| (client.client_id.clone(), client.clone()))
                .collect(),
        }
    }

    pub fn get(&self, client_id: &str) -> Option<&OAuthClientConfig> {
        self.clients.get(client_id)
    }

    /// Look up a client and check its secret. Public clients (no secret
    /// hash) must not present one.
    ///
    /// # Errors
    /// - [`OidcError::InvalidClient`] for an unknown client, a wrong or
    ///   missing secret, or a secret sent by a public client.
    pub fn authenticate(
        &self,
        client_id: &str,
        secret: Option<&str>,
    ) -> Result<&OAuthClientConfig, OidcError> {
        let client = self
            .get(client_id)
            .ok_or_else(|| OidcError::InvalidClient("unknown client".to_string()))?;
        match (&client.secret_hash, secret) {
            (None, None) => Ok(client),
            (Some(hash), Some(secret)) if bcrypt::verify(secret, hash).unwrap_or(false) => {
                Ok(client)
            }
            _ => Err(OidcError::InvalidClient(
                "client authentication failed".to_string(),
            )),
        }
    }

    /// # Errors
    /// - [`OidcError::UnauthorizedClient`] when `grant` is not in the client's
    ///   configured grant types.
    pub fn ensure_grant(client: &OAuthClientConfig, grant: &str) -> Result<(), OidcError> {
        if client.grant_types.iter().any(|allowed| allowed == grant) {
            Ok(())
        } else {
            Err(OidcError::UnauthorizedClient(format!(
                "grant {grant} not allowed for client"
            )))
        }
    }

    /// Exact-match redirect URI check. A client with one registered URI may
    /// omit it from the request.
    pub fn redirect_uri<'a>(
        client: &'a OAuthClientConfig,
        requested: Option<&'a str>,
    ) -> Result<&'a str, OidcError> {
        match requested {
            Some(uri) if client.redirect_uris.iter().any(|allowed| allowed == uri) => Ok(uri),
            Some(_) => Err(OidcError::InvalidRequest(
                "redirect_uri is not registered".to_string(),
            )),
            None => match client.redirect_uris.as_slice() {
                [only] => Ok(only.as_str()),
                _ => Err(OidcError::InvalidRequest("redirect_uri required".to_string())),
            },
        }
    }
}
