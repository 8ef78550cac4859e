use crate::api::error::{
    ApiError, api_account_disabled, api_conflict, api_forbidden, api_internal,
    api_internal_message, api_not_found, api_unauthorized, api_validation_error,
};
use crate::store::StoreError;
use grid_authz::AuthzError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("account disabled: {0}")]
    AccountDisabled(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("identity conflict: {0}")]
    IdentityConflict(String),
    #[error("invalid policy: {0}")]
    InvalidPolicy(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
    #[error("policy evaluation error: {0}")]
    Policy(#[from] AuthzError),
}

impl AuthError {
    pub fn failed(reason: impl Into<String>) -> Self {
        AuthError::AuthenticationFailed(reason.into())
    }

    /// Label used for metrics and audit logs.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::AuthenticationFailed(_) => "authentication_failed",
            AuthError::AccountDisabled(_) => "account_disabled",
            AuthError::PermissionDenied(_) => "permission_denied",
            AuthError::NotFound(_) => "not_found",
            AuthError::IdentityConflict(_) => "identity_conflict",
            AuthError::InvalidPolicy(_) => "invalid_policy",
            AuthError::Configuration(_) => "configuration",
            AuthError::Storage(_) => "storage",
            AuthError::Policy(_) => "policy",
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            // Clients only learn that authentication failed.
            AuthError::AuthenticationFailed(reason) => {
                tracing::debug!(reason = %reason, "authentication failed");
                api_unauthorized("authentication failed")
            }
            AuthError::AccountDisabled(_) => api_account_disabled("account disabled"),
            AuthError::PermissionDenied(reason) => api_forbidden(&reason),
            AuthError::NotFound(what) => api_not_found(&what),
            AuthError::IdentityConflict(reason) => api_conflict("identity_conflict", &reason),
            AuthError::InvalidPolicy(reason) => api_validation_error(&reason),
            AuthError::Configuration(reason) => {
                tracing::error!(reason = %reason, "auth configuration error");
                api_internal_message("server misconfigured")
            }
            AuthError::Storage(err) => api_internal("storage failure", &err),
            AuthError::Policy(err) => {
                tracing::error!(error = %err, "policy evaluation failed");
                api_internal_message("policy evaluation failed")
            }
        }
    }
}
