//! OAuth 2.0 error model.
//!
//! Errors render as RFC 6749 §5.2 bodies (`error`, `error_description`).
//! Storage and signing failures become `server_error` with no detail.
use crate::store::StoreError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OidcError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("invalid client: {0}")]
    InvalidClient(String),
    #[error("{0}")]
    InvalidGrant(String),
    #[error("unauthorized client: {0}")]
    UnauthorizedClient(String),
    #[error("unsupported grant type: {0}")]
    UnsupportedGrantType(String),
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("authorization pending")]
    AuthorizationPending,
    #[error("slow down")]
    SlowDown,
    #[error("device code expired")]
    ExpiredToken,
    #[error("duplicate user code")]
    DuplicateUserCode,
    #[error("signing key error: {0}")]
    Key(String),
    #[error("token signing failed: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

#[derive(Debug, Serialize)]
pub struct OAuthErrorBody {
    pub error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl OidcError {
    pub fn code(&self) -> &'static str {
        match self {
            OidcError::InvalidRequest(_) => "invalid_request",
            OidcError::InvalidClient(_) => "invalid_client",
            OidcError::InvalidGrant(_) => "invalid_grant",
            OidcError::UnauthorizedClient(_) => "unauthorized_client",
            OidcError::UnsupportedGrantType(_) => "unsupported_grant_type",
            OidcError::AccessDenied(_) => "access_denied",
            OidcError::AuthorizationPending => "authorization_pending",
            OidcError::SlowDown => "slow_down",
            OidcError::ExpiredToken => "expired_token",
            OidcError::DuplicateUserCode
            | OidcError::Key(_)
            | OidcError::Signing(_)
            | OidcError::Storage(_) => "server_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            OidcError::InvalidClient(_) => StatusCode::UNAUTHORIZED,
            OidcError::DuplicateUserCode
            | OidcError::Key(_)
            | OidcError::Signing(_)
            | OidcError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    fn description(&self) -> Option<String> {
        match self {
            OidcError::DuplicateUserCode
            | OidcError::Key(_)
            | OidcError::Signing(_)
            | OidcError::Storage(_) => None,
            other => Some(other.to_string()),
        }
    }
}

impl IntoResponse for OidcError {
    fn into_response(self) -> Response {
        if self.status() == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "authorization server failure");
        }
        let body = OAuthErrorBody {
            error: self.code(),
            error_description: self.description(),
        };
        (self.status(), Json(body)).into_response()
    }
}
