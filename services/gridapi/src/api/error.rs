//! JSON error bodies for the admin, self-service and authorization layers.
//!
//! Every non-OAuth error renders as `{code, message, request_id}`. OAuth
//! endpoints use their own RFC 6749 shape (see `oidc::error`).
//!
//! Storage failures are logged here and rendered as a bare `internal` code.
use crate::api::types::ErrorResponse;
use crate::store::StoreError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;

/// Structured API error returned by handlers.
///
/// # Invariants
/// - `status` must match the semantics of `body.code`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorResponse,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(self.body)).into_response()
    }
}

fn api_error(status: StatusCode, code: &str, message: &str) -> ApiError {
    ApiError {
        status,
        body: ErrorResponse {
            code: code.to_string(),
            message: message.to_string(),
            request_id: None,
        },
    }
}

pub fn api_not_found(message: &str) -> ApiError {
    api_error(StatusCode::NOT_FOUND, "not_found", message)
}

pub fn api_conflict(code: &str, message: &str) -> ApiError {
    api_error(StatusCode::CONFLICT, code, message)
}

/// Build a 500 from a store error. The error is logged, never returned.
pub fn api_internal(message: &str, err: &StoreError) -> ApiError {
    tracing::error!(error = ?err, "gridapi storage error");
    api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
}

pub fn api_internal_message(message: &str) -> ApiError {
    api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
}

pub fn api_unauthorized(message: &str) -> ApiError {
    api_error(StatusCode::UNAUTHORIZED, "unauthorized", message)
}

/// 401 with its own code so clients can tell a disabled account from a bad
/// credential.
pub fn api_account_disabled(message: &str) -> ApiError {
    api_error(StatusCode::UNAUTHORIZED, "account_disabled", message)
}

pub fn api_forbidden(message: &str) -> ApiError {
    api_error(StatusCode::FORBIDDEN, "forbidden", message)
}

pub fn api_validation_error(message: &str) -> ApiError {
    api_error(StatusCode::BAD_REQUEST, "validation_error", message)
}

/// Map a store error that reached a handler.
pub fn api_store_error(err: &StoreError) -> ApiError {
    match err {
        StoreError::NotFound(what) => api_not_found(what),
        StoreError::Conflict(what) | StoreError::UniqueViolation(what) => {
            api_conflict("conflict", what)
        }
        StoreError::Unexpected(_) => api_internal("storage failure", err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_helpers_build_expected_codes() {
        let cases = [
            (api_not_found("missing"), StatusCode::NOT_FOUND, "not_found"),
            (api_conflict("already_exists", "x"), StatusCode::CONFLICT, "already_exists"),
            (api_internal_message("oops"), StatusCode::INTERNAL_SERVER_ERROR, "internal"),
            (api_unauthorized("nope"), StatusCode::UNAUTHORIZED, "unauthorized"),
            (api_account_disabled("off"), StatusCode::UNAUTHORIZED, "account_disabled"),
            (api_forbidden("nope"), StatusCode::FORBIDDEN, "forbidden"),
            (api_validation_error("bad"), StatusCode::BAD_REQUEST, "validation_error"),
        ];
        for (err, status, code) in cases {
            assert_eq!(err.status, status);
            assert_eq!(err.body.code, code);
        }
    }

    #[test]
    fn store_errors_do_not_leak_detail() {
        let err = StoreError::Unexpected(anyhow::anyhow!("password=hunter2"));
        let api = api_store_error(&err);
        assert_eq!(api.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!api.body.message.contains("hunter2"));

        let conflict = api_store_error(&StoreError::UniqueViolation("email".to_string()));
        assert_eq!(conflict.status, StatusCode::CONFLICT);
    }
}
