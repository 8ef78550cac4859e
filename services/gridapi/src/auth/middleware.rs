//! Axum middleware for authentication and authorization.
//!
//! Layer order, outermost first:
//! 1. [`basic_auth_shim`] turns Terraform's HTTP-backend Basic credentials
//!    into a Bearer header on the state data-plane prefix only.
//! 2. [`authenticate`] runs the authenticator chain and stores the
//!    [`Principal`] in request extensions. Anonymous requests pass through.
//! 3. [`authorize`] maps the request to an operation and consults the
//!    interceptor. Anonymous callers get 401, denials 403.
use crate::api::error::{ApiError, api_unauthorized, api_validation_error};
use crate::app::AppState;
use crate::auth::authenticator::AuthRequest;
use crate::auth::interceptor::{OperationRequest, STATE_SERVICE};
use crate::auth::principal::Principal;
use async_trait::async_trait;
use axum::body::{Body, to_bytes};
use axum::extract::{FromRequestParts, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::{HeaderValue, Method};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;
use uuid::Uuid;

/// Terraform HTTP backend prefix, the only place Basic credentials count.
pub const TFSTATE_PREFIX: &str = "/tfstate/";
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Rewrite `Authorization: Basic` into a Bearer header carrying the password,
/// on [`TFSTATE_PREFIX`] paths only.
///
/// # Security
/// - The username is discarded. The password must itself be a valid token,
///   so this adds no new way to authenticate.
pub async fn basic_auth_shim(mut request: Request, next: Next) -> Response {
    if request.uri().path().starts_with(TFSTATE_PREFIX)
        && let Some(token) = basic_password(&request)
        && let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}"))
    {
        request.headers_mut().insert(AUTHORIZATION, value);
    }
    next.run(request).await
}

fn basic_password(request: &Request) -> Option<String> {
    let value = request.headers().get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        // Includes the Bearer case: an explicit Bearer header always wins.
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (_, password) = decoded.split_once(':')?;
    (!password.is_empty()).then(|| password.to_string())
}

/// Run the authenticator chain and attach the [`Principal`] on success.
///
/// # Errors
/// - A rejected credential ends the request with its [`ApiError`], 401 in
///   most cases and 409 for an identity conflict.
pub async fn authenticate(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let credentials = AuthRequest::from_headers(request.headers());
    match state.authenticator.authenticate(&credentials).await {
        Ok(Some(principal)) => {
            request.extensions_mut().insert(principal);
        }
        Ok(None) => {}
        Err(err) => return ApiError::from(err).into_response(),
    }
    next.run(request).await
}

/// Classify the request, ask the interceptor and hand the
/// [`AuthorizedOperation`](crate::auth::interceptor::AuthorizedOperation) to
/// the handler.
///
/// # Errors
/// - 401 when no principal was attached upstream.
/// - 400 when an RPC body is too large or not JSON.
/// - Otherwise whatever the interceptor decided, mapped through [`ApiError`].
pub async fn authorize(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(principal) = request.extensions().get::<Principal>().cloned() else {
        return api_unauthorized("authentication required").into_response();
    };
    let (operation, path_guid) = classify(request.method(), request.uri().path());
    let target = query_param(request.uri().query(), "principal_id");

    // RPC calls name their state in the JSON body; buffer it and put it back.
    let (request, body) = if operation.starts_with(STATE_SERVICE) {
        match buffer_json(request).await {
            Ok(buffered) => buffered,
            Err(err) => return err.into_response(),
        }
    } else {
        (request, Value::Null)
    };

    let mut op = OperationRequest::new(&operation).with_body(body);
    op.path_guid = path_guid;
    op.target = target.or_else(|| {
        op.body
            .get("principal_id")
            .and_then(Value::as_str)
            .map(str::to_string)
    });

    match state.interceptor.authorize(&principal, &op).await {
        Ok(authorized) => {
            let mut request = request;
            request.extensions_mut().insert(authorized);
            next.run(request).await
        }
        Err(err) => ApiError::from(err).into_response(),
    }
}

async fn buffer_json(request: Request) -> Result<(Request, Value), ApiError> {
    let (parts, body) = request.into_parts();
    let bytes = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|_| api_validation_error("request body too large"))?;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).map_err(|_| api_validation_error("invalid JSON body"))?
    };
    Ok((Request::from_parts(parts, Body::from(bytes)), value))
}

/// Operation name and path GUID for a request.
pub fn classify(method: &Method, path: &str) -> (String, Option<Uuid>) {
    if path.starts_with(STATE_SERVICE) {
        return (path.to_string(), None);
    }
    if let Some(rest) = path.strip_prefix(TFSTATE_PREFIX) {
        let guid = rest
            .split('/')
            .next()
            .and_then(|segment| Uuid::parse_str(segment).ok());
        let operation = match method.as_str() {
            "GET" => "tfstate.read",
            "POST" | "DELETE" => "tfstate.write",
            "LOCK" => "tfstate.lock",
            "UNLOCK" => "tfstate.unlock",
            _ => return (format!("{method} {path}"), guid),
        };
        return (operation.to_string(), guid);
    }
    let operation = match (method.as_str(), path) {
        ("POST", "/admin/cache/refresh") => "admin.cache.refresh",
        ("GET", "/admin/policies") => "admin.policies.read",
        ("POST", "/admin/policies") => "admin.policies.write",
        ("GET", "/admin/group-roles") => "admin.group_roles.list",
        ("POST", "/admin/group-roles") => "admin.group_roles.assign",
        ("DELETE", "/admin/group-roles") => "admin.group_roles.remove",
        ("POST", "/admin/roles") => "admin.roles.assign",
        ("GET", "/me/sessions") => "me.sessions.list",
        ("DELETE", p) if p.starts_with("/me/sessions/") => "me.sessions.revoke",
        ("GET", "/me/permissions") => "me.permissions",
        _ => return (format!("{method} {path}"), None),
    };
    (operation.to_string(), None)
}

fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    let url = reqwest::Url::parse(&format!("http://localhost/?{}", query?)).ok()?;
    url.query_pairs()
        .find(|(key, value)| key == name && !value.is_empty())
        .map(|(_, value)| value.into_owned())
}

/// Extractor for handlers behind [`authenticate`] that require a caller.
pub struct CurrentPrincipal(pub Principal);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentPrincipal
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .map(CurrentPrincipal)
            .ok_or_else(|| api_unauthorized("authentication required"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_data_plane_and_admin_routes() {
        let guid = Uuid::new_v4();
        let path = format!("/tfstate/{guid}");
        assert_eq!(
            classify(&Method::GET, &path),
            ("tfstate.read".to_string(), Some(guid))
        );
        let lock = Method::from_bytes(b"LOCK").expect("method");
        assert_eq!(classify(&lock, &path).0, "tfstate.lock");
        assert_eq!(
            classify(&Method::POST, "/state.v1.StateService/GetState").0,
            "/state.v1.StateService/GetState"
        );
        assert_eq!(
            classify(&Method::DELETE, "/me/sessions/abc").0,
            "me.sessions.revoke"
        );
        assert_eq!(classify(&Method::PUT, "/admin/policies").0, "PUT /admin/policies");
    }

    #[test]
    fn basic_password_only_from_basic_scheme() {
        let encoded = STANDARD.encode("terraform:token-value");
        let request = Request::builder()
            .uri("/tfstate/x")
            .header(AUTHORIZATION, format!("Basic {encoded}"))
            .body(Body::empty())
            .expect("request");
        assert_eq!(basic_password(&request).as_deref(), Some("token-value"));

        let bearer = Request::builder()
            .uri("/tfstate/x")
            .header(AUTHORIZATION, "Bearer abc")
            .body(Body::empty())
            .expect("request");
        assert!(basic_password(&bearer).is_none());
    }

    #[test]
    fn query_param_finds_named_value() {
        assert_eq!(
            query_param(Some("a=1&principal_id=u2"), "principal_id").as_deref(),
            Some("u2")
        );
        assert_eq!(
            query_param(Some("principal_id=user%3Aabc"), "principal_id").as_deref(),
            Some("user:abc")
        );
        assert!(query_param(Some("principal_id="), "principal_id").is_none());
        assert!(query_param(None, "principal_id").is_none());
    }
}
