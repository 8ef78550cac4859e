//! HTTP surface of the embedded authorization server.
//!
//! Token, revocation and introspection endpoints take form bodies and accept
//! client credentials either as form fields or as `client_secret_basic`.
//! Token responses are never cacheable.
use crate::api::types::UserInfoResponse;
use crate::app::AppState;
use crate::auth::authenticator::SESSION_COOKIE;
use crate::auth::middleware::CurrentPrincipal;
use crate::oidc::clients::{
    GRANT_AUTHORIZATION_CODE, GRANT_CLIENT_CREDENTIALS, GRANT_DEVICE_CODE, GRANT_REFRESH_TOKEN,
};
use crate::oidc::error::OidcError;
use crate::oidc::server::{AuthorizationServer, AuthorizeParams};
use axum::extract::{Query, State};
use axum::http::header::{AUTHORIZATION, CACHE_CONTROL, PRAGMA, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Form, Json};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Default, Deserialize)]
pub struct TokenForm {
    pub grant_type: String,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_verifier: Option<String>,
    pub refresh_token: Option<String>,
    pub device_code: Option<String>,
    pub scope: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ClientForm {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub scope: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TokenOnlyForm {
    pub token: String,
    #[serde(default)]
    pub token_type_hint: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub request_id: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub redirect_to: String,
}

#[derive(Debug, Deserialize)]
pub struct DeviceDecision {
    pub user_code: String,
    #[serde(default = "default_approve")]
    pub approve: bool,
}

fn default_approve() -> bool {
    true
}

fn server(state: &AppState) -> Result<Arc<AuthorizationServer>, OidcError> {
    state
        .auth_server
        .clone()
        .ok_or_else(|| OidcError::InvalidRequest("authorization server disabled".to_string()))
}

pub(crate) async fn discovery(State(state): State<AppState>) -> Result<Response, OidcError> {
    Ok(Json(server(&state)?.discovery()).into_response())
}

pub(crate) async fn jwks(State(state): State<AppState>) -> Result<Response, OidcError> {
    Ok(Json(server(&state)?.jwks()).into_response())
}

pub(crate) async fn authorize(
    State(state): State<AppState>,
    Query(params): Query<AuthorizeParams>,
) -> Result<Response, OidcError> {
    let pending = server(&state)?.authorize(&params)?;
    Ok(Json(pending).into_response())
}

pub(crate) async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Response, OidcError> {
    let server = server(&state)?;
    let completion = server
        .complete_login(&body.request_id, &body.email, &body.password)
        .await?;
    let max_age = server.session_duration().as_secs();
    let mut cookie = format!(
        "{SESSION_COOKIE}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}",
        completion.session_cookie
    );
    if state.config.secure_cookies {
        cookie.push_str("; Secure");
    }
    let mut response = Json(LoginResponse {
        redirect_to: completion.redirect_to,
    })
    .into_response();
    let cookie = HeaderValue::from_str(&cookie)
        .map_err(|_| OidcError::InvalidRequest("invalid session cookie".to_string()))?;
    response.headers_mut().insert(SET_COOKIE, cookie);
    Ok(response)
}

pub(crate) async fn token(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<TokenForm>,
) -> Result<Response, OidcError> {
    let server = server(&state)?;
    let (client_id, client_secret) =
        client_credentials(&headers, form.client_id.clone(), form.client_secret.clone())?;
    let secret = client_secret.as_deref();
    let response = match form.grant_type.as_str() {
        GRANT_AUTHORIZATION_CODE => {
            let code = required(form.code.as_deref(), "code")?;
            server
                .exchange_code(
                    &client_id,
                    secret,
                    code,
                    form.redirect_uri.as_deref(),
                    form.code_verifier.as_deref(),
                )
                .await?
        }
        GRANT_REFRESH_TOKEN => {
            let refresh_token = required(form.refresh_token.as_deref(), "refresh_token")?;
            server.refresh(&client_id, secret, refresh_token).await?
        }
        GRANT_CLIENT_CREDENTIALS => {
            let secret = required(secret, "client_secret")?;
            server
                .client_credentials(&client_id, secret, form.scope.as_deref())
                .await?
        }
        GRANT_DEVICE_CODE => {
            let device_code = required(form.device_code.as_deref(), "device_code")?;
            server.poll_device(&client_id, secret, device_code).await?
        }
        other => return Err(OidcError::UnsupportedGrantType(other.to_string())),
    };
    Ok(no_store(Json(response).into_response()))
}

pub(crate) async fn device_authorization(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<ClientForm>,
) -> Result<Response, OidcError> {
    let (client_id, client_secret) = client_credentials(&headers, form.client_id, form.client_secret)?;
    let response = server(&state)?.device_authorization(
        &client_id,
        client_secret.as_deref(),
        form.scope.as_deref(),
    )?;
    Ok(no_store(Json(response).into_response()))
}

pub(crate) async fn device_verify(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Json(body): Json<DeviceDecision>,
) -> Result<Response, OidcError> {
    server(&state)?.decide_device(&body.user_code, &principal, body.approve)?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub(crate) async fn revoke(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<TokenOnlyForm>,
) -> Result<Response, OidcError> {
    let server = server(&state)?;
    let client_id = match client_credentials(&headers, form.client_id, form.client_secret) {
        Ok((client_id, client_secret)) => {
            server.authenticate_client(&client_id, client_secret.as_deref())?;
            Some(client_id)
        }
        Err(_) => None,
    };
    tracing::debug!(hint = ?form.token_type_hint, "token revocation requested");
    server.revoke_token(&form.token, client_id.as_deref()).await?;
    Ok(StatusCode::OK.into_response())
}

pub(crate) async fn introspect(
    State(state): State<AppState>,
    Form(form): Form<TokenOnlyForm>,
) -> Result<Response, OidcError> {
    let response = server(&state)?.introspect(&form.token).await?;
    Ok(no_store(Json(response).into_response()))
}

pub(crate) async fn userinfo(CurrentPrincipal(principal): CurrentPrincipal) -> Json<UserInfoResponse> {
    Json(UserInfoResponse {
        sub: principal.subject,
        principal_id: principal.principal_id,
        email: principal.email,
        name: principal.name,
        roles: principal.roles,
        groups: principal.groups,
    })
}

fn required<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str, OidcError> {
    value
        .filter(|value| !value.is_empty())
        .ok_or_else(|| OidcError::InvalidRequest(format!("{name} is required")))
}

/// Client ID and secret from `client_secret_basic`, falling back to the form.
fn client_credentials(
    headers: &HeaderMap,
    form_id: Option<String>,
    form_secret: Option<String>,
) -> Result<(String, Option<String>), OidcError> {
    if let Some((id, secret)) = basic_credentials(headers) {
        return Ok((id, Some(secret)));
    }
    let client_id = form_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| OidcError::InvalidClient("client_id is required".to_string()))?;
    Ok((client_id, form_secret.filter(|secret| !secret.is_empty())))
}

fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = String::from_utf8(STANDARD.decode(encoded.trim()).ok()?).ok()?;
    let (id, secret) = decoded.split_once(':')?;
    Some((id.to_string(), secret.to_string()))
}

fn no_store(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    response
}
