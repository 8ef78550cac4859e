//! Shared fixtures for the router-level integration tests.
#![allow(dead_code)]

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::extract::Request;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE, SET_COOKIE};
use axum::http::{Method, StatusCode};
use axum::response::Response;
use axum::routing::any;
use axum::{Extension, Json};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use grid_authz::{Labels, PolicyTuple};
use gridapi::app::{AppState, build_router};
use gridapi::auth::interceptor::AuthorizedOperation;
use gridapi::auth::principal::Principal;
use gridapi::auth::rbac::policy_store::self_service_policy;
use gridapi::config::{GridConfig, OAuthClientConfig, OidcMode};
use gridapi::model::{ServiceAccount, StateRecord, User};
use gridapi::oidc::SigningKey;
use gridapi::oidc::pkce::s256;
use gridapi::store::memory::InMemoryStore;
use gridapi::store::{IdentityStore, PolicyRowStore, StateCatalog};
use jsonwebtoken::{Algorithm, Header, encode};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use tower::ServiceExt;
use uuid::Uuid;

pub const ISSUER: &str = "http://grid.test";
pub const CLI_CLIENT: &str = "grid-cli";
pub const WEB_CLIENT: &str = "grid-web";
pub const WEB_SECRET: &str = "web-client-secret";
pub const REDIRECT_URI: &str = "http://127.0.0.1:9999/callback";
pub const PASSWORD: &str = "correct horse battery";
pub const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";

const GRANTS: [&str; 3] = [
    "authorization_code",
    "refresh_token",
    "urn:ietf:params:oauth:grant-type:device_code",
];

/// One RSA key for the whole test binary; generation is slow.
pub fn signing_key() -> Arc<SigningKey> {
    static KEY: OnceLock<Arc<SigningKey>> = OnceLock::new();
    KEY.get_or_init(|| Arc::new(SigningKey::generate().expect("signing key")))
        .clone()
}

pub fn hash(secret: &str) -> String {
    bcrypt::hash(secret, 4).expect("bcrypt")
}

pub fn internal_config() -> GridConfig {
    let mut config = GridConfig::for_tests(ISSUER);
    config.clients = vec![
        OAuthClientConfig {
            client_id: CLI_CLIENT.to_string(),
            secret_hash: None,
            redirect_uris: vec![REDIRECT_URI.to_string()],
            grant_types: GRANTS.iter().map(|grant| grant.to_string()).collect(),
        },
        OAuthClientConfig {
            client_id: WEB_CLIENT.to_string(),
            secret_hash: Some(hash(WEB_SECRET)),
            redirect_uris: vec![REDIRECT_URI.to_string()],
            grant_types: GRANTS.iter().map(|grant| grant.to_string()).collect(),
        },
    ];
    config
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<InMemoryStore>,
}

impl TestApp {
    /// Build against `store`, which must already hold the policies the test
    /// needs (they are loaded once at startup).
    pub async fn start(config: GridConfig, store: Arc<InMemoryStore>) -> Self {
        let key = (config.oidc.mode == OidcMode::Internal).then(signing_key);
        let state = AppState::build(config, store.clone(), key)
            .await
            .expect("app state");
        let router = build_router(state.clone(), downstream());
        Self {
            router,
            state,
            store,
        }
    }

    pub async fn internal(store: Arc<InMemoryStore>) -> Self {
        Self::start(internal_config(), store).await
    }

    pub async fn call(&self, request: Request) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router response")
    }

    /// Authorization-code login with PKCE; returns the token response.
    pub async fn login(&self, email: &str, scope: &str) -> Value {
        let (code, _) = self.authorization_code(CLI_CLIENT, email, scope).await;
        let response = self
            .call(form(
                "/token",
                &[
                    ("grant_type", "authorization_code"),
                    ("client_id", CLI_CLIENT),
                    ("code", code.as_str()),
                    ("redirect_uri", REDIRECT_URI),
                    ("code_verifier", VERIFIER),
                ],
            ))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        read_json(response).await
    }

    /// Run `/authorize` and `/login`; returns the code and the session cookie.
    pub async fn authorization_code(
        &self,
        client_id: &str,
        email: &str,
        scope: &str,
    ) -> (String, String) {
        let uri = format!(
            "/authorize?response_type=code&client_id={client_id}&redirect_uri={}&scope={}&state=st8&nonce=n0nce&code_challenge={}&code_challenge_method=S256",
            encode_component(REDIRECT_URI),
            encode_component(scope),
            s256(VERIFIER),
        );
        let response = self.call(json_request(Method::GET, &uri, None, None)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let pending = read_json(response).await;
        let request_id = pending["request_id"].as_str().expect("request_id");

        let response = self
            .call(json_request(
                Method::POST,
                "/login",
                None,
                Some(json!({ "request_id": request_id, "email": email, "password": PASSWORD })),
            ))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let cookie = response
            .headers()
            .get(SET_COOKIE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(';').next())
            .and_then(|pair| pair.split_once('='))
            .map(|(_, value)| value.to_string())
            .expect("session cookie");
        let body = read_json(response).await;
        let redirect = reqwest::Url::parse(body["redirect_to"].as_str().expect("redirect"))
            .expect("redirect url");
        let query: Vec<(String, String)> = redirect.query_pairs().into_owned().collect();
        assert!(query.contains(&("state".to_string(), "st8".to_string())));
        let code = query
            .into_iter()
            .find(|(key, _)| key == "code")
            .map(|(_, value)| value)
            .expect("code");
        (code, cookie)
    }
}

/// Stand-in for the Terraform-state service: echoes what the middleware
/// handed it.
pub fn downstream() -> Router {
    async fn echo(
        Extension(principal): Extension<Principal>,
        Extension(authorized): Extension<AuthorizedOperation>,
    ) -> Json<Value> {
        Json(json!({
            "principal_id": principal.principal_id,
            "operation": authorized.operation,
            "action": authorized.action.as_str(),
        }))
    }
    Router::new()
        .route("/tfstate/*rest", any(echo))
        .route("/state.v1.StateService/*method", any(echo))
}

pub async fn seed_user(store: &InMemoryStore, email: &str) -> User {
    let name = email.split('@').next().unwrap_or(email);
    store
        .create_user(User::new(email, name).with_password_hash(hash(PASSWORD)))
        .await
        .expect("create user")
}

pub async fn seed_service_account(store: &InMemoryStore, client_id: &str, secret: &str) -> ServiceAccount {
    store
        .create_service_account(ServiceAccount::new(client_id, client_id, hash(secret)))
        .await
        .expect("create service account")
}

/// Seed `tuples` next to the self-service rules a fresh deployment starts
/// with. A non-empty table is not seeded again at startup.
pub async fn seed_policies(store: &InMemoryStore, tuples: &[PolicyTuple]) {
    let rows: Vec<_> = self_service_policy()
        .iter()
        .chain(tuples)
        .map(PolicyTuple::to_row)
        .collect();
    store
        .apply_policy_batch(&rows, &[])
        .await
        .expect("seed policies");
}

pub async fn seed_state(store: &InMemoryStore, logic_id: &str, labels: Value) -> Uuid {
    let labels: Labels = serde_json::from_value(labels).expect("labels");
    let guid = Uuid::new_v4();
    store
        .upsert_state(StateRecord {
            guid,
            logic_id: logic_id.to_string(),
            labels,
        })
        .await
        .expect("seed state");
    guid
}

pub fn json_request(method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Request {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
    }
    match body {
        Some(body) => builder
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request"),
        None => builder.body(Body::empty()).expect("request"),
    }
}

pub fn basic_request(method: Method, uri: &str, user: &str, password: &str) -> Request {
    let encoded = STANDARD.encode(format!("{user}:{password}"));
    Request::builder()
        .method(method)
        .uri(uri)
        .header(AUTHORIZATION, format!("Basic {encoded}"))
        .body(Body::empty())
        .expect("request")
}

pub fn form(uri: &str, pairs: &[(&str, &str)]) -> Request {
    let body = pairs
        .iter()
        .map(|(key, value)| format!("{}={}", encode_component(key), encode_component(value)))
        .collect::<Vec<_>>()
        .join("&");
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body))
        .expect("request")
}

pub fn encode_component(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            other => encoded.push_str(&format!("%{other:02X}")),
        }
    }
    encoded
}

pub async fn read_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes).expect("json body")
}

/// Minimal external identity provider serving discovery and the shared
/// signing key's JWKS. Returns its issuer URL.
pub async fn spawn_external_idp() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr: SocketAddr = listener.local_addr().expect("addr");
    let issuer = format!("http://{addr}");
    let jwks = signing_key().jwks();
    let discovery_issuer = issuer.clone();
    let app = Router::new()
        .route(
            "/.well-known/openid-configuration",
            axum::routing::get(move || {
                let issuer = discovery_issuer.clone();
                async move {
                    Json(json!({ "issuer": issuer, "jwks_uri": format!("{issuer}/jwks") }))
                }
            }),
        )
        .route(
            "/jwks",
            axum::routing::get(move || {
                let jwks = jwks.clone();
                async move { Json(jwks) }
            }),
        );
    tokio::spawn(async move {
        let _ = axum::serve(listener, app.into_make_service()).await;
    });
    issuer
}

pub fn external_config(issuer: &str) -> GridConfig {
    let mut config = GridConfig::for_tests(issuer);
    config.oidc.mode = OidcMode::External;
    config
}

/// Token as an external IdP would mint it for `subject`.
pub fn external_token(issuer: &str, subject: &str, email: Option<&str>, groups: &[&str]) -> String {
    let key = signing_key();
    let now = Utc::now().timestamp();
    let mut claims = json!({
        "iss": issuer,
        "aud": gridapi::config::DEFAULT_RESOURCE_AUDIENCE,
        "sub": subject,
        "jti": Uuid::new_v4().to_string(),
        "groups": groups,
        "iat": now,
        "exp": now + 300,
    });
    if let Some(email) = email {
        claims["email"] = json!(email);
    }
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(key.kid().to_string());
    encode(&header, &claims, key.encoding_key()).expect("external token")
}
