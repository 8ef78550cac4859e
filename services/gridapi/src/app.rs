//! Grid API HTTP application wiring.
//!
//! # Purpose
//! Builds the shared [`AppState`] and composes the Axum router: public OIDC
//! endpoints, authenticated-only endpoints, and the protected surface (admin,
//! self-service and the downstream Terraform-state service) behind both
//! authentication and authorization.
//!
//! # Notes
//! Requests that match no explicit route fall through to the downstream
//! router and therefore still pass the authorization middleware. Unknown
//! operations have no route rule and are denied.
use crate::api;
use crate::auth::authenticator::{Authenticator, MultiAuthenticator};
use crate::auth::bearer::BearerAuthenticator;
use crate::auth::group_cache::GroupRoleCache;
use crate::auth::interceptor::AuthorizationInterceptor;
use crate::auth::middleware;
use crate::auth::rbac::PolicyTupleStore;
use crate::auth::rbac::policy_store::self_service_policy;
use crate::auth::resolver::PrincipalResolver;
use crate::auth::session::SessionAuthenticator;
use crate::auth::token_validator::TokenValidator;
use crate::config::{GridConfig, OidcMode};
use crate::oidc::{self, AuthorizationServer, SigningKey};
use crate::store::CredentialStore;
use anyhow::Context;
use axum::Router;
use axum::routing::{delete, get, post};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GridConfig>,
    pub store: Arc<dyn CredentialStore>,
    pub policies: Arc<PolicyTupleStore>,
    pub group_cache: Arc<GroupRoleCache>,
    pub resolver: Arc<PrincipalResolver>,
    pub authenticator: Arc<MultiAuthenticator>,
    pub interceptor: Arc<AuthorizationInterceptor>,
    /// Present in internal OIDC mode only.
    pub auth_server: Option<Arc<AuthorizationServer>>,
}

impl AppState {
    /// Load policies and the first group→role snapshot, then wire the
    /// authenticator chain. Internal mode requires `signing_key`.
    pub async fn build(
        config: GridConfig,
        store: Arc<dyn CredentialStore>,
        signing_key: Option<Arc<SigningKey>>,
    ) -> anyhow::Result<Self> {
        let group_cache = Arc::new(
            GroupRoleCache::load(store.clone())
                .await
                .context("load group role cache")?,
        );
        let policies = Arc::new(
            PolicyTupleStore::load(store.clone())
                .await
                .context("load policies")?,
        );
        if config.seed_self_service_policy
            && policies
                .seed_if_empty(&self_service_policy())
                .await
                .context("seed self-service policy")?
        {
            tracing::info!("empty policy table seeded with self-service rules");
        }
        let resolver = Arc::new(PrincipalResolver::new(
            store.clone(),
            group_cache.clone(),
            config.oidc.mode,
        ));

        let (auth_server, validator) = match config.oidc.mode {
            OidcMode::Internal => {
                let key = signing_key.context("internal OIDC mode needs a signing key")?;
                let server = Arc::new(AuthorizationServer::new(&config, store.clone(), key));
                let validator = server.validator();
                (Some(server), validator)
            }
            OidcMode::External => {
                let validator = TokenValidator::new(
                    &config.oidc.issuer,
                    &config.oidc.audience,
                    &config.oidc.groups_claim,
                    config.oidc.jwks_ttl,
                    config.oidc.clock_skew_seconds,
                );
                let validator = match config.oidc.client_id.as_deref() {
                    Some(client_id) => validator.with_additional_audience(client_id),
                    None => validator,
                };
                (None, validator)
            }
        };

        let bearer: Arc<dyn Authenticator> = Arc::new(BearerAuthenticator::new(
            validator,
            store.clone(),
            resolver.clone(),
        ));
        let session: Arc<dyn Authenticator> =
            Arc::new(SessionAuthenticator::new(store.clone(), resolver.clone()));
        let authenticator = Arc::new(MultiAuthenticator::new(vec![session, bearer]));
        let interceptor = Arc::new(AuthorizationInterceptor::new(
            policies.engine(),
            store.clone(),
        ));

        tracing::info!(
            mode = ?config.oidc.mode,
            backend = store.backend_name(),
            policies = policies.engine().policy_count(),
            "grid api state ready"
        );
        Ok(Self {
            config: Arc::new(config),
            store,
            policies,
            group_cache,
            resolver,
            authenticator,
            interceptor,
            auth_server,
        })
    }
}

/// Compose the service router. `downstream` serves the Terraform-state
/// surface (`/tfstate/...` and the state RPC service) and receives only
/// authorized requests, with the [`crate::auth::principal::Principal`] and
/// [`crate::auth::interceptor::AuthorizedOperation`] in request extensions.
pub fn build_router(state: AppState, downstream: Router) -> Router {
    let trace_layer =
        TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri().path(),
                version = ?request.version()
            )
        });

    let public = Router::new()
        .route("/system/info", get(api::system::system_info))
        .route("/system/health", get(api::system::system_health));

    let public = if state.auth_server.is_some() {
        public
            .route(
                "/.well-known/openid-configuration",
                get(oidc::routes::discovery),
            )
            .route("/.well-known/jwks.json", get(oidc::routes::jwks))
            .route("/authorize", get(oidc::routes::authorize))
            .route("/login", post(oidc::routes::login))
            .route("/token", post(oidc::routes::token))
            .route(
                "/device_authorization",
                post(oidc::routes::device_authorization),
            )
            .route("/revoke", post(oidc::routes::revoke))
            .route("/introspect", post(oidc::routes::introspect))
    } else {
        public
    };

    let mut authenticated = Router::new().route("/userinfo", get(oidc::routes::userinfo));
    if state.auth_server.is_some() {
        authenticated = authenticated.route("/device/verify", post(oidc::routes::device_verify));
    }
    let authenticated = authenticated.layer(axum::middleware::from_fn_with_state(
        state.clone(),
        middleware::authenticate,
    ));

    let protected = Router::new()
        .route("/admin/cache/refresh", post(api::admin::refresh_cache))
        .route(
            "/admin/policies",
            get(api::admin::list_policies).post(api::admin::write_policies),
        )
        .route(
            "/admin/group-roles",
            get(api::admin::list_group_roles)
                .post(api::admin::assign_group_role)
                .delete(api::admin::remove_group_role),
        )
        .route("/admin/roles", post(api::admin::assign_role))
        .route("/me/sessions", get(api::me::list_sessions))
        .route("/me/sessions/:session_id", delete(api::me::revoke_session))
        .route("/me/permissions", get(api::me::permissions))
        .fallback_service(downstream)
        // Last layer added runs first: authenticate, then authorize.
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::authorize,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::authenticate,
        ));

    Router::new()
        .merge(public)
        .merge(authenticated)
        .merge(protected)
        .layer(axum::middleware::from_fn(middleware::basic_auth_shim))
        .layer(trace_layer)
        .with_state(state)
}
