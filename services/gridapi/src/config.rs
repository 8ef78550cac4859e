//! Service configuration.
//!
//! Values come from `GRID_*` environment variables; a YAML file named by
//! `GRID_CONFIG` can override any of them and is the only way to register
//! OAuth clients. Invalid combinations fail at startup.
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_ACCESS_TOKEN_TTL: Duration = Duration::from_secs(120 * 60);
pub const DEFAULT_SESSION_DURATION: Duration = Duration::from_secs(12 * 60 * 60);
pub const DEFAULT_TOKEN_BYTES: usize = 32;
pub const DEFAULT_GROUP_CACHE_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_RESOURCE_AUDIENCE: &str = "gridapi";

#[derive(Debug, thiserror::Error)]
#[error("configuration error: {0}")]
pub struct ConfigError(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OidcMode {
    /// Tokens come from the embedded authorization server.
    Internal,
    /// Tokens come from an external identity provider; users are provisioned
    /// on first sight.
    External,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostgresConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

fn default_max_connections() -> u32 {
    10
}

fn default_timeout_ms() -> u64 {
    5_000
}

/// OAuth client allowed to use the embedded authorization server.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct OAuthClientConfig {
    pub client_id: String,
    /// bcrypt hash; absent for public clients, which must use PKCE.
    #[serde(default)]
    pub secret_hash: Option<String>,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    #[serde(default = "default_grant_types")]
    pub grant_types: Vec<String>,
}

fn default_grant_types() -> Vec<String> {
    vec![
        "authorization_code".to_string(),
        "refresh_token".to_string(),
        "urn:ietf:params:oauth:grant-type:device_code".to_string(),
    ]
}

#[derive(Debug, Clone)]
pub struct OidcConfig {
    pub mode: OidcMode,
    /// Our own public URL in internal mode, the IdP issuer in external mode.
    pub issuer: String,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub audience: String,
    pub groups_claim: String,
    pub clock_skew_seconds: u64,
    pub jwks_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct GridConfig {
    pub bind_addr: SocketAddr,
    pub metrics_bind: SocketAddr,
    pub storage: StorageBackend,
    pub postgres: Option<PostgresConfig>,
    pub oidc: OidcConfig,
    pub signing_key_path: Option<PathBuf>,
    pub access_token_ttl: Duration,
    pub session_duration: Duration,
    pub token_bytes: usize,
    pub group_cache_interval: Duration,
    pub clients: Vec<OAuthClientConfig>,
    pub secure_cookies: bool,
    /// Write the default self-service rules when the policy table is empty.
    pub seed_self_service_policy: bool,
}

#[derive(Debug, Default, Deserialize)]
struct GridConfigOverride {
    bind_addr: Option<String>,
    metrics_bind: Option<String>,
    storage: Option<StorageBackend>,
    postgres: Option<PostgresConfig>,
    oidc_mode: Option<OidcMode>,
    oidc_issuer: Option<String>,
    oidc_client_id: Option<String>,
    oidc_client_secret: Option<String>,
    oidc_audience: Option<String>,
    oidc_groups_claim: Option<String>,
    signing_key_path: Option<PathBuf>,
    access_token_ttl_minutes: Option<u64>,
    session_duration_hours: Option<u64>,
    token_bytes: Option<usize>,
    group_cache_interval_seconds: Option<u64>,
    #[serde(default)]
    clients: Vec<OAuthClientConfig>,
    secure_cookies: Option<bool>,
    seed_self_service_policy: Option<bool>,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env_opt(key) {
        Some(value) => value.parse().with_context(|| format!("parse {key}")),
        None => Ok(default),
    }
}

impl GridConfig {
    pub fn from_env() -> Result<Self> {
        let bind_addr = env_or("GRID_BIND", "0.0.0.0:8080")
            .parse()
            .with_context(|| "parse GRID_BIND")?;
        let metrics_bind = env_or("GRID_METRICS_BIND", "0.0.0.0:9090")
            .parse()
            .with_context(|| "parse GRID_METRICS_BIND")?;
        let storage = match env_or("GRID_STORAGE", "memory").as_str() {
            "memory" => StorageBackend::Memory,
            "postgres" => StorageBackend::Postgres,
            other => return Err(ConfigError(format!("unknown GRID_STORAGE {other}")).into()),
        };
        let postgres = match env_opt("GRID_DATABASE_URL") {
            Some(url) => Some(PostgresConfig {
                url,
                max_connections: env_parse("GRID_PG_MAX_CONNECTIONS", default_max_connections())?,
                connect_timeout_ms: env_parse("GRID_PG_CONNECT_TIMEOUT_MS", default_timeout_ms())?,
                acquire_timeout_ms: env_parse("GRID_PG_ACQUIRE_TIMEOUT_MS", default_timeout_ms())?,
            }),
            None => None,
        };
        let mode = match env_or("GRID_OIDC_MODE", "internal").as_str() {
            "internal" => OidcMode::Internal,
            "external" => OidcMode::External,
            other => return Err(ConfigError(format!("unknown GRID_OIDC_MODE {other}")).into()),
        };
        let oidc = OidcConfig {
            mode,
            issuer: env_or("GRID_OIDC_ISSUER", "http://localhost:8080"),
            client_id: env_opt("GRID_OIDC_CLIENT_ID"),
            client_secret: env_opt("GRID_OIDC_CLIENT_SECRET"),
            audience: env_or("GRID_OIDC_AUDIENCE", DEFAULT_RESOURCE_AUDIENCE),
            groups_claim: env_or("GRID_OIDC_GROUPS_CLAIM", "groups"),
            clock_skew_seconds: env_parse("GRID_OIDC_CLOCK_SKEW_SECONDS", 60)?,
            jwks_ttl: Duration::from_secs(env_parse("GRID_OIDC_JWKS_TTL_SECONDS", 3600)?),
        };
        Ok(Self {
            bind_addr,
            metrics_bind,
            storage,
            postgres,
            oidc,
            signing_key_path: env_opt("GRID_SIGNING_KEY_PATH").map(PathBuf::from),
            access_token_ttl: Duration::from_secs(
                env_parse("GRID_ACCESS_TOKEN_TTL_MINUTES", 120u64)? * 60,
            ),
            session_duration: Duration::from_secs(
                env_parse("GRID_SESSION_DURATION_HOURS", 12u64)? * 3600,
            ),
            token_bytes: env_parse("GRID_TOKEN_BYTES", DEFAULT_TOKEN_BYTES)?,
            group_cache_interval: Duration::from_secs(env_parse(
                "GRID_GROUP_CACHE_INTERVAL_SECONDS",
                DEFAULT_GROUP_CACHE_INTERVAL.as_secs(),
            )?),
            clients: Vec::new(),
            secure_cookies: env_parse("GRID_SECURE_COOKIES", true)?,
            seed_self_service_policy: env_parse("GRID_SEED_SELF_SERVICE_POLICY", true)?,
        })
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("GRID_CONFIG") {
            let contents =
                fs::read_to_string(&path).with_context(|| format!("read GRID_CONFIG: {path}"))?;
            config.apply_yaml(&contents)?;
        }
        config.validate()?;
        Ok(config)
    }

    fn apply_yaml(&mut self, contents: &str) -> Result<()> {
        let overrides: GridConfigOverride =
            serde_yaml::from_str(contents).with_context(|| "parse grid config yaml")?;
        if let Some(value) = overrides.bind_addr {
            self.bind_addr = value.parse().with_context(|| "parse bind_addr")?;
        }
        if let Some(value) = overrides.metrics_bind {
            self.metrics_bind = value.parse().with_context(|| "parse metrics_bind")?;
        }
        if let Some(value) = overrides.storage {
            self.storage = value;
        }
        if overrides.postgres.is_some() {
            self.postgres = overrides.postgres;
        }
        if let Some(value) = overrides.oidc_mode {
            self.oidc.mode = value;
        }
        if let Some(value) = overrides.oidc_issuer {
            self.oidc.issuer = value;
        }
        if overrides.oidc_client_id.is_some() {
            self.oidc.client_id = overrides.oidc_client_id;
        }
        if overrides.oidc_client_secret.is_some() {
            self.oidc.client_secret = overrides.oidc_client_secret;
        }
        if let Some(value) = overrides.oidc_audience {
            self.oidc.audience = value;
        }
        if let Some(value) = overrides.oidc_groups_claim {
            self.oidc.groups_claim = value;
        }
        if overrides.signing_key_path.is_some() {
            self.signing_key_path = overrides.signing_key_path;
        }
        if let Some(minutes) = overrides.access_token_ttl_minutes {
            self.access_token_ttl = Duration::from_secs(minutes * 60);
        }
        if let Some(hours) = overrides.session_duration_hours {
            self.session_duration = Duration::from_secs(hours * 3600);
        }
        if let Some(value) = overrides.token_bytes {
            self.token_bytes = value;
        }
        if let Some(seconds) = overrides.group_cache_interval_seconds {
            self.group_cache_interval = Duration::from_secs(seconds);
        }
        if !overrides.clients.is_empty() {
            self.clients = overrides.clients;
        }
        if let Some(value) = overrides.secure_cookies {
            self.secure_cookies = value;
        }
        if let Some(value) = overrides.seed_self_service_policy {
            self.seed_self_service_policy = value;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.oidc.issuer.trim().is_empty() {
            return Err(ConfigError("oidc issuer must be set".to_string()));
        }
        if self.oidc.audience.trim().is_empty() {
            return Err(ConfigError("oidc audience must be set".to_string()));
        }
        if self.storage == StorageBackend::Postgres && self.postgres.is_none() {
            return Err(ConfigError("postgres configuration missing".to_string()));
        }
        if self.token_bytes < 16 {
            return Err(ConfigError("token byte length must be at least 16".to_string()));
        }
        if self.group_cache_interval.is_zero() {
            return Err(ConfigError("group cache interval must be positive".to_string()));
        }
        if self.access_token_ttl.is_zero() || self.session_duration.is_zero() {
            return Err(ConfigError("token lifetimes must be positive".to_string()));
        }
        for client in &self.clients {
            if client.client_id.is_empty() {
                return Err(ConfigError("oauth client without client_id".to_string()));
            }
        }
        Ok(())
    }

    /// Baseline used by tests and local tooling: memory store, internal
    /// issuer, ephemeral signing key.
    pub fn for_tests(issuer: &str) -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            metrics_bind: SocketAddr::from(([127, 0, 0, 1], 0)),
            storage: StorageBackend::Memory,
            postgres: None,
            oidc: OidcConfig {
                mode: OidcMode::Internal,
                issuer: issuer.to_string(),
                client_id: None,
                client_secret: None,
                audience: DEFAULT_RESOURCE_AUDIENCE.to_string(),
                groups_claim: "groups".to_string(),
                clock_skew_seconds: 60,
                jwks_ttl: Duration::from_secs(3600),
            },
            signing_key_path: None,
            access_token_ttl: DEFAULT_ACCESS_TOKEN_TTL,
            session_duration: DEFAULT_SESSION_DURATION,
            token_bytes: DEFAULT_TOKEN_BYTES,
            group_cache_interval: DEFAULT_GROUP_CACHE_INTERVAL,
            clients: Vec::new(),
            secure_cookies: false,
            seed_self_service_policy: true,
        }
    }
}
