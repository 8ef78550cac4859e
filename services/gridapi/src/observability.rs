//! Logging and metrics for the Grid API.
//!
//! Log lines go to stdout through `tracing-subscriber`; `GRID_LOG_FORMAT=json`
//! switches to one JSON object per line. Audit events use the `audit` target
//! so they can be filtered with `RUST_LOG=audit=info`.
//!
//! Both the subscriber and the Prometheus recorder are process-global and
//! installed at most once.
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub const AUTHN_OUTCOMES: &str = "grid_authn_outcomes_total";
pub const AUTHZ_DECISIONS: &str = "grid_authz_decisions_total";
pub const GROUP_CACHE_REFRESHES: &str = "grid_group_cache_refreshes_total";
pub const GROUP_CACHE_GENERATION: &str = "grid_group_cache_generation";
pub const TOKENS_ISSUED: &str = "grid_tokens_issued_total";

const LOG_FORMAT_ENV: &str = "GRID_LOG_FORMAT";

static RECORDER: OnceLock<PrometheusHandle> = OnceLock::new();
static SUBSCRIBER: OnceLock<()> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    fn from_env_value(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(value) if value.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }
}

pub fn init_observability(service_name: &str) -> PrometheusHandle {
    SUBSCRIBER.get_or_init(|| {
        let format = LogFormat::from_env_value(std::env::var(LOG_FORMAT_ENV).ok().as_deref());
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let registry = tracing_subscriber::registry().with(filter);
        let _ = match format {
            LogFormat::Json => registry
                .with(tracing_subscriber::fmt::layer().json().with_target(true))
                .try_init(),
            LogFormat::Text => registry
                .with(tracing_subscriber::fmt::layer().with_target(true))
                .try_init(),
        };
        tracing::info!(service = service_name, ?format, "logging initialized");
    });

    RECORDER
        .get_or_init(|| {
            let handle = match PrometheusBuilder::new().install_recorder() {
                Ok(handle) => handle,
                Err(err) => {
                    // A recorder is already global; keep a detached handle so
                    // the scrape endpoint still renders.
                    tracing::warn!(error = %err, "metrics recorder already installed");
                    PrometheusBuilder::new().build_recorder().handle()
                }
            };
            describe_metrics();
            handle
        })
        .clone()
}

fn describe_metrics() {
    describe_counter!(AUTHN_OUTCOMES, "Authentication attempts by method and outcome");
    describe_counter!(AUTHZ_DECISIONS, "Authorization decisions by outcome and source");
    describe_counter!(GROUP_CACHE_REFRESHES, "Group to role cache refreshes by outcome");
    describe_gauge!(GROUP_CACHE_GENERATION, "Generation of the live group to role snapshot");
    describe_counter!(TOKENS_ISSUED, "Access tokens issued by grant");
}

pub async fn serve_metrics(handle: PrometheusHandle, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    serve_metrics_with_listener(handle, listener, std::future::pending()).await
}

async fn serve_metrics_with_listener<F>(
    handle: PrometheusHandle,
    listener: tokio::net::TcpListener,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = axum::Router::new().route(
        "/metrics",
        axum::routing::get(move || async move { handle.render() }),
    );
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await
}
