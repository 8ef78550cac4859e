//! Grid API HTTP service entry point.
//!
//! # Purpose
//! Wires configuration, storage, the signing key and the HTTP router, starts
//! the group→role cache refresher and the metrics listener, then serves until
//! Ctrl-C.
use anyhow::Context;
use axum::Router;
use axum::http::StatusCode;
use gridapi::app::{AppState, build_router};
use gridapi::config::{GridConfig, OidcMode, StorageBackend};
use gridapi::observability;
use gridapi::oidc::SigningKey;
use gridapi::store::CredentialStore;
use gridapi::store::memory::InMemoryStore;
use gridapi::store::postgres::PostgresStore;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = GridConfig::from_env_or_yaml().context("grid api config")?;
    run_with_shutdown(config, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}

async fn run_with_shutdown<F>(config: GridConfig, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let metrics_handle = observability::init_observability("gridapi");
    let store = build_store(&config).await?;
    let signing_key = match config.oidc.mode {
        OidcMode::Internal => Some(Arc::new(
            SigningKey::load_or_generate(config.signing_key_path.as_deref())
                .context("load signing key")?,
        )),
        OidcMode::External => None,
    };
    let state = AppState::build(config.clone(), store, signing_key).await?;

    let metrics_task = tokio::spawn(observability::serve_metrics(
        metrics_handle,
        config.metrics_bind,
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let refresher = state
        .group_cache
        .spawn_refresher(config.group_cache_interval, shutdown_rx);

    let app = build_router(state, state_service_placeholder());
    let addr = config.bind_addr;
    tracing::info!(%addr, "grid api listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;

    let _ = shutdown_tx.send(true);
    let _ = refresher.await;
    metrics_task.abort();
    let _ = metrics_task.await;
    tracing::info!("grid api stopped");
    Ok(())
}

async fn build_store(config: &GridConfig) -> anyhow::Result<Arc<dyn CredentialStore>> {
    let store: Arc<dyn CredentialStore> = match config.storage {
        StorageBackend::Memory => Arc::new(InMemoryStore::new()),
        StorageBackend::Postgres => {
            let pg = config
                .postgres
                .as_ref()
                .context("postgres configuration missing")?;
            Arc::new(PostgresStore::connect(pg).await?)
        }
    };
    Ok(store)
}

/// The Terraform-state service is deployed separately; authorized requests
/// that reach this process without it are answered with 501.
fn state_service_placeholder() -> Router {
    Router::new().fallback(|| async { StatusCode::NOT_IMPLEMENTED })
}
