//! meal-daemon entry point.
//!
//! Thin on purpose: load config, pick the store, build shared state, wire
//! middleware, serve. Handlers live in `routes.rs`; shared state in
//! `state.rs`.

use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use meal_config::{ConfigConsumer, ServiceSettings, StoreBackend, UnusedKeyPolicy};
use meal_daemon::{routes, state};
use meal_db::{MemStore, PgStore, Store};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env.local if present (dev convenience). Production injects env
    // vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let loaded = meal_config::load_from_env().context("load config layers")?;
    info!(config_hash = %loaded.config_hash, "config loaded");

    let report = meal_config::report_unused_keys(
        ConfigConsumer::Daemon,
        &loaded.config_json,
        UnusedKeyPolicy::Warn,
    )?;
    if !report.is_clean() {
        warn!(unused = ?report.unused_leaf_pointers, "config has keys the daemon never reads");
    }

    let settings = ServiceSettings::from_config_json(&loaded.config_json)
        .context("invalid service settings")?
        .with_env_overrides()?;

    let store = open_store(&settings).await?;
    info!(backend = store.backend_name(), "store ready");

    let shared = Arc::new(state::AppState::new(store, &settings));
    state::spawn_heartbeat(Arc::clone(&shared.fanout), settings.heartbeat);

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_layer(&settings.cors_origins));

    let addr = settings.bind_addr;
    info!("meal-daemon listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server crashed")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

async fn open_store(settings: &ServiceSettings) -> anyhow::Result<Arc<dyn Store>> {
    match settings.store_backend {
        StoreBackend::Memory => Ok(Arc::new(MemStore::new())),
        StoreBackend::Postgres => {
            let url = meal_config::secrets::resolve_database_url(settings)?;
            let pool = meal_db::connect(url.expose())
                .await
                .context("connect to database")?;
            meal_db::migrate(&pool).await.context("apply migrations")?;
            Ok(Arc::new(PgStore::new(pool)))
        }
    }
}

/// CORS: only the configured dashboard origins.
fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(tower_http::cors::Any)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "ctrl-c handler failed; running until killed");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
