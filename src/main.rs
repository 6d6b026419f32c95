//! Concall Analyser — Binary Entrypoint
//! Boots the Axum HTTP server, wiring the ingestion pipeline, the broadcast
//! hub, and the analytics middleware around a shared in-process store.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use concall_analyser::analytics::AnalyticsService;
use concall_analyser::api::{self, AppState};
use concall_analyser::config::Config;
use concall_analyser::enrich::GeminiClient;
use concall_analyser::feed::{self, BseFeed};
use concall_analyser::hub;
use concall_analyser::pipeline::Orchestrator;
use concall_analyser::retriever::HttpRetriever;
use concall_analyser::store::MemoryStore;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("concall_analyser=info,warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when the variables come from the
    // container environment.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = Config::from_env().context("loading configuration")?;
    info!(port = cfg.port, model = %cfg.gemini_model, "configuration loaded");

    // Shared hardened transport for the feed and attachment downloads.
    let http = feed::build_http_client().context("building HTTP client")?;

    let store = Arc::new(MemoryStore::new());
    let (hub, _hub_task) = hub::spawn();
    info!("broadcast hub started");

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(BseFeed::new(http.clone(), cfg.feed_base_url.clone())),
        Arc::new(HttpRetriever::new(http, cfg.attachment_base_url.clone())),
        Arc::new(GeminiClient::new(
            cfg.gemini_base_url.clone(),
            cfg.api_key.clone(),
            cfg.gemini_model.clone(),
        )),
        store.clone(),
        cfg.dest_dir.clone(),
    ));

    let state = AppState {
        orchestrator,
        store: store.clone(),
        analytics: AnalyticsService::new(store, hub.clone()),
        hub,
        pipeline_deadline: cfg.pipeline_deadline,
    };
    let router = api::create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "server is running");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // In-flight requests have drained; the store goes down with the process.
    info!("server stopped, releasing store");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM so axum can drain in-flight work.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
