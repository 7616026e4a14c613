//! Species Risk Grid — Binary Entrypoint
//! Loads settings, starts the first occurrence refresh in the background and
//! serves the JSON API plus `/metrics`.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use species_risk_grid::api::{create_router, AppState};
use species_risk_grid::config::settings::Settings;
use species_risk_grid::engine::Engine;
use species_risk_grid::ingest::providers::gbif::GbifSource;
use species_risk_grid::metrics::Metrics;

/// Compact logs by default; JSON lines when RISK_GRID_LOG_JSON=1.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("species_risk_grid=info,ingest=info,engine=info,warn"));

    let json = std::env::var("RISK_GRID_LOG_JSON")
        .ok()
        .is_some_and(|v| v == "1");

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let settings = Settings::load_default().context("loading settings")?;
    let metrics = Metrics::init(settings.species.len())?;

    let source = GbifSource::new(settings.fetch.endpoint.clone(), settings.fetch.timeout())
        .context("building occurrence client")?;
    let engine = Arc::new(Engine::new(
        settings.species.clone(),
        Arc::new(source),
        settings.fetch.clone(),
        settings.grid,
    ));

    // First load runs in the background; routes answer 503 until it lands.
    let warmup = Arc::clone(&engine);
    tokio::spawn(async move {
        let report = warmup.refresh_now().await;
        for entry in report.species.iter().filter(|e| e.error.is_some()) {
            tracing::warn!(species = %entry.species_id, error = ?entry.error, "initial fetch failed");
        }
    });

    let app = create_router(AppState::new(Arc::clone(&engine))).merge(metrics.router());

    let listener = tokio::net::TcpListener::bind(&settings.server.bind)
        .await
        .with_context(|| format!("binding {}", settings.server.bind))?;
    tracing::info!(bind = %settings.server.bind, species = settings.species.len(), "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            engine.shutdown();
        })
        .await
        .context("serving http")?;
    Ok(())
}
