//! finnews — Binary Entrypoint
//! Loads configuration, starts the optional telemetry server and runs the
//! pipeline until Ctrl-C. Passing URLs as arguments analyses just those and
//! exits.

use anyhow::{Context, Result};
use finnews_pipeline::metrics::{self, Metrics};
use finnews_pipeline::{Pipeline, PipelineConfig};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_LOG_FILTER: &str = "finnews_pipeline=info,finnews=info,warn";

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c; stopping");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();

    let cfg = PipelineConfig::load_default().context("loading pipeline config")?;
    init_tracing(cfg.log_json);
    info!(
        provider = ?cfg.provider, model = %cfg.model,
        fetch_concurrency = cfg.fetch_concurrency, gpu_concurrency = cfg.gpu_concurrency,
        feeds = cfg.feeds.len(), "finnews starting"
    );

    let pipeline = Pipeline::from_config(&cfg).await?;

    if let Some(addr) = cfg.metrics_addr {
        let router = match Metrics::init() {
            Ok(m) => m.router(pipeline.stats()),
            Err(e) => {
                warn!(error = %format!("{e:#}"), "prometheus recorder unavailable; serving /health and /stats only");
                metrics::router(None, pipeline.stats())
            }
        };
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding telemetry listener on {addr}"))?;
        info!(%addr, "telemetry listening");
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                error!(error = %e, "telemetry server stopped");
            }
        });
    }

    let urls: Vec<String> = std::env::args().skip(1).collect();
    let summary = if urls.is_empty() {
        pipeline.run(shutdown_signal()).await
    } else {
        info!(count = urls.len(), "batch mode");
        pipeline.run_urls(urls).await
    };
    info!(
        discovered = summary.discovered, fetched = summary.fetched,
        fetch_failed = summary.fetch_failed, filtered = summary.filtered,
        signals = summary.signals, inference_failed = summary.inference_failed,
        validation_failed = summary.validation_failed, "finnews stopped"
    );
    Ok(())
}
