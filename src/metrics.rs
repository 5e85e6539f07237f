//! # Telemetry
//! Pipeline counters (atomic snapshot + Prometheus series) and the optional
//! `/health`, `/metrics`, `/stats` router.

use anyhow::{Context, Result};
use axum::{routing::get, Json, Router};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("finnews_scan_runs_total", "Completed monitor scans.");
        describe_counter!("finnews_feed_errors_total", "Feed fetch/parse errors.");
        describe_counter!("finnews_discovered_total", "New URLs pushed to the fetch queue.");
        describe_counter!("finnews_fetch_attempts_total", "Content extraction attempts.");
        describe_counter!("finnews_fetched_total", "Articles fetched and persisted.");
        describe_counter!(
            "finnews_fetch_failures_total",
            "Articles dropped after exhausting fetch attempts."
        );
        describe_counter!("finnews_inference_calls_total", "Gated inference calls.");
        describe_counter!("finnews_filtered_total", "Articles discarded by the fast pass.");
        describe_counter!("finnews_signals_total", "Signals persisted.");
        describe_counter!(
            "finnews_validation_failures_total",
            "Slow-pass outputs rejected by schema validation."
        );
        describe_counter!(
            "finnews_inference_failures_total",
            "Articles failed by a transport/timeout inference error."
        );
        describe_histogram!("finnews_fetch_ms", "Content extraction time in milliseconds.");
        describe_histogram!("finnews_inference_ms", "Inference call time in milliseconds.");
        describe_histogram!("finnews_feed_parse_ms", "Feed parse time in milliseconds.");
        describe_gauge!("finnews_thermal_wait", "1 while the compute gate waits on heat.");
    });
}

/// Run-wide counters. Every increment is mirrored to the Prometheus recorder.
#[derive(Debug, Default)]
pub struct PipelineStats {
    discovered: AtomicU64,
    fetched: AtomicU64,
    fetch_failed: AtomicU64,
    filtered: AtomicU64,
    signals: AtomicU64,
    inference_failed: AtomicU64,
    validation_failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub discovered: u64,
    pub fetched: u64,
    pub fetch_failed: u64,
    pub filtered: u64,
    pub signals: u64,
    pub inference_failed: u64,
    pub validation_failed: u64,
}

impl StatsSnapshot {
    /// Items that entered the pipeline but have not reached a terminal state.
    pub fn in_flight(&self) -> u64 {
        let fetch_done = self.fetched + self.fetch_failed;
        let infer_done = self.filtered + self.signals + self.inference_failed + self.validation_failed;
        self.discovered.saturating_sub(fetch_done) + self.fetched.saturating_sub(infer_done)
    }
}

impl PipelineStats {
    pub fn new() -> Self {
        ensure_metrics_described();
        Self::default()
    }

    pub fn record_discovered(&self, n: u64) {
        self.discovered.fetch_add(n, Ordering::Relaxed);
        counter!("finnews_discovered_total").increment(n);
    }

    pub fn record_fetched(&self) {
        self.fetched.fetch_add(1, Ordering::Relaxed);
        counter!("finnews_fetched_total").increment(1);
    }

    pub fn record_fetch_failed(&self) {
        self.fetch_failed.fetch_add(1, Ordering::Relaxed);
        counter!("finnews_fetch_failures_total").increment(1);
    }

    pub fn record_filtered(&self) {
        self.filtered.fetch_add(1, Ordering::Relaxed);
        counter!("finnews_filtered_total").increment(1);
    }

    pub fn record_signal(&self) {
        self.signals.fetch_add(1, Ordering::Relaxed);
        counter!("finnews_signals_total").increment(1);
    }

    pub fn record_inference_failed(&self) {
        self.inference_failed.fetch_add(1, Ordering::Relaxed);
        counter!("finnews_inference_failures_total").increment(1);
    }

    pub fn record_validation_failed(&self) {
        self.validation_failed.fetch_add(1, Ordering::Relaxed);
        counter!("finnews_validation_failures_total").increment(1);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            discovered: self.discovered.load(Ordering::Relaxed),
            fetched: self.fetched.load(Ordering::Relaxed),
            fetch_failed: self.fetch_failed.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            signals: self.signals.load(Ordering::Relaxed),
            inference_failed: self.inference_failed.load(Ordering::Relaxed),
            validation_failed: self.validation_failed.load(Ordering::Relaxed),
        }
    }
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder.
    pub fn init() -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        ensure_metrics_described();
        Ok(Self { handle })
    }

    pub fn router(&self, stats: Arc<PipelineStats>) -> Router {
        router(Some(self.handle.clone()), stats)
    }
}

/// `/health`, `/stats` and (with a handle) `/metrics`.
pub fn router(handle: Option<PrometheusHandle>, stats: Arc<PipelineStats>) -> Router {
    let mut r = Router::new().route("/health", get(|| async { "ok" })).route(
        "/stats",
        get(move || {
            let s = stats.clone();
            async move { Json(s.snapshot()) }
        }),
    );
    if let Some(h) = handle {
        r = r.route(
            "/metrics",
            get(move || {
                let h = h.clone();
                async move { h.render() }
            }),
        );
    }
    r
}
