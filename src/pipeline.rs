//! # Orchestrator
//! Wires monitor → fetcher → engine with two bounded queues and runs them
//! until a stop signal, then drains stage by stage:
//! stop scanning, close the new-item queue, let the fetcher finish, close the
//! raw-article queue, let the engine finish.

use anyhow::{Context, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::calibrate::Calibrator;
use crate::config::PipelineConfig;
use crate::dedup::DedupStore;
use crate::engine::{AShareStrategy, ComputeGate, InferenceEngine};
use crate::fetch::{Fetcher, ReaderExtractor};
use crate::ingest::is_fetchable_link;
use crate::ingest::providers::HttpFeedProvider;
use crate::llm::build_backend;
use crate::metrics::{PipelineStats, StatsSnapshot};
use crate::monitor::SourceMonitor;
use crate::store::{JsonlRawStore, JsonlSignalStore, RawSink, SignalSink};
use crate::types::Candidate;

/// Source label for URLs handed in directly instead of discovered by a feed.
pub const MANUAL_SOURCE: &str = "manual";

pub struct Pipeline {
    monitor: SourceMonitor,
    fetcher: Arc<Fetcher>,
    engine: Arc<InferenceEngine>,
    raw: Arc<dyn RawSink>,
    signals: Arc<dyn SignalSink>,
    dedup: Arc<DedupStore>,
    stats: Arc<PipelineStats>,
    queue_capacity: usize,
    scan_interval: Duration,
    shutdown_grace: Duration,
}

impl Pipeline {
    pub fn new(
        cfg: &PipelineConfig,
        monitor: SourceMonitor,
        fetcher: Arc<Fetcher>,
        engine: Arc<InferenceEngine>,
        raw: Arc<dyn RawSink>,
        signals: Arc<dyn SignalSink>,
        dedup: Arc<DedupStore>,
    ) -> Self {
        Self {
            monitor,
            fetcher,
            engine,
            raw,
            signals,
            dedup,
            stats: Arc::new(PipelineStats::new()),
            queue_capacity: cfg.queue_capacity.max(1),
            scan_interval: cfg.scan_interval(),
            shutdown_grace: cfg.shutdown_grace(),
        }
    }

    /// Production wiring: HTTP feeds, reader extraction, JSONL stores and the
    /// configured inference backend.
    pub async fn from_config(cfg: &PipelineConfig) -> Result<Self> {
        let dedup = Arc::new(match &cfg.dedup_path {
            Some(p) => DedupStore::open(p)?,
            None => DedupStore::in_memory(),
        });

        let feeds = HttpFeedProvider::from_sources(&cfg.feeds, cfg.feed_timeout())?;
        let monitor = SourceMonitor::new(feeds, dedup.clone());

        let extractor = Arc::new(ReaderExtractor::new(&cfg.reader_base, cfg.reader_api_key.clone())?);
        let fetcher = Arc::new(Fetcher::new(extractor, cfg).with_dedup(dedup.clone()));

        let backend = build_backend(cfg)?;
        match backend.probe().await {
            Ok(()) => info!(target: "pipeline", backend = backend.name(), model = %cfg.model, "inference backend reachable"),
            Err(e) if cfg.require_backend => {
                return Err(e).context("inference backend check failed");
            }
            Err(e) => warn!(target: "pipeline", backend = backend.name(), error = %format!("{e:#}"), "inference backend not reachable; continuing"),
        }

        let gate = Arc::new(ComputeGate::from_config(cfg));
        let strategy = Arc::new(AShareStrategy::new(cfg.bypass_keywords.clone(), cfg.max_content_chars));
        let mut engine = InferenceEngine::new(backend, gate, strategy, cfg);
        if let Some(p) = &cfg.calibration_path {
            let calibrator = Calibrator::open(p);
            info!(target: "pipeline", path = %p.display(), records = calibrator.len(), "calibration history loaded");
            engine = engine.with_calibrator(Arc::new(calibrator));
        }

        let raw = Arc::new(JsonlRawStore::open(cfg.raw_dir.clone()).await?);
        let signals = Arc::new(JsonlSignalStore::open(cfg.signal_dir.clone()).await?);

        Ok(Self::new(cfg, monitor, fetcher, Arc::new(engine), raw, signals, dedup))
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        self.stats.clone()
    }

    pub fn dedup(&self) -> Arc<DedupStore> {
        self.dedup.clone()
    }

    /// Spawn fetcher and engine dispatchers; returns the new-item sender.
    fn spawn_workers(&self) -> (mpsc::Sender<Candidate>, Vec<(&'static str, JoinHandle<()>)>) {
        let (cand_tx, cand_rx) = mpsc::channel::<Candidate>(self.queue_capacity);
        let (item_tx, item_rx) = mpsc::channel(self.queue_capacity);

        let fetch = tokio::spawn(
            self.fetcher
                .clone()
                .run(cand_rx, self.raw.clone(), item_tx, self.stats.clone()),
        );
        let engine = tokio::spawn(
            self.engine
                .clone()
                .run(item_rx, self.signals.clone(), self.stats.clone()),
        );
        (cand_tx, vec![("fetch", fetch), ("engine", engine)])
    }

    /// Continuous mode. Runs until `shutdown` resolves, then drains.
    pub async fn run<F>(self, shutdown: F) -> StatsSnapshot
    where
        F: Future<Output = ()> + Send,
    {
        let (cand_tx, mut stages) = self.spawn_workers();
        let (stop_tx, stop_rx) = watch::channel(false);

        let Pipeline {
            monitor,
            stats,
            scan_interval,
            shutdown_grace,
            ..
        } = self;

        let mut monitor_task = tokio::spawn(monitor.run(cand_tx, scan_interval, stats.clone(), stop_rx));
        tokio::select! {
            _ = shutdown => {
                info!(target: "pipeline", "stop requested; draining");
                let _ = stop_tx.send(true);
                stages.insert(0, ("monitor", monitor_task));
            }
            res = &mut monitor_task => {
                if let Err(e) = res {
                    error!(target: "pipeline", error = %e, "monitor task failed");
                }
                warn!(target: "pipeline", "monitor exited; draining");
            }
        }

        drain(stages, shutdown_grace, &stats).await;
        stats.snapshot()
    }

    /// Batch mode: analyse exactly `urls`, then drain and return.
    pub async fn run_urls<I, S>(self, urls: I) -> StatsSnapshot
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let (cand_tx, stages) = self.spawn_workers();
        for u in urls {
            let u = u.as_ref().trim();
            if !is_fetchable_link(u) {
                warn!(target: "pipeline", url = u, "not an http(s) link; skipped");
                continue;
            }
            if !self.dedup.insert_if_new(u) {
                debug!(target: "pipeline", url = u, "already seen; skipped");
                continue;
            }
            self.stats.record_discovered(1);
            if cand_tx.send(Candidate::new(u, "", MANUAL_SOURCE)).await.is_err() {
                error!(target: "pipeline", url = u, "fetch queue closed; batch aborted");
                break;
            }
        }
        drop(cand_tx);

        drain(stages, self.shutdown_grace, &self.stats).await;
        self.stats.snapshot()
    }
}

/// Await stages in order; abort whatever is left once `grace` expires.
async fn drain(mut stages: Vec<(&'static str, JoinHandle<()>)>, grace: Duration, stats: &PipelineStats) {
    let joined = tokio::time::timeout(grace, async {
        for (name, handle) in stages.iter_mut() {
            if let Err(e) = handle.await {
                error!(target: "pipeline", stage = *name, error = %e, "stage task failed");
            }
            debug!(target: "pipeline", stage = *name, "stage drained");
        }
    })
    .await;

    match joined {
        Ok(()) => info!(target: "pipeline", stats = ?stats.snapshot(), "pipeline drained"),
        Err(_) => {
            for (_, handle) in &stages {
                handle.abort();
            }
            let snap = stats.snapshot();
            error!(
                target: "pipeline",
                grace_secs = grace.as_secs(), abandoned = snap.in_flight(),
                "shutdown grace expired; aborting remaining work"
            );
        }
    }
}
