//! # Inference Engine
//! Two passes per article: a cheap fast pass decides relevance, a slow pass
//! produces the `Signal`. Every backend call goes through the shared
//! `ComputeGate`, so at most `G` calls run at once no matter how many
//! engine workers exist.

pub mod gate;
pub mod strategy;

use metrics::{counter, histogram};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::calibrate::{Calibrator, TextFeatures};
use crate::config::PipelineConfig;
use crate::error::{AnalysisError, InferenceError, ValidationError};
use crate::llm::{clip, DynBackend};
use crate::metrics::PipelineStats;
use crate::retry::Backoff;
use crate::store::SignalSink;
use crate::types::{NewsItem, Signal};

pub use gate::{build_probe, ComputeGate, NoThermalProbe, NvidiaSmiProbe, ThermalPolicy, ThermalProbe};
pub use strategy::{parse_relevance, parse_signal, AShareStrategy, PromptStrategy};

/// Raw model output kept in a validation-failure log line.
const RAW_LOG_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fast,
    Slow,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Fast => "fast",
            Stage::Slow => "slow",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub enum ArticleOutcome {
    /// Fast pass judged the article irrelevant.
    Discarded,
    Completed(Signal),
    Failed { stage: Stage, error: AnalysisError },
}

pub struct InferenceEngine {
    backend: DynBackend,
    gate: Arc<ComputeGate>,
    strategy: Arc<dyn PromptStrategy>,
    temp_fast: f32,
    temp_slow: f32,
    fast_max_tokens: u32,
    slow_max_tokens: u32,
    timeout: Duration,
    max_attempts: u32,
    backoff: Backoff,
    workers: usize,
    calibrator: Option<Arc<Calibrator>>,
}

impl InferenceEngine {
    pub fn new(
        backend: DynBackend,
        gate: Arc<ComputeGate>,
        strategy: Arc<dyn PromptStrategy>,
        cfg: &PipelineConfig,
    ) -> Self {
        Self {
            backend,
            gate,
            strategy,
            temp_fast: cfg.temp_fast,
            temp_slow: cfg.temp_slow,
            fast_max_tokens: cfg.fast_max_tokens,
            slow_max_tokens: cfg.slow_max_tokens,
            timeout: cfg.inference_timeout(),
            max_attempts: cfg.inference_max_attempts.max(1),
            backoff: Backoff::from_config(cfg),
            workers: cfg.engine_workers(),
            calibrator: None,
        }
    }

    pub fn with_calibrator(mut self, calibrator: Arc<Calibrator>) -> Self {
        self.calibrator = Some(calibrator);
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn gate(&self) -> &Arc<ComputeGate> {
        &self.gate
    }

    /// One gated backend call. The permit covers exactly this call and is
    /// released before any retry backoff.
    async fn call(
        &self,
        stage: Stage,
        url: &str,
        prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, InferenceError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let res = {
                let _permit = self
                    .gate
                    .acquire()
                    .await
                    .map_err(|_| InferenceError::Network("compute gate closed".into()))?;
                counter!("finnews_inference_calls_total", "stage" => stage.as_str()).increment(1);
                let t0 = Instant::now();
                let res = match tokio::time::timeout(
                    self.timeout,
                    self.backend.infer(prompt, temperature, max_tokens),
                )
                .await
                {
                    Ok(r) => r,
                    Err(_) => Err(InferenceError::Timeout(self.timeout.as_secs())),
                };
                histogram!("finnews_inference_ms", "stage" => stage.as_str())
                    .record(t0.elapsed().as_secs_f64() * 1_000.0);
                res
            };
            match res {
                Ok(text) => return Ok(text),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.backoff.delay(attempt);
                    debug!(
                        target: "engine",
                        url, stage = stage.as_str(), attempt, error = %e,
                        backoff_ms = delay.as_millis() as u64,
                        "inference call failed, retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Fast pass (or keyword bypass), then slow pass.
    pub async fn analyze(&self, item: &NewsItem) -> ArticleOutcome {
        let relevant = if self.strategy.keyword_bypass(item) {
            info!(target: "engine", url = %item.url, title = %item.title, "keyword match; skipping fast pass");
            true
        } else {
            let prompt = self.strategy.fast_prompt(item);
            match self
                .call(Stage::Fast, &item.url, &prompt, self.temp_fast, self.fast_max_tokens)
                .await
            {
                Ok(out) => self.strategy.parse_relevance(&out),
                Err(e) => {
                    return ArticleOutcome::Failed {
                        stage: Stage::Fast,
                        error: e.into(),
                    }
                }
            }
        };
        if !relevant {
            return ArticleOutcome::Discarded;
        }

        info!(target: "engine", url = %item.url, title = %item.title, "relevant; starting deep analysis");
        let prompt = self.strategy.slow_prompt(item);
        let out = match self
            .call(Stage::Slow, &item.url, &prompt, self.temp_slow, self.slow_max_tokens)
            .await
        {
            Ok(out) => out,
            Err(e) => {
                return ArticleOutcome::Failed {
                    stage: Stage::Slow,
                    error: e.into(),
                }
            }
        };
        match self.strategy.parse_signal(&out, item) {
            Ok(signal) => ArticleOutcome::Completed(signal),
            Err(e) => {
                log_rejected_output(&item.url, &e, &out);
                ArticleOutcome::Failed {
                    stage: Stage::Slow,
                    error: e.into(),
                }
            }
        }
    }

    /// Analyse one article and record its terminal state.
    pub async fn process(&self, item: NewsItem, sink: &dyn SignalSink, stats: &PipelineStats) {
        match self.analyze(&item).await {
            ArticleOutcome::Discarded => {
                info!(target: "engine", url = %item.url, "not relevant; discarded");
                stats.record_filtered();
            }
            ArticleOutcome::Completed(signal) => match sink.append(&signal).await {
                Ok(true) => {
                    stats.record_signal();
                    self.log_signal(&signal);
                }
                Ok(false) => {
                    warn!(target: "engine", url = %signal.source_url, "signal already persisted for this URL; dropped");
                    stats.record_inference_failed();
                }
                Err(e) => {
                    error!(target: "engine", url = %signal.source_url, stage = "persist", error = %format!("{e:#}"), "signal persist failed");
                    stats.record_inference_failed();
                }
            },
            ArticleOutcome::Failed { stage, error } => {
                error!(target: "engine", url = %item.url, stage = stage.as_str(), error = %error, "analysis failed");
                match error {
                    AnalysisError::Validation(_) => stats.record_validation_failed(),
                    AnalysisError::Inference(_) => stats.record_inference_failed(),
                }
            }
        }
    }

    fn log_signal(&self, s: &Signal) {
        let features = TextFeatures::extract(s);
        match &self.calibrator {
            Some(c) => info!(
                target: "engine",
                url = %s.source_url, score = s.score, certainty = s.certainty,
                horizon = s.time_horizon.as_str(), stocks = ?s.related_stocks,
                calibrated = c.calibrated_score(s), tradable = c.is_tradable(s), features = ?features,
                "signal generated"
            ),
            None => info!(
                target: "engine",
                url = %s.source_url, score = s.score, certainty = s.certainty,
                horizon = s.time_horizon.as_str(), stocks = ?s.related_stocks, features = ?features,
                "signal generated"
            ),
        }
    }

    /// Worker pool over the raw-article queue. Returns once `rx` is closed
    /// and every in-flight article has reached a terminal state.
    pub async fn run(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<NewsItem>,
        sink: Arc<dyn SignalSink>,
        stats: Arc<PipelineStats>,
    ) {
        info!(
            target: "engine",
            backend = self.backend.name(), workers = self.workers,
            gate = self.gate.capacity(), "inference engine started"
        );
        let mut tasks = JoinSet::new();
        while let Some(item) = rx.recv().await {
            while tasks.len() >= self.workers {
                reap(tasks.join_next().await);
            }
            let me = self.clone();
            let sink = sink.clone();
            let stats = stats.clone();
            tasks.spawn(async move { me.process(item, sink.as_ref(), &stats).await });
        }
        while let Some(res) = tasks.join_next().await {
            reap(Some(res));
        }
        info!(target: "engine", "inference engine drained");
    }
}

fn reap(res: Option<Result<(), tokio::task::JoinError>>) {
    if let Some(Err(e)) = res {
        error!(target: "engine", error = %e, "analysis task panicked");
    }
}

fn log_rejected_output(url: &str, err: &ValidationError, raw: &str) {
    warn!(target: "engine", url, error = %err, raw = %clip(raw, RAW_LOG_CHARS), "slow-pass output rejected");
}
