// tests/common/mod.rs
//
// Scripted collaborators shared by the integration tests: feeds, content
// extractor, inference backend and thermal probe. No network, no GPU.
#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use finnews_pipeline::config::PipelineConfig;
use finnews_pipeline::dedup::DedupStore;
use finnews_pipeline::engine::{AShareStrategy, ComputeGate, InferenceEngine, NoThermalProbe, ThermalPolicy, ThermalProbe};
use finnews_pipeline::error::{FetchError, InferenceError};
use finnews_pipeline::fetch::{ContentExtractor, Fetcher};
use finnews_pipeline::ingest::FeedProvider;
use finnews_pipeline::llm::InferenceBackend;
use finnews_pipeline::monitor::SourceMonitor;
use finnews_pipeline::retry::Backoff;
use finnews_pipeline::store::MemoryStore;
use finnews_pipeline::types::Candidate;
use finnews_pipeline::{Pipeline, PipelineStats};

pub const SCENARIO_SIGNAL: &str = r#"<think>rate cut helps banks</think>
{"reasoning":"Central bank easing lowers funding costs for large banks","score":8,"certainty":9,"related_stocks":["601398"],"time_horizon":"Medium"}"#;

/// Defaults tuned for tests: no keyword bypass, no backoff delay, short grace.
pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        bypass_keywords: vec![],
        backoff_base_ms: 0,
        backoff_max_ms: 0,
        backoff_jitter_ms: 0,
        shutdown_grace_secs: 10,
        fetch_timeout_secs: 5,
        inference_timeout_secs: 5,
        ..PipelineConfig::default()
    }
}

/// Tracks how many calls are running right now and the peak.
#[derive(Default)]
pub struct InFlight {
    now: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlight {
    pub fn enter(&self) {
        let n = self.now.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(n, Ordering::SeqCst);
    }

    pub fn leave(&self) {
        self.now.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Feed returning the same entries on every scan.
pub struct VecFeed {
    pub name: &'static str,
    pub urls: Vec<String>,
}

impl VecFeed {
    pub fn new(name: &'static str, urls: &[&str]) -> Self {
        Self {
            name,
            urls: urls.iter().map(|u| u.to_string()).collect(),
        }
    }
}

#[async_trait]
impl FeedProvider for VecFeed {
    async fn fetch_entries(&self) -> Result<Vec<Candidate>> {
        Ok(self
            .urls
            .iter()
            .map(|u| Candidate::new(u.clone(), "", self.name))
            .collect())
    }

    fn name(&self) -> &str {
        self.name
    }
}

/// Per-URL scripted responses; once a script runs out the last entry repeats.
/// URLs without a script get `default`.
pub struct ScriptedExtractor {
    scripts: Mutex<HashMap<String, Vec<Result<String, FetchError>>>>,
    default: Option<String>,
    calls: Mutex<HashMap<String, u32>>,
    pub delay: Duration,
    pub in_flight: InFlight,
}

impl ScriptedExtractor {
    /// Every URL extracts to `content`.
    pub fn always(content: &str) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            default: Some(content.to_string()),
            calls: Mutex::new(HashMap::new()),
            delay: Duration::ZERO,
            in_flight: InFlight::default(),
        }
    }

    /// Every URL fails.
    pub fn failing() -> Self {
        Self {
            default: None,
            ..Self::always("")
        }
    }

    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay = d;
        self
    }

    pub fn script(self, url: &str, steps: Vec<Result<String, FetchError>>) -> Self {
        self.scripts.lock().insert(url.to_string(), steps);
        self
    }

    pub fn calls(&self, url: &str) -> u32 {
        self.calls.lock().get(url).copied().unwrap_or(0)
    }
}

fn clone_fetch(r: &Result<String, FetchError>) -> Result<String, FetchError> {
    match r {
        Ok(s) => Ok(s.clone()),
        Err(FetchError::Timeout(s)) => Err(FetchError::Timeout(*s)),
        Err(FetchError::RequestTimeout) => Err(FetchError::RequestTimeout),
        Err(FetchError::Status(s)) => Err(FetchError::Status(*s)),
        Err(FetchError::Network(m)) => Err(FetchError::Network(m.clone())),
        Err(FetchError::Empty) => Err(FetchError::Empty),
    }
}

#[async_trait]
impl ContentExtractor for ScriptedExtractor {
    async fn extract(&self, url: &str) -> Result<String, FetchError> {
        let n = {
            let mut calls = self.calls.lock();
            let c = calls.entry(url.to_string()).or_insert(0);
            *c += 1;
            *c as usize
        };
        self.in_flight.enter();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let res = {
            let scripts = self.scripts.lock();
            match scripts.get(url) {
                Some(steps) if !steps.is_empty() => clone_fetch(&steps[(n - 1).min(steps.len() - 1)]),
                _ => match &self.default {
                    Some(c) => Ok(c.clone()),
                    None => Err(FetchError::Status(503)),
                },
            }
        };
        self.in_flight.leave();
        res
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

pub fn is_slow_prompt(prompt: &str) -> bool {
    prompt.contains("[Role]")
}

type Responder = dyn Fn(&str) -> Result<String, InferenceError> + Send + Sync;

/// Backend answering through a closure over the prompt.
pub struct ScriptedBackend {
    respond: Box<Responder>,
    pub delay: Duration,
    pub in_flight: InFlight,
    fast_calls: AtomicUsize,
    slow_calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new(respond: impl Fn(&str) -> Result<String, InferenceError> + Send + Sync + 'static) -> Self {
        Self {
            respond: Box::new(respond),
            delay: Duration::ZERO,
            in_flight: InFlight::default(),
            fast_calls: AtomicUsize::new(0),
            slow_calls: AtomicUsize::new(0),
        }
    }

    /// Fixed fast-pass answer, fixed slow-pass answer.
    pub fn answers(fast: &'static str, slow: &'static str) -> Self {
        Self::new(move |p| Ok(if is_slow_prompt(p) { slow } else { fast }.to_string()))
    }

    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay = d;
        self
    }

    pub fn fast_calls(&self) -> usize {
        self.fast_calls.load(Ordering::SeqCst)
    }

    pub fn slow_calls(&self) -> usize {
        self.slow_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceBackend for ScriptedBackend {
    async fn infer(&self, prompt: &str, _temperature: f32, _max_tokens: u32) -> Result<String, InferenceError> {
        if is_slow_prompt(prompt) {
            self.slow_calls.fetch_add(1, Ordering::SeqCst);
        } else {
            self.fast_calls.fetch_add(1, Ordering::SeqCst);
        }
        self.in_flight.enter();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let out = (self.respond)(prompt);
        self.in_flight.leave();
        out
    }

    async fn probe(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Returns readings in order; the last one repeats.
pub struct ScriptedProbe {
    readings: Mutex<Vec<Option<f32>>>,
    reads: AtomicUsize,
}

impl ScriptedProbe {
    pub fn new(readings: Vec<Option<f32>>) -> Self {
        Self {
            readings: Mutex::new(readings),
            reads: AtomicUsize::new(0),
        }
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ThermalProbe for ScriptedProbe {
    async fn temperature_c(&self) -> Option<f32> {
        let n = self.reads.fetch_add(1, Ordering::SeqCst);
        let r = self.readings.lock();
        r.get(n).or_else(|| r.last()).copied().flatten()
    }
}

pub fn fast_policy() -> ThermalPolicy {
    ThermalPolicy {
        limit: 80.0,
        resume: 65.0,
        check_interval: Duration::from_millis(5),
    }
}

pub fn engine_for(cfg: &PipelineConfig, backend: Arc<ScriptedBackend>) -> InferenceEngine {
    let gate = Arc::new(ComputeGate::new(cfg.gpu_concurrency, Arc::new(NoThermalProbe), fast_policy()));
    InferenceEngine::new(
        backend,
        gate,
        Arc::new(AShareStrategy::new(cfg.bypass_keywords.clone(), cfg.max_content_chars)),
        cfg,
    )
    .with_backoff(Backoff::none())
}

pub struct Harness {
    pub pipeline: Pipeline,
    pub store: Arc<MemoryStore>,
    pub dedup: Arc<DedupStore>,
    pub stats: Arc<PipelineStats>,
}

/// Full pipeline over in-memory sinks.
pub fn harness(
    cfg: &PipelineConfig,
    feeds: Vec<Box<dyn FeedProvider>>,
    extractor: Arc<ScriptedExtractor>,
    backend: Arc<ScriptedBackend>,
) -> Harness {
    let dedup = Arc::new(DedupStore::in_memory());
    let store = Arc::new(MemoryStore::new());
    let monitor = SourceMonitor::new(feeds, dedup.clone());
    let fetcher = Arc::new(
        Fetcher::new(extractor, cfg)
            .with_backoff(Backoff::none())
            .with_dedup(dedup.clone()),
    );
    let engine = Arc::new(engine_for(cfg, backend));
    let pipeline = Pipeline::new(cfg, monitor, fetcher, engine, store.clone(), store.clone(), dedup.clone());
    let stats = pipeline.stats();
    Harness {
        pipeline,
        store,
        dedup,
        stats,
    }
}

/// Resolves once `discovered` items were seen and all reached a terminal
/// state (or after a generous deadline).
pub async fn settled(stats: Arc<PipelineStats>, discovered: u64) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let s = stats.snapshot();
        if s.discovered >= discovered && s.in_flight() == 0 {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
