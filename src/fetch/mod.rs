//! # Fetcher
//! Pulls candidates off the new-item queue, extracts full content with
//! retry/backoff, persists the raw article and forwards it to inference.
//!
//! The `F` permit is held for one extraction attempt only, never across a
//! backoff sleep, so a retrying URL does not block others.

pub mod extractor;

use metrics::{counter, histogram};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::{FetchExhaustedPolicy, PipelineConfig};
use crate::dedup::DedupStore;
use crate::error::FetchError;
use crate::metrics::PipelineStats;
use crate::retry::Backoff;
use crate::store::RawSink;
use crate::types::{Candidate, NewsItem};

pub use extractor::{ContentExtractor, ReaderExtractor};

#[derive(Debug)]
pub enum FetchOutcome {
    Fetched(NewsItem),
    Exhausted { attempts: u32, last_error: FetchError },
}

pub struct Fetcher {
    extractor: Arc<dyn ContentExtractor>,
    permits: Arc<Semaphore>,
    concurrency: usize,
    /// Spawned candidates, including those asleep in backoff.
    max_in_flight: usize,
    max_attempts: u32,
    backoff: Backoff,
    timeout: Duration,
    policy: FetchExhaustedPolicy,
    dedup: Option<Arc<DedupStore>>,
}

impl Fetcher {
    pub fn new(extractor: Arc<dyn ContentExtractor>, cfg: &PipelineConfig) -> Self {
        let concurrency = cfg.fetch_concurrency.max(1);
        Self {
            extractor,
            permits: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            max_in_flight: cfg.queue_capacity.max(concurrency),
            max_attempts: cfg.fetch_max_attempts.max(1),
            backoff: Backoff::from_config(cfg),
            timeout: cfg.fetch_timeout(),
            policy: cfg.on_fetch_exhausted,
            dedup: None,
        }
    }

    /// Dedup store to release exhausted URLs into (`retry_next_scan` policy).
    pub fn with_dedup(mut self, dedup: Arc<DedupStore>) -> Self {
        self.dedup = Some(dedup);
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Extract content for one candidate, retrying up to `max_attempts`.
    pub async fn fetch(&self, c: &Candidate) -> FetchOutcome {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let res = self.attempt(&c.url).await;
            match res {
                Ok(content) => {
                    let title = resolve_title(&c.title, &content);
                    return FetchOutcome::Fetched(NewsItem {
                        url: c.url.clone(),
                        title,
                        content,
                        source: c.source.clone(),
                        fetched_at: chrono::Utc::now(),
                    });
                }
                Err(e) if attempt < self.max_attempts => {
                    let delay = self.backoff.delay(attempt);
                    debug!(
                        target: "fetch",
                        url = %c.url, attempt, error = %e,
                        backoff_ms = delay.as_millis() as u64,
                        "fetch attempt failed, retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return FetchOutcome::Exhausted {
                        attempts: attempt,
                        last_error: e,
                    };
                }
            }
        }
    }

    async fn attempt(&self, url: &str) -> Result<String, FetchError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| FetchError::Network("fetch gate closed".into()))?;
        counter!("finnews_fetch_attempts_total").increment(1);
        let t0 = Instant::now();
        let res = match tokio::time::timeout(self.timeout, self.extractor.extract(url)).await {
            Ok(r) => r,
            Err(_) => Err(FetchError::Timeout(self.timeout.as_secs())),
        };
        histogram!("finnews_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        match res {
            Ok(body) if body.trim().is_empty() => Err(FetchError::Empty),
            other => other,
        }
    }

    /// Fetch, persist, forward. Each failure is contained to this candidate.
    pub async fn process(
        &self,
        c: Candidate,
        raw: &dyn RawSink,
        tx: &mpsc::Sender<NewsItem>,
        stats: &PipelineStats,
    ) {
        info!(target: "fetch", url = %c.url, source = %c.source, "downloading article");
        match self.fetch(&c).await {
            FetchOutcome::Fetched(item) => match raw.append(&item).await {
                Ok(true) => {
                    stats.record_fetched();
                    if let Err(e) = tx.send(item).await {
                        error!(target: "fetch", url = %e.0.url, "raw-article queue closed; article persisted but not analysed");
                    }
                }
                Ok(false) => {
                    warn!(target: "fetch", url = %item.url, "article already persisted this run; not forwarded");
                    stats.record_fetch_failed();
                }
                Err(e) => {
                    error!(target: "fetch", url = %item.url, stage = "persist", error = %format!("{e:#}"), "raw persist failed; article not forwarded");
                    stats.record_fetch_failed();
                }
            },
            FetchOutcome::Exhausted { attempts, last_error } => {
                error!(
                    target: "fetch",
                    url = %c.url, stage = "fetch", attempts, error = %last_error,
                    "fetch attempts exhausted; article dropped"
                );
                stats.record_fetch_failed();
                if self.policy == FetchExhaustedPolicy::RetryNextScan {
                    if let Some(d) = &self.dedup {
                        d.release(&c.url);
                    }
                }
            }
        }
    }

    /// Worker pool. At most `F` extraction attempts run at once; up to
    /// `queue_capacity` candidates may be spawned so that one sleeping in
    /// backoff leaves its permit to the next. Returns once `rx` is closed and
    /// every spawned candidate has finished; `tx` is dropped on return so the
    /// engine drains next.
    pub async fn run(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<Candidate>,
        raw: Arc<dyn RawSink>,
        tx: mpsc::Sender<NewsItem>,
        stats: Arc<PipelineStats>,
    ) {
        info!(
            target: "fetch",
            concurrency = self.concurrency, max_in_flight = self.max_in_flight, max_attempts = self.max_attempts,
            "fetcher started"
        );
        let mut tasks = JoinSet::new();
        while let Some(c) = rx.recv().await {
            while tasks.len() >= self.max_in_flight {
                reap(tasks.join_next().await);
            }
            let me = self.clone();
            let raw = raw.clone();
            let tx = tx.clone();
            let stats = stats.clone();
            tasks.spawn(async move { me.process(c, raw.as_ref(), &tx, &stats).await });
        }
        while let Some(res) = tasks.join_next().await {
            reap(Some(res));
        }
        info!(target: "fetch", "fetcher drained");
    }
}

fn reap(res: Option<Result<(), tokio::task::JoinError>>) {
    if let Some(Err(e)) = res {
        error!(target: "fetch", error = %e, "fetch task panicked");
    }
}

/// Feed title if present, else the first Markdown heading/line of the body.
pub fn resolve_title(feed_title: &str, content: &str) -> String {
    let t = feed_title.trim();
    if !t.is_empty() {
        return t.to_string();
    }
    content
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(|l| {
            let l = l.trim_start_matches('#').trim();
            l.strip_prefix("Title:").map(str::trim).unwrap_or(l).to_string()
        })
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| "Unknown Title".to_string())
}
