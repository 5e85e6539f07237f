//! # Source Monitor
//! Polls every configured feed, keeps only URLs never seen before and pushes
//! them onto the new-item queue.
//!
//! A URL is inserted into the dedup store *before* it is enqueued, so an
//! overlapping scan can never rediscover it.

use futures::future::join_all;
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::dedup::DedupStore;
use crate::ingest::{is_fetchable_link, FeedProvider};
use crate::metrics::PipelineStats;
use crate::types::Candidate;

pub struct SourceMonitor {
    feeds: Vec<Box<dyn FeedProvider>>,
    dedup: Arc<DedupStore>,
}

impl SourceMonitor {
    pub fn new(feeds: Vec<Box<dyn FeedProvider>>, dedup: Arc<DedupStore>) -> Self {
        Self { feeds, dedup }
    }

    pub fn feed_count(&self) -> usize {
        self.feeds.len()
    }

    /// One pass over all feeds. Feeds are polled concurrently; a failing feed
    /// is logged and skipped. Within a feed, entry order is preserved.
    pub async fn scan(&self) -> Vec<Candidate> {
        let results = join_all(self.feeds.iter().map(|f| f.fetch_entries())).await;

        let mut fresh = Vec::new();
        for (feed, res) in self.feeds.iter().zip(results) {
            match res {
                Ok(entries) => {
                    let total = entries.len();
                    let mut kept = 0usize;
                    for c in entries {
                        if !is_fetchable_link(&c.url) {
                            continue;
                        }
                        if self.dedup.insert_if_new(c.url.trim()) {
                            kept += 1;
                            fresh.push(Candidate {
                                url: c.url.trim().to_string(),
                                ..c
                            });
                        }
                    }
                    debug!(target: "monitor", feed = feed.name(), total, new = kept, "feed scanned");
                }
                Err(e) => {
                    warn!(target: "monitor", feed = feed.name(), error = %format!("{e:#}"), "feed needs checking");
                    counter!("finnews_feed_errors_total").increment(1);
                }
            }
        }
        counter!("finnews_scan_runs_total").increment(1);
        fresh
    }

    /// Periodic loop: scan, enqueue, sleep. Returns when `shutdown` flips to
    /// `true` or the queue is closed; dropping `tx` on return lets the fetcher
    /// drain and stop.
    pub async fn run(
        self,
        tx: mpsc::Sender<Candidate>,
        interval: Duration,
        stats: Arc<PipelineStats>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(target: "monitor", feeds = self.feeds.len(), interval_secs = interval.as_secs(), "monitor started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }

            info!(target: "monitor", "scanning feeds for new articles");
            let fresh = self.scan().await;
            if fresh.is_empty() {
                info!(target: "monitor", "no new articles; standing by");
                continue;
            }
            info!(target: "monitor", count = fresh.len(), "feeding new URLs to the fetcher");
            stats.record_discovered(fresh.len() as u64);

            for c in fresh {
                // Scanned URLs are already marked seen; they must reach the
                // queue even when shutdown is requested mid-batch.
                if let Err(e) = tx.send(c).await {
                    warn!(target: "monitor", url = %e.0.url, "fetch queue closed; candidate not enqueued");
                    return;
                }
            }
        }
        info!(target: "monitor", "monitor stopped");
    }
}
