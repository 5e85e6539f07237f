// tests/fetch_retry.rs
//
// Fetcher retry discipline and the exhausted-URL policy.
// - a URL asleep in backoff leaves the fetch permit to healthy URLs

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use finnews_pipeline::config::FetchExhaustedPolicy;
use finnews_pipeline::dedup::DedupStore;
use finnews_pipeline::error::FetchError;
use finnews_pipeline::fetch::{FetchOutcome, Fetcher};
use finnews_pipeline::retry::Backoff;
use finnews_pipeline::store::{MemoryStore, RawSink};
use finnews_pipeline::types::Candidate;
use finnews_pipeline::PipelineStats;
use tokio::sync::mpsc;

fn fetcher(cfg: &finnews_pipeline::PipelineConfig, ex: Arc<ScriptedExtractor>) -> Fetcher {
    Fetcher::new(ex, cfg).with_backoff(Backoff::none())
}

#[tokio::test]
async fn always_failing_fetch_is_attempted_exactly_r_times() {
    for r in [1u32, 3, 5] {
        let cfg = finnews_pipeline::PipelineConfig {
            fetch_max_attempts: r,
            ..test_config()
        };
        let ex = Arc::new(ScriptedExtractor::failing());
        let f = fetcher(&cfg, ex.clone());

        let out = f.fetch(&Candidate::new("https://x/dead", "t", "s")).await;
        match out {
            FetchOutcome::Exhausted { attempts, .. } => assert_eq!(attempts, r),
            FetchOutcome::Fetched(_) => panic!("failing extractor must not produce an item"),
        }
        assert_eq!(ex.calls("https://x/dead"), r);
    }
}

#[tokio::test]
async fn transient_failure_recovers_within_budget() {
    let cfg = finnews_pipeline::PipelineConfig {
        fetch_max_attempts: 3,
        ..test_config()
    };
    let ex = Arc::new(ScriptedExtractor::failing().script(
        "https://x/flaky",
        vec![
            Err(FetchError::Timeout(15)),
            Err(FetchError::Empty),
            Ok("Title: Yuan firms\n\nBody".to_string()),
        ],
    ));
    let f = fetcher(&cfg, ex.clone());

    match f.fetch(&Candidate::new("https://x/flaky", "", "s")).await {
        FetchOutcome::Fetched(item) => {
            assert_eq!(item.url, "https://x/flaky");
            assert_eq!(item.title, "Yuan firms");
        }
        FetchOutcome::Exhausted { last_error, .. } => panic!("unexpected exhaustion: {last_error}"),
    }
    assert_eq!(ex.calls("https://x/flaky"), 3);
}

#[tokio::test]
async fn whitespace_body_counts_as_failure() {
    let cfg = finnews_pipeline::PipelineConfig {
        fetch_max_attempts: 2,
        ..test_config()
    };
    let ex = Arc::new(ScriptedExtractor::always("   \n  "));
    let f = fetcher(&cfg, ex.clone());
    let out = f.fetch(&Candidate::new("https://x/blank", "", "s")).await;
    assert!(matches!(
        out,
        FetchOutcome::Exhausted {
            attempts: 2,
            last_error: FetchError::Empty
        }
    ));
}

#[tokio::test]
async fn hung_extractor_hits_timeout() {
    let cfg = finnews_pipeline::PipelineConfig {
        fetch_max_attempts: 1,
        fetch_timeout_secs: 1,
        ..test_config()
    };
    let ex = Arc::new(ScriptedExtractor::always("late").with_delay(Duration::from_secs(3)));
    let f = fetcher(&cfg, ex);
    let out = f.fetch(&Candidate::new("https://x/slow", "", "s")).await;
    assert!(matches!(
        out,
        FetchOutcome::Exhausted {
            last_error: FetchError::Timeout(1),
            ..
        }
    ));
}

#[tokio::test]
async fn retry_next_scan_releases_exhausted_url() {
    let cfg = finnews_pipeline::PipelineConfig {
        fetch_max_attempts: 2,
        on_fetch_exhausted: FetchExhaustedPolicy::RetryNextScan,
        ..test_config()
    };
    let dedup = Arc::new(DedupStore::in_memory());
    assert!(dedup.insert_if_new("https://x/a"));
    let f = fetcher(&cfg, Arc::new(ScriptedExtractor::failing())).with_dedup(dedup.clone());

    let raw = MemoryStore::new();
    let stats = PipelineStats::new();
    let (tx, mut rx) = mpsc::channel(4);
    f.process(Candidate::new("https://x/a", "", "s"), &raw, &tx, &stats).await;

    assert!(!dedup.contains("https://x/a"), "URL must be eligible again");
    assert_eq!(stats.snapshot().fetch_failed, 1);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn fetched_item_is_persisted_before_forwarding() {
    let cfg = test_config();
    let f = fetcher(&cfg, Arc::new(ScriptedExtractor::always("Body")));
    let raw = MemoryStore::new();
    let stats = PipelineStats::new();
    let (tx, mut rx) = mpsc::channel(4);

    f.process(Candidate::new("https://x/a", "Headline", "s"), &raw, &tx, &stats).await;

    let forwarded = rx.try_recv().expect("item forwarded");
    assert_eq!(forwarded.url, "https://x/a");
    assert_eq!(raw.items().len(), 1);

    // same URL again: raw store refuses, nothing forwarded
    f.process(Candidate::new("https://x/a", "Headline", "s"), &raw, &tx, &stats).await;
    assert!(rx.try_recv().is_err());
    assert_eq!(raw.items().len(), 1);
}

#[tokio::test]
async fn backoff_sleep_does_not_hold_the_fetch_slot() {
    let cfg = finnews_pipeline::PipelineConfig {
        fetch_concurrency: 1,
        fetch_max_attempts: 3,
        ..test_config()
    };
    let ex = Arc::new(
        ScriptedExtractor::always("Body").script("https://x/dead", vec![Err(FetchError::Status(503))]),
    );
    let backoff = Backoff {
        base: Duration::from_millis(400),
        max: Duration::from_secs(2),
        jitter: Duration::ZERO,
    };
    let f = Arc::new(Fetcher::new(ex.clone(), &cfg).with_backoff(backoff));
    let raw: Arc<dyn RawSink> = Arc::new(MemoryStore::new());
    let stats = Arc::new(PipelineStats::new());
    let (cand_tx, cand_rx) = mpsc::channel(8);
    let (item_tx, mut item_rx) = mpsc::channel(8);
    let worker = tokio::spawn(f.run(cand_rx, raw, item_tx, stats.clone()));

    let started = tokio::time::Instant::now();
    cand_tx.send(Candidate::new("https://x/dead", "", "s")).await.expect("send dead");
    cand_tx.send(Candidate::new("https://x/ok", "", "s")).await.expect("send ok");
    drop(cand_tx);

    let item = tokio::time::timeout(Duration::from_secs(5), item_rx.recv())
        .await
        .expect("healthy item in time")
        .expect("healthy item");
    assert_eq!(item.url, "https://x/ok");
    assert!(
        started.elapsed() < Duration::from_millis(300),
        "healthy URL waited {:?} behind a backoff sleep",
        started.elapsed()
    );

    worker.await.expect("fetcher task");
    assert_eq!(ex.calls("https://x/dead"), 3);
    assert_eq!(stats.snapshot().fetch_failed, 1);
    assert_eq!(stats.snapshot().fetched, 1);
}
