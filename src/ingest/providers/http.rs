// src/ingest/providers/http.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use metrics::histogram;
use std::time::Duration;

use crate::config::{FeedKind, FeedSource};
use crate::ingest::parse::{parse_json_feed, parse_xml_feed};
use crate::ingest::types::FeedProvider;
use crate::types::Candidate;

pub const FEED_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Live feed polled over HTTP GET.
pub struct HttpFeedProvider {
    source: FeedSource,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFeedProvider {
    pub fn new(source: FeedSource, client: reqwest::Client, timeout: Duration) -> Self {
        Self {
            source,
            client,
            timeout,
        }
    }

    /// Build one provider per configured feed sharing a single client.
    pub fn from_sources(sources: &[FeedSource], timeout: Duration) -> Result<Vec<Box<dyn FeedProvider>>> {
        let client = reqwest::Client::builder()
            .user_agent(FEED_USER_AGENT)
            .connect_timeout(Duration::from_secs(4))
            .build()
            .context("building feed http client")?;
        Ok(sources
            .iter()
            .cloned()
            .map(|s| Box::new(Self::new(s, client.clone(), timeout)) as Box<dyn FeedProvider>)
            .collect())
    }
}

#[async_trait]
impl FeedProvider for HttpFeedProvider {
    async fn fetch_entries(&self) -> Result<Vec<Candidate>> {
        let resp = self
            .client
            .get(&self.source.url)
            .timeout(self.timeout)
            .send()
            .await
            .with_context(|| format!("{} http get()", self.source.name))?
            .error_for_status()
            .with_context(|| format!("{} http status", self.source.name))?;
        let body = resp
            .text()
            .await
            .with_context(|| format!("{} http .text()", self.source.name))?;

        let t0 = std::time::Instant::now();
        let out = match self.source.kind {
            FeedKind::Rss => parse_xml_feed(&self.source.name, &body)?,
            FeedKind::Json => parse_json_feed(&self.source, &body)?,
        };
        histogram!("finnews_feed_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        Ok(out)
    }

    fn name(&self) -> &str {
        &self.source.name
    }
}
