// src/ingest/providers/fixture.rs
use anyhow::Result;
use async_trait::async_trait;

use crate::config::{FeedKind, FeedSource};
use crate::ingest::parse::{parse_json_feed, parse_xml_feed};
use crate::ingest::types::FeedProvider;
use crate::types::Candidate;

/// Feed backed by an in-memory body. Used for offline runs and tests.
pub struct StaticFeedProvider {
    source: FeedSource,
    body: String,
}

impl StaticFeedProvider {
    /// RSS or Atom document.
    pub fn from_fixture(name: &str, xml: &str) -> Self {
        Self {
            source: FeedSource::rss(name, "fixture://"),
            body: xml.to_string(),
        }
    }

    /// JSON API response; `source` carries the pointer and field names.
    pub fn from_json_fixture(source: FeedSource, json: &str) -> Self {
        Self {
            source,
            body: json.to_string(),
        }
    }
}

#[async_trait]
impl FeedProvider for StaticFeedProvider {
    async fn fetch_entries(&self) -> Result<Vec<Candidate>> {
        match self.source.kind {
            FeedKind::Rss => parse_xml_feed(&self.source.name, &self.body),
            FeedKind::Json => parse_json_feed(&self.source, &self.body),
        }
    }

    fn name(&self) -> &str {
        &self.source.name
    }
}
