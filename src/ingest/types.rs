// src/ingest/types.rs
use anyhow::Result;

use crate::types::Candidate;

/// One configured feed endpoint. Implementations return entries in feed order.
#[async_trait::async_trait]
pub trait FeedProvider: Send + Sync {
    async fn fetch_entries(&self) -> Result<Vec<Candidate>>;
    fn name(&self) -> &str;
}
