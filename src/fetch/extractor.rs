// src/fetch/extractor.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::error::FetchError;

pub const READER_USER_AGENT: &str = "finnews-pipeline/0.1 (quant research)";

/// Turns an article URL into its plain-text (or Markdown) body.
#[async_trait]
pub trait ContentExtractor: Send + Sync {
    async fn extract(&self, url: &str) -> Result<String, FetchError>;
    fn name(&self) -> &'static str;
}

/// Reader-style service: `GET {base}{url}` returns cleaned Markdown
/// (Jina Reader and compatible proxies).
pub struct ReaderExtractor {
    http: reqwest::Client,
    base: String,
    api_key: Option<String>,
}

impl ReaderExtractor {
    pub fn new(base: &str, api_key: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(READER_USER_AGENT)
            .connect_timeout(Duration::from_secs(4))
            .build()
            .context("building reader http client")?;
        Ok(Self {
            http,
            base: base.to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        })
    }

    pub fn target_url(&self, url: &str) -> String {
        format!("{}{}", self.base, url)
    }
}

#[async_trait]
impl ContentExtractor for ReaderExtractor {
    async fn extract(&self, url: &str) -> Result<String, FetchError> {
        let mut req = self.http.get(self.target_url(url));
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let body = resp.text().await?;
        if body.trim().is_empty() {
            return Err(FetchError::Empty);
        }
        Ok(body)
    }

    fn name(&self) -> &'static str {
        "reader"
    }
}
