// src/store.rs
//! Append-only persistence for raw articles and signals (newline-delimited JSON).

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::types::{NewsItem, Signal, TimeHorizon};

#[async_trait]
pub trait RawSink: Send + Sync {
    /// Append one article. `Ok(false)` means the URL was already persisted
    /// this run and nothing was written.
    async fn append(&self, item: &NewsItem) -> Result<bool>;
}

#[async_trait]
pub trait SignalSink: Send + Sync {
    /// Append one signal. `Ok(false)` means a signal for this URL already exists.
    async fn append(&self, signal: &Signal) -> Result<bool>;
}

async fn append_line<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut line = serde_json::to_vec(value).context("serializing record")?;
    line.push(b'\n');
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("opening {}", path.display()))?;
    f.write_all(&line)
        .await
        .with_context(|| format!("appending to {}", path.display()))?;
    f.flush().await?;
    Ok(())
}

/// `{dir}/news_YYYY-MM-DD.jsonl`, one file per UTC calendar day.
pub struct JsonlRawStore {
    dir: PathBuf,
    // Held across the write so lines never interleave.
    written: Mutex<HashSet<String>>,
}

impl JsonlRawStore {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating raw dir {}", dir.display()))?;
        Ok(Self {
            dir,
            written: Mutex::new(HashSet::new()),
        })
    }

    pub fn path_for(&self, day: DateTime<Utc>) -> PathBuf {
        self.dir.join(format!("news_{}.jsonl", day.format("%Y-%m-%d")))
    }
}

#[async_trait]
impl RawSink for JsonlRawStore {
    async fn append(&self, item: &NewsItem) -> Result<bool> {
        let mut written = self.written.lock().await;
        if written.contains(&item.url) {
            return Ok(false);
        }
        append_line(&self.path_for(item.fetched_at), item).await?;
        written.insert(item.url.clone());
        Ok(true)
    }
}

/// `{dir}/signals_{Short|Medium|Long}.jsonl`.
pub struct JsonlSignalStore {
    dir: PathBuf,
    written: Mutex<HashSet<String>>,
}

impl JsonlSignalStore {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating signal dir {}", dir.display()))?;
        Ok(Self {
            dir,
            written: Mutex::new(HashSet::new()),
        })
    }

    pub fn path_for(&self, horizon: TimeHorizon) -> PathBuf {
        self.dir.join(format!("signals_{horizon}.jsonl"))
    }
}

#[async_trait]
impl SignalSink for JsonlSignalStore {
    async fn append(&self, signal: &Signal) -> Result<bool> {
        let mut written = self.written.lock().await;
        if written.contains(&signal.source_url) {
            return Ok(false);
        }
        append_line(&self.path_for(signal.time_horizon), signal).await?;
        written.insert(signal.source_url.clone());
        Ok(true)
    }
}

/// In-memory sink for both record kinds (tests, dry runs).
#[derive(Default)]
pub struct MemoryStore {
    pub items: std::sync::Mutex<Vec<NewsItem>>,
    pub signals: std::sync::Mutex<Vec<Signal>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> Vec<NewsItem> {
        self.items.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn signals(&self) -> Vec<Signal> {
        self.signals.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl RawSink for MemoryStore {
    async fn append(&self, item: &NewsItem) -> Result<bool> {
        let mut v = self
            .items
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store poisoned"))?;
        if v.iter().any(|i| i.url == item.url) {
            return Ok(false);
        }
        v.push(item.clone());
        Ok(true)
    }
}

#[async_trait]
impl SignalSink for MemoryStore {
    async fn append(&self, signal: &Signal) -> Result<bool> {
        let mut v = self
            .signals
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store poisoned"))?;
        if v.iter().any(|s| s.source_url == signal.source_url) {
            return Ok(false);
        }
        v.push(signal.clone());
        Ok(true)
    }
}
