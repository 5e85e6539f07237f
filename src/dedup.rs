//! dedup.rs — set of source URLs already seen by the monitor.
//!
//! In-memory by default. With a backing file every first sighting is appended
//! as one line, and the file is replayed on open, so restarts do not
//! rediscover old articles.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug)]
pub struct DedupStore {
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    seen: HashSet<String>,
    log: Option<(PathBuf, File)>,
}

impl Default for DedupStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl DedupStore {
    pub fn in_memory() -> Self {
        Self {
            inner: Mutex::new(Inner {
                seen: HashSet::new(),
                log: None,
            }),
        }
    }

    /// Open (or create) a persistent store backed by `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating dedup dir {}", parent.display()))?;
        }
        let mut seen = HashSet::new();
        if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("reading dedup log {}", path.display()))?;
            for line in content.lines() {
                let t = line.trim();
                if t.is_empty() {
                    continue;
                }
                // a leading '-' marks a released URL
                if let Some(released) = t.strip_prefix('-') {
                    seen.remove(released);
                } else {
                    seen.insert(t.to_string());
                }
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening dedup log {}", path.display()))?;
        tracing::info!(path = %path.display(), seen = seen.len(), "dedup store loaded");
        Ok(Self {
            inner: Mutex::new(Inner {
                seen,
                log: Some((path.to_path_buf(), file)),
            }),
        })
    }

    /// Mark `url` as seen. Returns `true` on first sighting only.
    pub fn insert_if_new(&self, url: &str) -> bool {
        let mut g = self.lock();
        if !g.seen.insert(url.to_string()) {
            return false;
        }
        g.append_line(url);
        true
    }

    pub fn contains(&self, url: &str) -> bool {
        self.lock().seen.contains(url)
    }

    /// Forget `url` so a later scan may rediscover it.
    pub fn release(&self, url: &str) -> bool {
        let mut g = self.lock();
        if !g.seen.remove(url) {
            return false;
        }
        g.append_line(&format!("-{url}"));
        true
    }

    pub fn len(&self) -> usize {
        self.lock().seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A panic while holding the lock cannot leave the set half-updated.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Inner {
    fn append_line(&mut self, line: &str) {
        if let Some((path, file)) = self.log.as_mut() {
            if let Err(e) = writeln!(file, "{line}") {
                tracing::warn!(path = %path.display(), error = %e, "dedup log append failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sighting_only() {
        let d = DedupStore::in_memory();
        assert!(d.insert_if_new("https://x/a"));
        assert!(!d.insert_if_new("https://x/a"));
        assert!(d.contains("https://x/a"));
        assert_eq!(d.len(), 1);
    }

    #[test]
    fn release_allows_rediscovery() {
        let d = DedupStore::in_memory();
        d.insert_if_new("https://x/a");
        assert!(d.release("https://x/a"));
        assert!(!d.release("https://x/a"));
        assert!(d.insert_if_new("https://x/a"));
    }

    #[test]
    fn persistent_store_replays_log() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("state/seen.txt");
        {
            let d = DedupStore::open(&p).unwrap();
            d.insert_if_new("https://x/a");
            d.insert_if_new("https://x/b");
            d.release("https://x/b");
        }
        let d = DedupStore::open(&p).unwrap();
        assert!(d.contains("https://x/a"));
        assert!(!d.contains("https://x/b"));
        assert_eq!(d.len(), 1);
    }
}
