// src/config/pipeline.rs
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_CONFIG_PATH: &str = "FINNEWS_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/finnews.toml";

/// Which inference backend serves `infer(prompt, temperature)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// Ollama-compatible server on the local network.
    Local,
    /// OpenAI-compatible hosted API (DeepSeek by default).
    #[serde(alias = "deepseek")]
    Remote,
}

/// What happens to a URL whose fetch attempts were all exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchExhaustedPolicy {
    /// Stays in the dedup store; never fetched again this run.
    Exclude,
    /// Released from the dedup store so a later scan can rediscover it.
    RetryNextScan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ThermalProbeKind {
    None,
    NvidiaSmi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedKind {
    /// RSS 2.0 or Atom; detected from the root element.
    #[default]
    Rss,
    /// JSON (or JSONP) API with an item list at `items_pointer`.
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSource {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub kind: FeedKind,
    /// JSON pointer to the item array, e.g. `/result/data/feed/list`.
    #[serde(default)]
    pub items_pointer: Option<String>,
    #[serde(default)]
    pub url_field: Option<String>,
    #[serde(default)]
    pub title_field: Option<String>,
}

impl FeedSource {
    pub fn rss(name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            kind: FeedKind::Rss,
            items_pointer: None,
            url_field: None,
            title_field: None,
        }
    }

    pub fn json(name: &str, url: &str, items_pointer: &str, url_field: &str, title_field: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            kind: FeedKind::Json,
            items_pointer: Some(items_pointer.to_string()),
            url_field: Some(url_field.to_string()),
            title_field: Some(title_field.to_string()),
        }
    }
}

/// All tunables of the pipeline. Built once at startup and shared read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    // --- inference backend ---
    pub provider: LlmProvider,
    /// "ENV" means: read from DEEPSEEK_API_KEY.
    pub api_key: String,
    pub model: String,
    pub local_base_url: String,
    pub remote_base_url: String,
    /// Refuse to start when the backend probe fails.
    pub require_backend: bool,

    // --- content extraction ---
    pub reader_base: String,
    pub reader_api_key: Option<String>,

    // --- concurrency ---
    /// F: simultaneous content fetches.
    pub fetch_concurrency: usize,
    /// G: simultaneous inference calls system-wide.
    pub gpu_concurrency: usize,
    /// Articles processed concurrently by the engine (calls still gated by G).
    pub engine_workers: Option<usize>,
    pub queue_capacity: usize,

    // --- inference parameters ---
    pub context_window: u32,
    pub temp_fast: f32,
    pub temp_slow: f32,
    pub fast_max_tokens: u32,
    pub slow_max_tokens: u32,
    pub max_content_chars: usize,
    pub bypass_keywords: Vec<String>,

    // --- timing / retry ---
    pub scan_interval_secs: u64,
    /// R: total attempts per fetch, including the first.
    pub fetch_max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub backoff_jitter_ms: u64,
    pub feed_timeout_secs: u64,
    pub fetch_timeout_secs: u64,
    pub inference_timeout_secs: u64,
    /// 1 = no retry.
    pub inference_max_attempts: u32,
    pub on_fetch_exhausted: FetchExhaustedPolicy,
    pub shutdown_grace_secs: u64,

    // --- thermal guard ---
    pub thermal_probe: ThermalProbeKind,
    pub gpu_temp_limit: f32,
    pub gpu_temp_resume: f32,
    pub gpu_temp_check_interval_secs: u64,

    // --- persistence ---
    pub raw_dir: PathBuf,
    pub signal_dir: PathBuf,
    pub dedup_path: Option<PathBuf>,
    pub calibration_path: Option<PathBuf>,

    // --- telemetry ---
    pub metrics_addr: Option<SocketAddr>,
    pub log_json: bool,

    pub feeds: Vec<FeedSource>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Local,
            api_key: String::new(),
            model: "qwen3:8b".to_string(),
            local_base_url: "http://localhost:11434".to_string(),
            remote_base_url: "https://api.deepseek.com".to_string(),
            require_backend: true,

            reader_base: "https://r.jina.ai/".to_string(),
            reader_api_key: None,

            fetch_concurrency: 10,
            gpu_concurrency: 1,
            engine_workers: None,
            queue_capacity: 100,

            context_window: 4096,
            temp_fast: 0.2,
            temp_slow: 0.6,
            fast_max_tokens: 8,
            slow_max_tokens: 4096,
            max_content_chars: 6000,
            bypass_keywords: default_bypass_keywords(),

            scan_interval_secs: 30,
            fetch_max_attempts: 3,
            backoff_base_ms: 2_000,
            backoff_max_ms: 10_000,
            backoff_jitter_ms: 250,
            feed_timeout_secs: 10,
            fetch_timeout_secs: 15,
            inference_timeout_secs: 120,
            inference_max_attempts: 1,
            on_fetch_exhausted: FetchExhaustedPolicy::Exclude,
            shutdown_grace_secs: 300,

            thermal_probe: ThermalProbeKind::None,
            gpu_temp_limit: 80.0,
            gpu_temp_resume: 65.0,
            gpu_temp_check_interval_secs: 5,

            raw_dir: PathBuf::from("data/raw"),
            signal_dir: PathBuf::from("data/signals"),
            dedup_path: None,
            calibration_path: None,

            metrics_addr: None,
            log_json: false,

            feeds: default_feeds(),
        }
    }
}

/// Title keywords that mark an article relevant without a fast-pass call.
pub fn default_bypass_keywords() -> Vec<String> {
    [
        "A股", "股市", "人民币", "央行", "美联储", "利好", "利空", "GDP", "CPI", "监管", "芯片",
        "半导体", "财报", "增持", "回购", "AI", "金融", "算力", "沪指", "板块", "概念股", "股票",
        "涨停", "跌停", "回调", "反弹", "市场情绪",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

pub fn default_feeds() -> Vec<FeedSource> {
    vec![
        FeedSource::rss("21jingji-finance", "http://www.21jingji.com/rss/21jingji/finance.xml"),
        FeedSource::rss("21jingji-macro", "http://www.21jingji.com/rss/21jingji/macro.xml"),
        FeedSource::rss("caixin", "http://ma.caixin.com/rss/finance.xml"),
        FeedSource::rss("huxiu", "https://www.huxiu.com/rss/0.xml"),
        FeedSource::rss("36kr", "https://www.36kr.com/feed"),
        FeedSource::rss("ftchinese-news", "http://www.ftchinese.com/rss/news"),
        FeedSource::rss("ftchinese-markets", "http://www.ftchinese.com/rss/markets"),
        FeedSource::rss(
            "jiemian-securities",
            "https://a.jiemian.com/index.php?m=article&a=rss&cid=4",
        ),
        FeedSource::rss("sohu-business", "http://business.sohu.com/rss/scroll.xml"),
        FeedSource::rss("zaobao-finance", "https://www.zaobao.com.sg/finance/rss.xml"),
        FeedSource::rss("zhitong", "https://www.zhitongcaijing.com/rss.xml"),
        FeedSource::rss("wallstreetcn", "https://rsshub.app/wallstreetcn/news/global"),
        FeedSource::json(
            "sina-7x24",
            "https://zhibo.sina.com.cn/api/zhibo/feed?page=1&page_size=20&zhibo_id=152&tag_id=0&dire=f&dpc=1&type=0",
            "/result/data/feed/list",
            "docurl",
            "rich_text",
        ),
        FeedSource::json(
            "eastmoney-kuaixun",
            "https://newsapi.eastmoney.com/kuaixun/v1/getlist_102_ajaxResult_50_1_.html",
            "/LivesList",
            "url_unique",
            "title",
        ),
    ]
}

impl PipelineConfig {
    /// Parse a TOML file. Missing keys fall back to defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading pipeline config from {}", path.display()))?;
        let cfg: PipelineConfig = toml::from_str(&data)
            .with_context(|| format!("parsing pipeline config {}", path.display()))?;
        Ok(cfg)
    }

    /// Load config using env var + fallbacks, then apply env overrides:
    /// 1) $FINNEWS_CONFIG_PATH
    /// 2) config/finnews.toml
    /// 3) built-in defaults
    pub fn load_default() -> Result<Self> {
        let mut cfg = if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            Self::load_from_file(&pb)?
        } else {
            let default_p = PathBuf::from(DEFAULT_CONFIG_PATH);
            if default_p.exists() {
                Self::load_from_file(&default_p)?
            } else {
                Self::default()
            }
        };
        cfg.apply_env_overrides();
        cfg.resolve_api_key()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Environment wins over the file for the handful of options people
    /// usually set per host.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_str("FINNEWS_LLM_PROVIDER") {
            match v.to_ascii_lowercase().as_str() {
                "local" => self.provider = LlmProvider::Local,
                "remote" | "deepseek" => self.provider = LlmProvider::Remote,
                other => tracing::warn!(value = other, "ignoring unknown FINNEWS_LLM_PROVIDER"),
            }
        }
        if let Some(v) = env_str("FINNEWS_MODEL") {
            self.model = v;
        }
        if let Some(v) = env_str("FINNEWS_LOCAL_BASE_URL") {
            self.local_base_url = v;
        }
        if let Some(v) = env_str("FINNEWS_REMOTE_BASE_URL") {
            self.remote_base_url = v;
        }
        if let Some(v) = env_str("FINNEWS_API_KEY") {
            self.api_key = v;
        }
        if let Some(v) = env_str("FINNEWS_READER_BASE").or_else(|| env_str("JINA_READER_BASE")) {
            self.reader_base = v;
        }
        if let Some(v) = env_parse("FINNEWS_FETCH_CONCURRENCY") {
            self.fetch_concurrency = v;
        }
        if let Some(v) = env_parse("FINNEWS_GPU_CONCURRENCY") {
            self.gpu_concurrency = v;
        }
        if let Some(v) = env_parse("FINNEWS_SCAN_INTERVAL_SECS") {
            self.scan_interval_secs = v;
        }
        if let Some(v) = env_parse("FINNEWS_METRICS_ADDR") {
            self.metrics_addr = Some(v);
        }
    }

    /// Resolve `api_key = "ENV"` (or an empty key for the remote provider)
    /// from DEEPSEEK_API_KEY.
    pub fn resolve_api_key(&mut self) -> Result<()> {
        let wants_env = self.api_key.trim().eq_ignore_ascii_case("env");
        let remote_without_key = self.provider == LlmProvider::Remote && self.api_key.trim().is_empty();
        if wants_env || remote_without_key {
            match std::env::var("DEEPSEEK_API_KEY") {
                Ok(k) if !k.trim().is_empty() => self.api_key = k.trim().to_string(),
                _ if wants_env => bail!("Missing DEEPSEEK_API_KEY env var"),
                _ => {}
            }
        }
        Ok(())
    }

    /// Reject values the pipeline cannot run with; repair the ones it can.
    pub fn validate(&mut self) -> Result<()> {
        if self.fetch_concurrency == 0 {
            bail!("fetch_concurrency must be >= 1");
        }
        if self.gpu_concurrency == 0 {
            bail!("gpu_concurrency must be >= 1");
        }
        if self.engine_workers == Some(0) {
            bail!("engine_workers must be >= 1");
        }
        if self.queue_capacity == 0 {
            bail!("queue_capacity must be >= 1");
        }
        if self.fetch_max_attempts == 0 {
            bail!("fetch_max_attempts must be >= 1");
        }
        if self.inference_max_attempts == 0 {
            bail!("inference_max_attempts must be >= 1");
        }
        for (name, secs) in [
            ("fetch_timeout_secs", self.fetch_timeout_secs),
            ("inference_timeout_secs", self.inference_timeout_secs),
            ("feed_timeout_secs", self.feed_timeout_secs),
        ] {
            if secs == 0 {
                bail!("{name} must be >= 1");
            }
        }
        for (name, t) in [("temp_fast", self.temp_fast), ("temp_slow", self.temp_slow)] {
            if !(0.0..=2.0).contains(&t) {
                bail!("{name} = {t} outside 0.0..=2.0");
            }
        }
        if self.gpu_temp_resume > self.gpu_temp_limit {
            // keep a valid hysteresis band
            std::mem::swap(&mut self.gpu_temp_resume, &mut self.gpu_temp_limit);
        }
        if self.backoff_max_ms < self.backoff_base_ms {
            self.backoff_max_ms = self.backoff_base_ms;
        }
        if self.provider == LlmProvider::Remote && self.api_key.trim().is_empty() {
            bail!("remote provider selected but no API key configured");
        }
        Ok(())
    }

    pub fn engine_workers(&self) -> usize {
        self.engine_workers.unwrap_or(self.gpu_concurrency).max(1)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs.max(1))
    }

    pub fn feed_timeout(&self) -> Duration {
        Duration::from_secs(self.feed_timeout_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn inference_timeout(&self) -> Duration {
        Duration::from_secs(self.inference_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn gpu_temp_check_interval(&self) -> Duration {
        Duration::from_secs(self.gpu_temp_check_interval_secs.max(1))
    }
}

fn env_str(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env_str(key)?;
    match raw.parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable env override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: PipelineConfig = toml::from_str(
            r#"
fetch_concurrency = 4
provider = "deepseek"
api_key = "sk-test"

[[feeds]]
name = "only"
url = "https://example.test/rss"
"#,
        )
        .unwrap();
        assert_eq!(cfg.fetch_concurrency, 4);
        assert_eq!(cfg.provider, LlmProvider::Remote);
        assert_eq!(cfg.gpu_concurrency, 1);
        assert_eq!(cfg.fetch_max_attempts, 3);
        assert_eq!(cfg.feeds.len(), 1);
        assert_eq!(cfg.feeds[0].kind, FeedKind::Rss);
    }

    #[test]
    fn validate_rejects_zero_concurrency() {
        let mut cfg = PipelineConfig {
            gpu_concurrency: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_timeouts() {
        let patches: [fn(&mut PipelineConfig); 3] = [
            |c| c.fetch_timeout_secs = 0,
            |c| c.inference_timeout_secs = 0,
            |c| c.feed_timeout_secs = 0,
        ];
        for patch in patches {
            let mut cfg = PipelineConfig::default();
            patch(&mut cfg);
            let err = cfg.validate().expect_err("zero timeout must be rejected");
            assert!(err.to_string().contains("timeout_secs"));
        }
    }

    #[test]
    fn validate_swaps_inverted_thermal_band() {
        let mut cfg = PipelineConfig {
            gpu_temp_limit: 60.0,
            gpu_temp_resume: 85.0,
            ..Default::default()
        };
        cfg.validate().unwrap();
        assert_eq!(cfg.gpu_temp_limit, 85.0);
        assert_eq!(cfg.gpu_temp_resume, 60.0);
    }

    #[test]
    fn engine_workers_default_to_gpu_concurrency() {
        let cfg = PipelineConfig {
            gpu_concurrency: 3,
            ..Default::default()
        };
        assert_eq!(cfg.engine_workers(), 3);
    }
}
