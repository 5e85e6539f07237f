//! calibrate.rs — historical calibration of model scores plus a simple
//! tradability filter. History is a JSON array of realised outcomes.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, warn};

use crate::types::{Signal, TimeHorizon};

/// Similar-signal window for calibration and hit rate: `score ± 2`.
pub const SIMILAR_SCORE_BAND: i32 = 2;
/// Below this many similar records, fall back to `score / 10`.
pub const MIN_SIMILAR: usize = 5;
pub const DEFAULT_HIT_RATE: f64 = 0.5;

pub const TRADABLE_MIN_CERTAINTY: i32 = 7;
pub const TRADABLE_MIN_ABS_SCORE: i32 = 5;
pub const TRADABLE_MIN_HIT_RATE: f64 = 0.55;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub score: i32,
    pub certainty: i32,
    /// `score * certainty / 100`
    pub predicted: f64,
    pub actual: f64,
    pub horizon: TimeHorizon,
    pub days: u32,
    #[serde(default)]
    pub recorded_at: String,
}

#[derive(Debug)]
pub struct Calibrator {
    path: Option<PathBuf>,
    history: Mutex<Vec<CalibrationRecord>>,
}

impl Calibrator {
    pub fn in_memory(history: Vec<CalibrationRecord>) -> Self {
        Self {
            path: None,
            history: Mutex::new(history),
        }
    }

    /// Load history from `path`; a missing or unreadable file starts empty.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let history = match std::fs::read_to_string(&path) {
            Ok(s) => serde_json::from_str(&s).unwrap_or_else(|e| {
                error!(target: "calibrate", path = %path.display(), error = %e, "calibration history unreadable; starting empty");
                Vec::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                error!(target: "calibrate", path = %path.display(), error = %e, "failed to read calibration history");
                Vec::new()
            }
        };
        Self {
            path: Some(path),
            history: Mutex::new(history),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<CalibrationRecord>> {
        self.history.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record a realised outcome and persist the history.
    pub fn record(&self, signal: &Signal, actual_return: f64, days: u32) -> Result<()> {
        let entry = CalibrationRecord {
            score: signal.score,
            certainty: signal.certainty,
            predicted: f64::from(signal.score * signal.certainty) / 100.0,
            actual: actual_return,
            horizon: signal.time_horizon,
            days,
            recorded_at: chrono::Utc::now().to_rfc3339(),
        };
        let snapshot = {
            let mut h = self.lock();
            h.push(entry);
            h.clone()
        };
        self.save(&snapshot)
    }

    fn save(&self, history: &[CalibrationRecord]) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        }
        let body = serde_json::to_string_pretty(history)?;
        std::fs::write(path, body).with_context(|| format!("writing {}", path.display()))
    }

    /// Mean realised return of similar past signals, else `score / 10`.
    pub fn calibrated_score(&self, signal: &Signal) -> f64 {
        let h = self.lock();
        let similar: Vec<f64> = h
            .iter()
            .filter(|r| (r.score - signal.score).abs() <= SIMILAR_SCORE_BAND && r.horizon == signal.time_horizon)
            .map(|r| r.actual)
            .collect();
        if similar.len() >= MIN_SIMILAR {
            similar.iter().sum::<f64>() / similar.len() as f64
        } else {
            f64::from(signal.score) / 10.0
        }
    }

    /// Share of records in `[min, max]` whose realised sign matched the score.
    pub fn hit_rate(&self, min: i32, max: i32, horizon: TimeHorizon) -> f64 {
        let h = self.lock();
        let relevant: Vec<&CalibrationRecord> = h
            .iter()
            .filter(|r| (min..=max).contains(&r.score) && r.horizon == horizon)
            .collect();
        if relevant.is_empty() {
            return DEFAULT_HIT_RATE;
        }
        let hits = relevant
            .iter()
            .filter(|r| (r.score > 0 && r.actual > 0.0) || (r.score < 0 && r.actual < 0.0))
            .count();
        hits as f64 / relevant.len() as f64
    }

    pub fn is_tradable(&self, signal: &Signal) -> bool {
        if signal.certainty < TRADABLE_MIN_CERTAINTY || signal.score.abs() < TRADABLE_MIN_ABS_SCORE {
            return false;
        }
        let hr = self.hit_rate(
            signal.score - SIMILAR_SCORE_BAND,
            signal.score + SIMILAR_SCORE_BAND,
            signal.time_horizon,
        );
        if hr < TRADABLE_MIN_HIT_RATE {
            return false;
        }
        if signal.related_stocks.is_empty() {
            warn!(target: "calibrate", url = %signal.source_url, "strong signal without related stocks; not tradable");
            return false;
        }
        true
    }
}

static RE_STRONG_POS: Lazy<Regex> = Lazy::new(|| Regex::new("重大利好|显著|暴涨").expect("positive regex"));
static RE_STRONG_NEG: Lazy<Regex> = Lazy::new(|| Regex::new("重大利空|暴跌|危机").expect("negative regex"));

/// Quantifiable traits of a signal's reasoning, logged next to calibration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TextFeatures {
    pub mentions_policy: bool,
    pub mentions_earnings: bool,
    pub mentions_risk: bool,
    pub strong_positive: usize,
    pub strong_negative: usize,
    /// Characters, not bytes.
    pub reasoning_len: usize,
    /// Explicit first/second-order steps in the reasoning chain.
    pub reasoning_depth: usize,
    pub num_stocks: usize,
}

impl TextFeatures {
    pub fn extract(signal: &Signal) -> Self {
        let r = signal.reasoning.to_lowercase();
        let any = |words: &[&str]| words.iter().any(|w| r.contains(w));
        Self {
            mentions_policy: any(&["政策", "监管"]),
            mentions_earnings: any(&["业绩", "财报"]),
            mentions_risk: any(&["风险", "不确定"]),
            strong_positive: RE_STRONG_POS.find_iter(&r).count(),
            strong_negative: RE_STRONG_NEG.find_iter(&r).count(),
            reasoning_len: r.chars().count(),
            reasoning_depth: r.matches("一阶").count() + r.matches("二阶").count(),
            num_stocks: signal.related_stocks.len(),
        }
    }
}

/// Exponential decay of the score by the horizon's half-life.
pub fn apply_time_decay(signal: &Signal, hours_since: f64) -> f64 {
    let half_life = signal.time_horizon.half_life_hours();
    f64::from(signal.score) * 0.5_f64.powf(hours_since.max(0.0) / half_life)
}
