//! # Core records
//! Values that travel through the pipeline queues and end up on disk.
//!
//! `Candidate` lives only in the new-item queue. `NewsItem` is created by the
//! fetcher, `Signal` by the inference engine; both are immutable once built.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A freshly discovered link, as emitted by the source monitor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Candidate {
    pub url: String,
    /// Feed-provided title; may be empty (JSON APIs often omit it).
    pub title: String,
    /// Feed label, e.g. "36kr".
    pub source: String,
    /// Unix seconds from the feed entry, when the feed carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<u64>,
}

impl Candidate {
    pub fn new(url: impl Into<String>, title: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            source: source.into(),
            published_at: None,
        }
    }
}

/// Raw article with extracted full text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewsItem {
    pub url: String,
    pub title: String,
    pub content: String,
    pub source: String,
    pub fetched_at: DateTime<Utc>,
}

/// Time scale over which the market impact is expected to play out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeHorizon {
    Short,
    Medium,
    Long,
}

impl TimeHorizon {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeHorizon::Short => "Short",
            TimeHorizon::Medium => "Medium",
            TimeHorizon::Long => "Long",
        }
    }

    /// Half-life in hours used for score decay.
    pub fn half_life_hours(&self) -> f64 {
        match self {
            TimeHorizon::Short => 12.0,
            TimeHorizon::Medium => 72.0,
            TimeHorizon::Long => 720.0,
        }
    }
}

impl fmt::Display for TimeHorizon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeHorizon {
    type Err = String;

    /// Case-insensitive; surrounding whitespace is ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "short" => Ok(TimeHorizon::Short),
            "medium" => Ok(TimeHorizon::Medium),
            "long" => Ok(TimeHorizon::Long),
            _ => Err(s.to_string()),
        }
    }
}

pub const SCORE_MIN: i64 = -10;
pub const SCORE_MAX: i64 = 10;
pub const CERTAINTY_MIN: i64 = 0;
pub const CERTAINTY_MAX: i64 = 10;

/// Structured result of the slow reasoning pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Signal {
    pub source_url: String,
    pub reasoning: String,
    /// -10 (strongly bearish) ..= 10 (strongly bullish).
    pub score: i32,
    /// 0 ..= 10.
    pub certainty: i32,
    pub related_stocks: Vec<String>,
    pub time_horizon: TimeHorizon,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn horizon_parses_case_insensitively() {
        assert_eq!("medium".parse::<TimeHorizon>(), Ok(TimeHorizon::Medium));
        assert_eq!(" LONG ".parse::<TimeHorizon>(), Ok(TimeHorizon::Long));
        assert!("Forever".parse::<TimeHorizon>().is_err());
    }

    #[test]
    fn signal_serializes_with_plain_horizon_name() {
        let s = Signal {
            source_url: "https://x/a".into(),
            reasoning: "r".into(),
            score: 8,
            certainty: 9,
            related_stocks: vec!["601398".into()],
            time_horizon: TimeHorizon::Medium,
        };
        let v = serde_json::to_value(&s).unwrap();
        assert_eq!(v["time_horizon"], "Medium");
        assert_eq!(v["related_stocks"][0], "601398");
    }
}
