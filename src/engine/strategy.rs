// src/engine/strategy.rs
//! Prompt construction and result parsing, kept behind `PromptStrategy` so a
//! different market (crypto, commodities) only needs a new implementation.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::error::ValidationError;
use crate::types::{NewsItem, Signal, TimeHorizon, CERTAINTY_MAX, CERTAINTY_MIN, SCORE_MAX, SCORE_MIN};

pub trait PromptStrategy: Send + Sync {
    /// `true` marks the item relevant without a fast-pass call.
    fn keyword_bypass(&self, _item: &NewsItem) -> bool {
        false
    }

    fn fast_prompt(&self, item: &NewsItem) -> String;

    fn parse_relevance(&self, output: &str) -> bool {
        parse_relevance(output)
    }

    fn slow_prompt(&self, item: &NewsItem) -> String;

    fn parse_signal(&self, output: &str, item: &NewsItem) -> Result<Signal, ValidationError> {
        parse_signal(output, &item.url)
    }
}

/// Chinese A-share equity analyst.
#[derive(Debug, Clone)]
pub struct AShareStrategy {
    keywords: Vec<String>,
    max_content_chars: usize,
}

impl AShareStrategy {
    pub fn new(keywords: Vec<String>, max_content_chars: usize) -> Self {
        Self {
            keywords: keywords.into_iter().filter(|k| !k.trim().is_empty()).collect(),
            max_content_chars,
        }
    }
}

impl PromptStrategy for AShareStrategy {
    fn keyword_bypass(&self, item: &NewsItem) -> bool {
        self.keywords.iter().any(|k| item.title.contains(k.as_str()))
    }

    fn fast_prompt(&self, item: &NewsItem) -> String {
        let lead: String = item.content.chars().take(200).collect();
        format!(
            r#"You are an A-share quantitative trader. Decide whether the news below belongs to finance, macroeconomics, the stock market, technology or policy.

Title: "{title}"
Lead: "{lead}"

Answer "yes" if it does.
Answer "no" if it is unrelated (entertainment, sports, gossip, minor local events).
Answer with one word only."#,
            title = item.title,
            lead = lead.trim(),
        )
    }

    fn slow_prompt(&self, item: &NewsItem) -> String {
        let content: String = item.content.chars().take(self.max_content_chars).collect();
        format!(
            r#"[Role]
You are a senior quantitative researcher analysing how news affects the Chinese A-share market.

[Input News]
Title: {title}
{content}

[Instructions]
1. Think first inside a <think> block:
   - first-order impact (direct winners and losers);
   - second-order impact (supply chain, competitors, substitutes);
   - the macro backdrop (liquidity, policy cycle) and how strong the signal is.
2. After thinking, output ONE strict JSON object and nothing else:
{{
  "reasoning": "concise conclusion of the analysis",
  "score": <integer -10 (very bearish) .. 10 (very bullish)>,
  "certainty": <integer 0 .. 10>,
  "related_stocks": ["sh.600XXX"],
  "time_horizon": "Short" | "Medium" | "Long"
}}"#,
            title = item.title,
            content = content,
        )
    }
}

static RE_THINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<think>.*?</think>").expect("think regex"));

/// Drop `<think>…</think>` reasoning blocks emitted by reasoning models.
pub fn strip_think(s: &str) -> String {
    RE_THINK.replace_all(s, "").into_owned()
}

/// Outermost `{ … }` span.
pub fn extract_json_object(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let end = s.rfind('}')?;
    (end > start).then(|| &s[start..=end])
}

const NEGATIVE: [&str; 7] = ["not relevant", "irrelevant", "unrelated", "不相关", "无关", "否", "不是"];
const POSITIVE: [&str; 5] = ["relevant", "yes", "是", "相关", "related"];

/// Tolerant binary reading of the fast-pass answer; negatives win.
pub fn parse_relevance(output: &str) -> bool {
    let cleaned = strip_think(output);
    let t = cleaned
        .trim()
        .trim_matches(|c: char| c.is_ascii_punctuation() || matches!(c, '。' | '，' | '！' | '“' | '”'))
        .to_lowercase();
    if NEGATIVE.iter().any(|n| t.contains(n)) {
        return false;
    }
    if t == "no" || t.starts_with("no ") || t.starts_with("no,") || t.starts_with("no.") {
        return false;
    }
    POSITIVE.iter().any(|p| t.contains(p))
}

fn int_field(obj: &Map<String, Value>, field: &'static str, min: i64, max: i64) -> Result<i64, ValidationError> {
    let v = match obj.get(field) {
        None | Some(Value::Null) => return Err(ValidationError::MissingField(field)),
        Some(v) => v,
    };
    let n = match (v.as_i64(), v.as_f64()) {
        (Some(n), _) => n,
        (None, Some(f)) if f.fract() == 0.0 && f.abs() < 1e15 => f as i64,
        _ => return Err(ValidationError::WrongType { field }),
    };
    if n < min || n > max {
        return Err(ValidationError::OutOfRange {
            field,
            value: n,
            min,
            max,
        });
    }
    Ok(n)
}

fn stock_list(obj: &Map<String, Value>) -> Result<Vec<String>, ValidationError> {
    const FIELD: &str = "related_stocks";
    match obj.get(FIELD) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(a)) => a
            .iter()
            .map(|x| match x {
                Value::String(s) => Ok(s.trim().to_uppercase()),
                Value::Number(n) => Ok(n.to_string()),
                _ => Err(ValidationError::WrongType { field: FIELD }),
            })
            .collect(),
        Some(_) => Err(ValidationError::WrongType { field: FIELD }),
    }
}

/// Validate slow-pass output against the signal schema.
pub fn parse_signal(output: &str, source_url: &str) -> Result<Signal, ValidationError> {
    let cleaned = strip_think(output);
    let json = extract_json_object(&cleaned).ok_or(ValidationError::NoJson)?;
    let v: Value = serde_json::from_str(json).map_err(|e| ValidationError::Malformed(e.to_string()))?;
    let obj = v
        .as_object()
        .ok_or_else(|| ValidationError::Malformed("top level is not an object".into()))?;

    let reasoning = match obj.get("reasoning") {
        None | Some(Value::Null) => return Err(ValidationError::MissingField("reasoning")),
        Some(Value::String(s)) => s.trim().to_string(),
        Some(_) => return Err(ValidationError::WrongType { field: "reasoning" }),
    };
    let score = int_field(obj, "score", SCORE_MIN, SCORE_MAX)?;
    let certainty = int_field(obj, "certainty", CERTAINTY_MIN, CERTAINTY_MAX)?;
    let related_stocks = stock_list(obj)?;
    let time_horizon = match obj.get("time_horizon") {
        None | Some(Value::Null) => return Err(ValidationError::MissingField("time_horizon")),
        Some(Value::String(s)) => s
            .parse::<TimeHorizon>()
            .map_err(ValidationError::InvalidHorizon)?,
        Some(other) => return Err(ValidationError::InvalidHorizon(other.to_string())),
    };

    Ok(Signal {
        source_url: source_url.to_string(),
        reasoning,
        // bounded to -10..=10 / 0..=10 above
        score: score as i32,
        certainty: certainty as i32,
        related_stocks,
        time_horizon,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD: &str = r#"<think>
rate cut → banks' net interest margin {compressed} but credit demand up
</think>
{"reasoning":"Liquidity positive for large banks","score":8,"certainty":9,"related_stocks":["601398", "sh.600036"],"time_horizon":"Medium"}"#;

    #[test]
    fn parses_signal_after_think_block() {
        let s = parse_signal(GOOD, "https://x/a").unwrap();
        assert_eq!(s.source_url, "https://x/a");
        assert_eq!(s.score, 8);
        assert_eq!(s.certainty, 9);
        assert_eq!(s.related_stocks, vec!["601398".to_string(), "SH.600036".to_string()]);
        assert_eq!(s.time_horizon, TimeHorizon::Medium);
    }

    #[test]
    fn whole_floats_accepted_fractions_rejected() {
        let ok = r#"{"reasoning":"r","score":-3.0,"certainty":5,"time_horizon":"short"}"#;
        assert_eq!(parse_signal(ok, "u").unwrap().score, -3);
        let bad = r#"{"reasoning":"r","score":2.5,"certainty":5,"time_horizon":"Short"}"#;
        assert_eq!(
            parse_signal(bad, "u"),
            Err(ValidationError::WrongType { field: "score" })
        );
    }

    #[test]
    fn schema_violations_are_reported() {
        let missing_score = r#"{"reasoning":"r","certainty":5,"time_horizon":"Short"}"#;
        assert_eq!(parse_signal(missing_score, "u"), Err(ValidationError::MissingField("score")));

        let missing_certainty = r#"{"reasoning":"r","score":1,"time_horizon":"Short"}"#;
        assert_eq!(
            parse_signal(missing_certainty, "u"),
            Err(ValidationError::MissingField("certainty"))
        );

        let out_of_range = r#"{"reasoning":"r","score":11,"certainty":5,"time_horizon":"Short"}"#;
        assert!(matches!(
            parse_signal(out_of_range, "u"),
            Err(ValidationError::OutOfRange { field: "score", value: 11, .. })
        ));

        let bad_horizon = r#"{"reasoning":"r","score":1,"certainty":5,"time_horizon":"Forever"}"#;
        assert_eq!(
            parse_signal(bad_horizon, "u"),
            Err(ValidationError::InvalidHorizon("Forever".into()))
        );

        assert_eq!(parse_signal("I cannot answer that.", "u"), Err(ValidationError::NoJson));
        assert!(matches!(parse_signal("{score: 8}", "u"), Err(ValidationError::Malformed(_))));
    }

    #[test]
    fn relevance_negatives_win() {
        assert!(parse_relevance("relevant"));
        assert!(parse_relevance("Yes."));
        assert!(parse_relevance("是。"));
        assert!(parse_relevance("<think>hmm, not sure</think>yes"));
        assert!(!parse_relevance("not relevant"));
        assert!(!parse_relevance("Irrelevant"));
        assert!(!parse_relevance("No"));
        assert!(!parse_relevance("否"));
        assert!(!parse_relevance("不相关"));
        assert!(!parse_relevance(""));
    }

    #[test]
    fn keyword_bypass_matches_title_only() {
        let s = AShareStrategy::new(vec!["央行".into(), "".into()], 6000);
        let mut item = NewsItem {
            url: "u".into(),
            title: "央行降准".into(),
            content: "".into(),
            source: "s".into(),
            fetched_at: chrono::Utc::now(),
        };
        assert!(s.keyword_bypass(&item));
        item.title = "Sports final".into();
        item.content = "央行".into();
        assert!(!s.keyword_bypass(&item));
    }

    #[test]
    fn slow_prompt_truncates_content() {
        let s = AShareStrategy::new(vec![], 10);
        let item = NewsItem {
            url: "u".into(),
            title: "t".into(),
            content: "0123456789ABCDEF".into(),
            source: "s".into(),
            fetched_at: chrono::Utc::now(),
        };
        let p = s.slow_prompt(&item);
        assert!(p.contains("0123456789"));
        assert!(!p.contains("ABCDEF"));
    }
}
