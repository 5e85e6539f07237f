// src/ingest/mod.rs
pub mod parse;
pub mod providers;
pub mod types;

use once_cell::sync::Lazy;
use regex::Regex;

pub use types::FeedProvider;

/// Maximum title length kept after normalization (characters).
pub const TITLE_MAX_CHARS: usize = 300;

static RE_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)</?[^>]+>").expect("tag regex"));
static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));

/// Normalize feed text: decode entities, strip tags, fold quotes and whitespace.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    let out = RE_TAGS.replace_all(&out, "");

    // 3) Normalize “ ” « » ‘ ’ to ASCII quotes
    let out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace (includes NBSP)
    let out = RE_WS.replace_all(&out, " ");
    let out = out.trim();

    // 5) Length cap
    if out.chars().count() > TITLE_MAX_CHARS {
        out.chars().take(TITLE_MAX_CHARS).collect()
    } else {
        out.to_string()
    }
}

/// Only absolute http(s) links are worth handing to the fetcher.
pub fn is_fetchable_link(link: &str) -> bool {
    let l = link.trim();
    l.starts_with("http://") || l.starts_with("https://")
}
