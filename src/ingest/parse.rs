// src/ingest/parse.rs
//! Feed body parsers: RSS 2.0, RSS 1.0 (RDF), Atom and JSON/JSONP item lists.
//! All parsers yield candidates in document order and leave link filtering
//! and dedup to the monitor.

use anyhow::{anyhow, Context, Result};
use quick_xml::de::from_str;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Deserialize;
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::{OffsetDateTime, UtcOffset};

use crate::config::FeedSource;
use crate::ingest::normalize_text;
use crate::types::Candidate;

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

/// RSS 1.0: items are siblings of `<channel>` under `<rdf:RDF>`.
#[derive(Debug, Deserialize)]
struct Rdf {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    guid: Option<Text>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    #[serde(rename = "dc:date", alias = "date")]
    dc_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Text {
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entry: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    title: Option<Text>,
    #[serde(rename = "link", default)]
    links: Vec<AtomLink>,
    published: Option<String>,
    updated: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

fn parse_rfc2822_to_unix(ts: &str) -> Option<u64> {
    OffsetDateTime::parse(ts.trim(), &Rfc2822)
        .ok()
        .map(|dt| dt.to_offset(UtcOffset::UTC).unix_timestamp())
        .and_then(|x| u64::try_from(x).ok())
}

fn parse_rfc3339_to_unix(ts: &str) -> Option<u64> {
    OffsetDateTime::parse(ts.trim(), &Rfc3339)
        .ok()
        .map(|dt| dt.unix_timestamp())
        .and_then(|x| u64::try_from(x).ok())
}

/// Local name of the first element in the document, e.g. `rss` or `feed`.
fn root_element(s: &str) -> Option<String> {
    let mut reader = Reader::from_str(s);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                return Some(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
            }
            Ok(Event::Eof) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
}

/// Feeds in the wild carry HTML entities that are not valid XML.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...")
}

/// Parse an RSS 2.0 or Atom document.
pub fn parse_xml_feed(source: &str, body: &str) -> Result<Vec<Candidate>> {
    let xml = scrub_html_entities_for_xml(body);
    match root_element(&xml).as_deref() {
        Some("rss") => parse_rss(source, &xml),
        Some("RDF") => parse_rdf(source, &xml),
        Some("feed") => parse_atom(source, &xml),
        Some(other) => Err(anyhow!("unsupported feed root element <{other}>")),
        None => Err(anyhow!("feed body is not XML")),
    }
}

fn parse_rss(source: &str, xml: &str) -> Result<Vec<Candidate>> {
    let rss: Rss = from_str(xml).with_context(|| format!("parsing rss xml for {source}"))?;
    Ok(rss_candidates(source, rss.channel.item))
}

fn parse_rdf(source: &str, xml: &str) -> Result<Vec<Candidate>> {
    let rdf: Rdf = from_str(xml).with_context(|| format!("parsing rdf xml for {source}"))?;
    Ok(rss_candidates(source, rdf.item))
}

fn rss_candidates(source: &str, items: Vec<Item>) -> Vec<Candidate> {
    let mut out = Vec::with_capacity(items.len());
    for it in items {
        let link = it
            .link
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .or_else(|| it.guid.map(|g| g.value.trim().to_string()));
        let Some(url) = link.filter(|l| !l.is_empty()) else {
            continue;
        };
        out.push(Candidate {
            url,
            title: normalize_text(it.title.as_deref().unwrap_or_default()),
            source: source.to_string(),
            published_at: it
                .pub_date
                .as_deref()
                .and_then(parse_rfc2822_to_unix)
                .or_else(|| it.dc_date.as_deref().and_then(parse_rfc3339_to_unix)),
        });
    }
    out
}

fn parse_atom(source: &str, xml: &str) -> Result<Vec<Candidate>> {
    let feed: AtomFeed = from_str(xml).with_context(|| format!("parsing atom xml for {source}"))?;
    let mut out = Vec::with_capacity(feed.entry.len());
    for e in feed.entry {
        // rel="alternate" (or no rel) is the article itself
        let href = e
            .links
            .iter()
            .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
            .or_else(|| e.links.first())
            .and_then(|l| l.href.clone());
        let Some(url) = href.map(|h| h.trim().to_string()).filter(|h| !h.is_empty()) else {
            continue;
        };
        out.push(Candidate {
            url,
            title: normalize_text(e.title.as_ref().map(|t| t.value.as_str()).unwrap_or_default()),
            source: source.to_string(),
            published_at: e
                .published
                .as_deref()
                .or(e.updated.as_deref())
                .and_then(parse_rfc3339_to_unix),
        });
    }
    Ok(out)
}

/// Parse a JSON (or JSONP-wrapped) API response described by `feed`.
pub fn parse_json_feed(feed: &FeedSource, body: &str) -> Result<Vec<Candidate>> {
    // JSONP: keep the outermost object
    let start = body.find('{').ok_or_else(|| anyhow!("no JSON object in {} body", feed.name))?;
    let end = body
        .rfind('}')
        .filter(|e| *e > start)
        .ok_or_else(|| anyhow!("unterminated JSON object in {} body", feed.name))?;
    let root: serde_json::Value = serde_json::from_str(&body[start..=end])
        .with_context(|| format!("parsing json feed {}", feed.name))?;

    let pointer = feed.items_pointer.as_deref().unwrap_or("");
    let url_field = feed.url_field.as_deref().unwrap_or("url");
    let title_field = feed.title_field.as_deref().unwrap_or("title");

    let items = root
        .pointer(pointer)
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow!("{}: no item array at `{pointer}`", feed.name))?;

    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let Some(url) = item
            .get(url_field)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
        else {
            continue;
        };
        let title = item.get(title_field).and_then(|v| v.as_str()).unwrap_or_default();
        out.push(Candidate {
            url: url.to_string(),
            title: normalize_text(title),
            source: feed.name.clone(),
            published_at: None,
        });
    }
    Ok(out)
}
