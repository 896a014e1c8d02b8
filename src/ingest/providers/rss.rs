// src/ingest/providers/rss.rs
use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use metrics::histogram;
use parking_lot::Mutex;
use quick_xml::de::from_str;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Deserialize;

use crate::ingest::types::{Entry, FeedFetcher, FeedSource};

// --- RSS 2.0 ---

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    title: Option<String>,
    link: Option<String>,
    description: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    guid: Option<String>,
    author: Option<String>,
    #[serde(rename = "dc:creator")]
    creator: Option<String>,
}

// --- Atom ---

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entry: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    title: Option<AtomText>,
    #[serde(rename = "link", default)]
    links: Vec<AtomLink>,
    summary: Option<AtomText>,
    content: Option<AtomText>,
    published: Option<String>,
    updated: Option<String>,
    id: Option<String>,
    author: Option<AtomPerson>,
}

/// Text construct; `type="html"` and friends are carried as attributes.
#[derive(Debug, Deserialize)]
struct AtomText {
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: String,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomPerson {
    name: Option<String>,
}

enum Mode {
    Http(reqwest::Client),
    /// URL → document; swappable so tests can make a feed "publish".
    Fixture(Mutex<HashMap<String, String>>),
}

/// Fetches RSS 2.0 / Atom documents and hands their items over as [`Entry`]
/// values in document order.
pub struct RssFetcher {
    mode: Mode,
}

impl RssFetcher {
    pub fn from_http(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .context("building feed http client")?;
        Ok(Self {
            mode: Mode::Http(client),
        })
    }

    pub fn from_fixtures<I, K, V>(docs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map = docs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            mode: Mode::Fixture(Mutex::new(map)),
        }
    }

    /// Replace the document served for `url`. No-op in HTTP mode.
    pub fn set_fixture(&self, url: &str, xml: impl Into<String>) {
        if let Mode::Fixture(map) = &self.mode {
            map.lock().insert(url.to_string(), xml.into());
        }
    }

    async fn body(&self, url: &str) -> Result<String> {
        match &self.mode {
            Mode::Http(client) => {
                let resp = client
                    .get(url)
                    .send()
                    .await
                    .with_context(|| format!("GET {url}"))?
                    .error_for_status()
                    .with_context(|| format!("GET {url}"))?;
                resp.text().await.context("reading feed body")
            }
            Mode::Fixture(map) => {
                let doc = map.lock().get(url).cloned();
                doc.ok_or_else(|| anyhow!("no fixture for {url}"))
            }
        }
    }
}

#[async_trait]
impl FeedFetcher for RssFetcher {
    async fn fetch(&self, source: &FeedSource) -> Result<Vec<Entry>> {
        let body = self.body(source.url()).await?;
        parse_feed(&body).with_context(|| format!("parsing feed {source}"))
    }

    fn name(&self) -> &'static str {
        match self.mode {
            Mode::Http(_) => "rss-http",
            Mode::Fixture(_) => "rss-fixture",
        }
    }
}

/// Parse an RSS 2.0 or Atom document into entries, in document order.
pub fn parse_feed(xml: &str) -> Result<Vec<Entry>> {
    let t0 = std::time::Instant::now();
    let xml_clean = scrub_html_entities_for_xml(xml);

    let entries = match root_name(&xml_clean)?.as_str() {
        "rss" => {
            let rss: Rss = from_str(&xml_clean).context("parsing rss xml")?;
            rss.channel.item.into_iter().map(rss_entry).collect()
        }
        "feed" => {
            let feed: AtomFeed = from_str(&xml_clean).context("parsing atom xml")?;
            feed.entry.into_iter().map(atom_entry).collect()
        }
        other => bail!("unsupported feed document root <{other}>"),
    };

    histogram!("ingest_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
    Ok(entries)
}

fn root_name(xml: &str) -> Result<String> {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event().context("reading xml")? {
            Event::Start(e) | Event::Empty(e) => {
                return Ok(String::from_utf8_lossy(e.local_name().as_ref()).into_owned())
            }
            Event::Eof => bail!("empty feed document"),
            _ => {}
        }
    }
}

fn put(entry: &mut Entry, field: &str, value: Option<String>) {
    if let Some(v) = value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        entry.insert(field, v);
    }
}

fn rss_entry(it: RssItem) -> Entry {
    let mut e = Entry::new();
    put(&mut e, "title", it.title);
    put(&mut e, "link", it.link);
    put(&mut e, "summary", it.description);
    put(&mut e, "published", it.pub_date);
    put(&mut e, "id", it.guid);
    put(&mut e, "author", it.author.or(it.creator));
    e
}

fn atom_entry(it: AtomEntry) -> Entry {
    let link = it
        .links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .or_else(|| it.links.first())
        .map(|l| l.href.clone());

    let mut e = Entry::new();
    put(&mut e, "title", it.title.map(|t| t.value));
    put(&mut e, "link", link);
    put(&mut e, "summary", it.summary.or(it.content).map(|t| t.value));
    put(&mut e, "published", it.published);
    put(&mut e, "updated", it.updated);
    put(&mut e, "id", it.id);
    put(&mut e, "author", it.author.and_then(|a| a.name));
    e
}

/// HTML entities XML does not define would fail the parse.
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
