// src/ingest/timestamps.rs
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ingest::types::{Entry, FeedSource, Timestamp, TimestampExtractor};

/// What to do with an entry whose date is missing or unparseable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingTimestamp {
    /// Report `None`; the entry becomes a filter boundary and is never ingested.
    #[default]
    Reject,
    /// Stamp the entry with the time its feed first served it. The owning
    /// poller remembers the stamp, so a re-served entry keeps its first one.
    IngestTime,
}

/// Reads the first present field from `fields` and parses it as RFC 3339
/// (Atom) or RFC 2822 (RSS `pubDate`).
#[derive(Debug, Clone)]
pub struct FieldTimestamp {
    fields: Vec<String>,
    missing: MissingTimestamp,
}

impl FieldTimestamp {
    pub fn new<I, S>(fields: I, missing: MissingTimestamp) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            missing,
        }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }
}

impl Default for FieldTimestamp {
    fn default() -> Self {
        Self::new(["updated", "published"], MissingTimestamp::Reject)
    }
}

impl TimestampExtractor for FieldTimestamp {
    fn extract(&self, entry: &Entry) -> Option<Timestamp> {
        self.fields
            .iter()
            .find_map(|f| entry.get_str(f))
            .and_then(parse_feed_datetime)
    }

    fn missing(&self) -> MissingTimestamp {
        self.missing
    }
}

/// First-seen times for undated entries, per feed. Owned by one poller.
///
/// Only identities present in the latest pull are kept, so the map is bounded
/// by feed size. An entry that drops out of the feed and comes back is new.
#[derive(Debug, Default)]
pub struct IngestStamps {
    seen: HashMap<FeedSource, HashMap<String, Timestamp>>,
}

impl IngestStamps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp every undated entry of this pull, reusing earlier stamps.
    pub fn refresh(
        &mut self,
        source: &FeedSource,
        entries: &[Entry],
        timestamps: &dyn TimestampExtractor,
        now: Timestamp,
    ) {
        let previous = self.seen.remove(source).unwrap_or_default();
        let mut current = HashMap::new();
        for entry in entries {
            if timestamps.extract(entry).is_some() {
                continue;
            }
            let key = entry_identity(entry);
            let ts = previous.get(&key).copied().unwrap_or(now);
            current.entry(key).or_insert(ts);
        }
        if !current.is_empty() {
            self.seen.insert(source.clone(), current);
        }
    }

    pub fn get(&self, source: &FeedSource, entry: &Entry) -> Option<Timestamp> {
        self.seen.get(source)?.get(&entry_identity(entry)).copied()
    }

    /// Extractor for one pull: the real date when present, else the stamp.
    pub fn extractor<'a>(
        &'a self,
        source: &'a FeedSource,
        inner: &'a dyn TimestampExtractor,
    ) -> Stamped<'a> {
        Stamped {
            stamps: self,
            source,
            inner,
        }
    }
}

pub struct Stamped<'a> {
    stamps: &'a IngestStamps,
    source: &'a FeedSource,
    inner: &'a dyn TimestampExtractor,
}

impl TimestampExtractor for Stamped<'_> {
    fn extract(&self, entry: &Entry) -> Option<Timestamp> {
        self.inner
            .extract(entry)
            .or_else(|| self.stamps.get(self.source, entry))
    }
}

/// `id`, then `link`, then `title`, then the whole entry.
fn entry_identity(entry: &Entry) -> String {
    ["id", "link", "title"]
        .iter()
        .find_map(|f| entry.get_str(f))
        .map(str::to_string)
        .unwrap_or_else(|| entry.to_json())
}

/// Parse the date formats feeds actually use. `None` if neither matches.
pub fn parse_feed_datetime(raw: &str) -> Option<Timestamp> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(s)
        .or_else(|_| DateTime::parse_from_rfc2822(s))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
