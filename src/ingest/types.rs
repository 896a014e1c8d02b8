// src/ingest/types.rs
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::ingest::timestamps::MissingTimestamp;

pub type Timestamp = DateTime<Utc>;

/// A feed, identified by its URL. Owned by exactly one poller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeedSource(Arc<str>);

impl FeedSource {
    pub fn new(url: impl AsRef<str>) -> Self {
        Self(Arc::from(url.as_ref()))
    }

    pub fn url(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FeedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FeedSource {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for FeedSource {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// One feed item as handed over by the fetcher: field name -> value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Entry(Map<String, JsonValue>);

impl Entry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: &str, value: impl Into<JsonValue>) -> Self {
        self.insert(field, value);
        self
    }

    pub fn insert(&mut self, field: &str, value: impl Into<JsonValue>) {
        self.0.insert(field.to_string(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&JsonValue> {
        self.0.get(field)
    }

    /// String field; `None` when absent, null or not a string.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(JsonValue::as_str)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_default()
    }
}

/// Fetch collaborator: one URL in, the feed's entries out, in document order.
#[async_trait::async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch(&self, source: &FeedSource) -> Result<Vec<Entry>>;
    fn name(&self) -> &'static str;
}

/// Pulls the ordering timestamp out of an entry. `None` means undateable.
pub trait TimestampExtractor: Send + Sync {
    fn extract(&self, entry: &Entry) -> Option<Timestamp>;

    /// How the poller treats entries `extract` cannot date.
    fn missing(&self) -> MissingTimestamp {
        MissingTimestamp::Reject
    }
}

impl<F> TimestampExtractor for F
where
    F: Fn(&Entry) -> Option<Timestamp> + Send + Sync,
{
    fn extract(&self, entry: &Entry) -> Option<Timestamp> {
        self(entry)
    }
}
