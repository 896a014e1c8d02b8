// src/ingest/watermark.rs
use std::collections::HashMap;

use crate::ingest::types::{FeedSource, Timestamp};

/// Per-feed high-water mark: timestamp of the newest accepted entry.
///
/// Held by the poller that owns the feeds, so there is exactly one writer per
/// key and no locking. Lives in memory only; a restart starts from scratch.
#[derive(Debug, Default, Clone)]
pub struct WatermarkStore {
    marks: HashMap<FeedSource, Timestamp>,
}

impl WatermarkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` means the feed never yielded an accepted entry.
    pub fn get(&self, source: &FeedSource) -> Option<Timestamp> {
        self.marks.get(source).copied()
    }

    /// Overwrites unconditionally; monotonicity is up to the caller.
    pub fn set(&mut self, source: &FeedSource, ts: Timestamp) {
        self.marks.insert(source.clone(), ts);
    }

    pub fn len(&self) -> usize {
        self.marks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }
}
