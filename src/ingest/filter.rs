//! # Entry filter
//! Decides which entries of one pull are new, given the feed's watermark.
//!
//! Feeds are expected newest-first. The walk stops at the first entry dated at
//! or before the watermark; equality counts as "already seen", so two items
//! sharing the boundary timestamp are never re-emitted (and an item published
//! later with that same timestamp is lost). An undateable entry also stops the
//! walk: it is never ingested.

use serde::{Deserialize, Serialize};

use crate::ingest::types::{Entry, Timestamp, TimestampExtractor};

/// How to treat a pull that is not newest-first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderPolicy {
    /// Walk the pull as delivered. Unordered pulls are only logged.
    #[default]
    TrustSource,
    /// On an unordered pull, scan every entry and accept all dated entries
    /// newer than the watermark, re-sorted newest-first.
    SortWhenUnordered,
}

/// An accepted entry together with the timestamp it was judged by.
#[derive(Debug, Clone, PartialEq)]
pub struct Accepted {
    pub entry: Entry,
    pub ts: Timestamp,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterOutcome {
    /// New entries, newest-first.
    pub accepted: Vec<Accepted>,
    /// Timestamp the watermark should move to, if the feed advanced.
    pub newest: Option<Timestamp>,
    /// The walk ended on an entry without a usable timestamp.
    pub hit_undated: bool,
    /// The pull was not newest-first.
    pub unordered: bool,
}

impl FilterOutcome {
    pub fn advanced(&self) -> bool {
        !self.accepted.is_empty()
    }
}

/// Split one pull into new entries and the next watermark.
pub fn filter_new(
    entries: Vec<Entry>,
    watermark: Option<Timestamp>,
    timestamps: &dyn TimestampExtractor,
    policy: OrderPolicy,
) -> FilterOutcome {
    // extract once per entry
    let dated: Vec<(Entry, Option<Timestamp>)> = entries
        .into_iter()
        .map(|e| {
            let ts = timestamps.extract(&e);
            (e, ts)
        })
        .collect();

    let unordered = !is_newest_first(&dated);

    let mut out = if unordered && policy == OrderPolicy::SortWhenUnordered {
        full_scan(dated, watermark)
    } else {
        prefix_walk(dated, watermark)
    };
    out.unordered = unordered;
    out.newest = out.accepted.first().map(|a| a.ts);
    out
}

fn is_newest_first(dated: &[(Entry, Option<Timestamp>)]) -> bool {
    let mut prev: Option<Timestamp> = None;
    for ts in dated.iter().filter_map(|(_, ts)| *ts) {
        if let Some(p) = prev {
            if ts > p {
                return false;
            }
        }
        prev = Some(ts);
    }
    true
}

fn prefix_walk(
    dated: Vec<(Entry, Option<Timestamp>)>,
    watermark: Option<Timestamp>,
) -> FilterOutcome {
    let mut out = FilterOutcome::default();
    for (entry, ts) in dated {
        let Some(ts) = ts else {
            out.hit_undated = true;
            break;
        };
        if watermark.is_some_and(|wm| ts <= wm) {
            break;
        }
        out.accepted.push(Accepted { entry, ts });
    }
    out
}

fn full_scan(dated: Vec<(Entry, Option<Timestamp>)>, watermark: Option<Timestamp>) -> FilterOutcome {
    let mut out = FilterOutcome::default();
    for (entry, ts) in dated {
        match ts {
            None => out.hit_undated = true,
            Some(ts) if watermark.is_some_and(|wm| ts <= wm) => {}
            Some(ts) => out.accepted.push(Accepted { entry, ts }),
        }
    }
    // stable: equal timestamps keep document order
    out.accepted.sort_by(|a, b| b.ts.cmp(&a.ts));
    out
}
