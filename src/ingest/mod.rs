// src/ingest/mod.rs
pub mod config;
pub mod error;
pub mod filter;
pub mod pipeline;
pub mod poller;
pub mod providers;
pub mod scheduler;
pub mod timestamps;
pub mod types;
pub mod watermark;

pub use config::IngestConfig;
pub use error::{ConfigError, ErrorKind, IngestError};
pub use filter::{filter_new, FilterOutcome, OrderPolicy};
pub use pipeline::{
    AttributeExtractor, Classifier, EntryContext, EntrySummaryExtractor, Extracted,
    RecordExtractor, RecordPipeline,
};
pub use poller::{
    Collaborators, FeedPoller, PollerSettings, PollerState, StatsSnapshot, SweepReport,
};
pub use scheduler::{partition, schedule, IngestSchedulerCfg, Scheduled, WorkerPool};
pub use timestamps::{FieldTimestamp, IngestStamps, MissingTimestamp};
pub use types::{Entry, FeedFetcher, FeedSource, Timestamp, TimestampExtractor};
pub use watermark::WatermarkStore;

use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_sweeps_total", "Completed sweeps over a worker's feeds.");
        describe_counter!(
            "ingest_entries_accepted_total",
            "Entries newer than their feed's watermark."
        );
        describe_counter!("ingest_rows_emitted_total", "Rows appended to a sink.");
        describe_counter!(
            "ingest_fetch_errors_total",
            "Feed fetch/parse errors (feed skipped for the sweep)."
        );
        describe_counter!(
            "ingest_record_errors_total",
            "Entries or rows dropped by extract/classify/sink errors."
        );
        describe_counter!(
            "ingest_idle_sleeps_total",
            "Sleeps taken after a sweep in which no feed advanced."
        );
        describe_histogram!("ingest_fetch_ms", "Feed fetch time in milliseconds.");
        describe_histogram!("ingest_parse_ms", "Feed document parse time in milliseconds.");
        describe_gauge!("ingest_last_sweep_ts", "Unix ts when a sweep last finished.");
    });
}

/// Normalize text: decode entities, strip tags, collapse whitespace, trim,
/// strip stray trailing punctuation.
pub fn normalize_text(s: &str) -> String {
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();

    // entities first, so encoded markup (`&lt;b&gt;`) is stripped too
    let mut out = html_escape::decode_html_entities(s).into_owned();

    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").expect("tag regex"));
    out = re_tags.replace_all(&out, "").into_owned();

    // “ ” « » → ", ‘ ’ → '
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").expect("ws regex"));
    out = re_ws.replace_all(&out, " ").trim().to_string();

    while out.ends_with(['!', '?', '.', ',']) {
        out.pop();
    }
    out.truncate(out.trim_end().len());

    if out.chars().count() > 1500 {
        out = out.chars().take(1500).collect();
    }
    out
}
